//! Output-path conflict resolution.
//!
//! A proposed output path conflicts when a file already exists there or
//! another queued job has claimed it. Resolution follows the policy the
//! enqueue operation was given; batch enqueue and "encode now" carry
//! independent policies from configuration.

use encodeq_config::ConflictPolicy;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// What the user chose when prompted about a conflicting path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Do not enqueue the job. A normal negative result, not an error.
    Cancel,
    /// Keep the path and overwrite.
    Overwrite,
    /// Rename to a free path.
    AutoRename,
}

/// Synchronous user-prompt collaborator consulted under the Prompt policy.
pub trait PromptHandler: Send + Sync {
    fn resolve_conflict(&self, path: &Path) -> ConflictChoice;
}

/// Prompt handler for surfaces that cannot ask: every conflict cancels
/// the enqueue.
#[derive(Debug, Clone, Default)]
pub struct HeadlessPrompt;

impl PromptHandler for HeadlessPrompt {
    fn resolve_conflict(&self, path: &Path) -> ConflictChoice {
        tracing::warn!(path = %path.display(), "output conflict with no prompt surface, cancelling enqueue");
        ConflictChoice::Cancel
    }
}

/// Whether the proposed path conflicts with the filesystem or the claimed
/// set. Callers must exclude the job's own claim from `claimed`.
fn conflicts(path: &Path, claimed: &HashSet<PathBuf>) -> bool {
    path.exists() || claimed.contains(path)
}

/// Append `-1`, `-2`, ... before the extension until the path neither
/// exists on disk nor appears in the claimed set. The result keeps the
/// original's directory and extension.
pub fn auto_rename(proposed: &Path, claimed: &HashSet<PathBuf>) -> PathBuf {
    let stem = proposed
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = proposed.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = proposed.parent().unwrap_or_else(|| Path::new(""));

    let mut suffix = 1u32;
    loop {
        let file_name = match &extension {
            Some(ext) => format!("{}-{}.{}", stem, suffix, ext),
            None => format!("{}-{}", stem, suffix),
        };
        let candidate = parent.join(file_name);
        if !conflicts(&candidate, claimed) {
            return candidate;
        }
        suffix += 1;
    }
}

/// Resolve the proposed output path against the claimed set under the
/// given policy. Returns `None` when the operation should not enqueue
/// (prompt answered Cancel).
pub fn resolve_output_path(
    proposed: &Path,
    claimed: &HashSet<PathBuf>,
    policy: ConflictPolicy,
    prompt: &dyn PromptHandler,
) -> Option<PathBuf> {
    if !conflicts(proposed, claimed) {
        return Some(proposed.to_path_buf());
    }

    match policy {
        ConflictPolicy::Overwrite => Some(proposed.to_path_buf()),
        ConflictPolicy::AutoRename => Some(auto_rename(proposed, claimed)),
        ConflictPolicy::Prompt => match prompt.resolve_conflict(proposed) {
            ConflictChoice::Cancel => None,
            ConflictChoice::Overwrite => Some(proposed.to_path_buf()),
            ConflictChoice::AutoRename => Some(auto_rename(proposed, claimed)),
        },
    }
}
