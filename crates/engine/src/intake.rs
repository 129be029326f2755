//! Batch source discovery.
//!
//! Walks a directory tree for video files so a whole folder can be
//! enqueued at once under the batch conflict policy.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Video file extensions recognized for batch enqueue (case-insensitive).
pub const VIDEO_EXTENSIONS: &[&str] = &[".mkv", ".mp4", ".avi", ".mov", ".m4v", ".ts", ".m2ts"];

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Recursively find video files under the root, skipping hidden
/// directories. Results are sorted so batch enqueue order is stable.
pub fn find_video_sources(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.file_type().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                // Allow the root directory even if it starts with '.'
                if name.starts_with('.') && entry.depth() > 0 {
                    return false;
                }
            }
        }
        true
    });

    let mut sources: Vec<PathBuf> = walker
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| is_video_file(p))
        .collect();

    sources.sort();
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("/media/movie.mkv")));
        assert!(is_video_file(Path::new("/media/movie.MKV"))); // case-insensitive
        assert!(is_video_file(Path::new("/media/movie.Mp4")));
        assert!(is_video_file(Path::new("/media/movie.m2ts")));
        assert!(!is_video_file(Path::new("/media/movie.srt")));
        assert!(!is_video_file(Path::new("/media/movie.txt")));
        assert!(!is_video_file(Path::new("/media/movie"))); // no extension
    }

    #[test]
    fn test_find_sources_sorted_and_filtered() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir_all(root.join("sub")).unwrap();
        File::create(root.join("b.mkv")).unwrap();
        File::create(root.join("a.mp4")).unwrap();
        File::create(root.join("notes.txt")).unwrap();
        File::create(root.join("sub/c.m4v")).unwrap();

        let sources = find_video_sources(root);

        assert_eq!(
            sources,
            vec![root.join("a.mp4"), root.join("b.mkv"), root.join("sub/c.m4v")]
        );
    }

    #[test]
    fn test_find_sources_missing_root() {
        assert!(find_video_sources(Path::new("/nonexistent/encodeq/batch")).is_empty());
    }

    // Property: files inside hidden directories are never discovered,
    // files in visible directories always are.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(30))]

        #[test]
        fn prop_hidden_directory_exclusion(
            visible_dir in "[a-zA-Z0-9]{1,10}",
            hidden_dir in "\\.[a-zA-Z0-9]{1,10}",
            filename in "[a-zA-Z0-9]{1,10}",
        ) {
            let temp = TempDir::new().unwrap();
            let root = temp.path();

            let visible_path = root.join(&visible_dir);
            fs::create_dir_all(&visible_path).unwrap();
            let visible_video = visible_path.join(format!("{}.mkv", filename));
            File::create(&visible_video).unwrap();

            let hidden_path = root.join(&hidden_dir);
            fs::create_dir_all(&hidden_path).unwrap();
            let hidden_video = hidden_path.join(format!("{}.mkv", filename));
            File::create(&hidden_video).unwrap();

            let sources = find_video_sources(root);

            prop_assert!(sources.contains(&visible_video));
            prop_assert!(!sources.contains(&hidden_video));
        }
    }
}
