//! Cost model for queued jobs.
//!
//! A job's cost is the unit of work used for proportional progress across
//! heterogeneous jobs: a two-hour two-pass encode weighs proportionally more
//! than a twenty-minute single-pass one. A subtitle/foreign-audio scan pass
//! reads far faster than an encode pass, so it contributes at a fraction of
//! real time.

use crate::job::EncodeJob;

/// Divisor applied to video length for the subtitle-scan pass cost.
pub const SUBTITLE_SCAN_COST_FACTOR: f64 = 30.0;

/// Backend pass identifier for a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodePass {
    /// Subtitle/foreign-audio scan pass.
    SubtitleScan,
    /// First (or only) encode pass.
    First,
    /// Second encode pass.
    Second,
}

impl EncodePass {
    /// Map the backend's raw pass number (-1 scan, 1, 2) to a pass.
    pub fn from_raw(pass: i32) -> Option<Self> {
        match pass {
            -1 => Some(EncodePass::SubtitleScan),
            1 => Some(EncodePass::First),
            2 => Some(EncodePass::Second),
            _ => None,
        }
    }
}

/// Derived, non-persisted cost record for one job. Created when the job
/// starts encoding, dropped when it completes or is removed.
#[derive(Debug, Clone)]
pub struct JobWork {
    /// Length of the selected video range in seconds.
    pub video_length_secs: f64,
    /// Whether the job encodes in two passes.
    pub two_pass: bool,
    /// Whether a subtitle scan pass precedes the encode.
    pub subtitle_scan: bool,
    /// Total work cost; fixed at creation.
    pub cost: f64,
    /// Work completed so far; monotone non-decreasing, never exceeds cost.
    completed_work: f64,
}

/// Total cost for a job with the given length and pass structure.
pub fn job_cost(video_length_secs: f64, two_pass: bool, subtitle_scan: bool) -> f64 {
    let mut cost = video_length_secs;
    if two_pass {
        cost += video_length_secs;
    }
    if subtitle_scan {
        cost += video_length_secs / SUBTITLE_SCAN_COST_FACTOR;
    }
    cost
}

impl JobWork {
    pub fn new(video_length_secs: f64, two_pass: bool, subtitle_scan: bool) -> Self {
        Self {
            video_length_secs,
            two_pass,
            subtitle_scan,
            cost: job_cost(video_length_secs, two_pass, subtitle_scan),
            completed_work: 0.0,
        }
    }

    pub fn for_job(job: &EncodeJob) -> Self {
        Self::new(job.video_length_secs, job.two_pass, job.subtitle_scan)
    }

    /// Cost of the scan pass, zero when the job has none.
    pub fn scan_cost(&self) -> f64 {
        if self.subtitle_scan {
            self.video_length_secs / SUBTITLE_SCAN_COST_FACTOR
        } else {
            0.0
        }
    }

    /// Work completed so far.
    pub fn completed_work(&self) -> f64 {
        self.completed_work
    }

    /// Fraction of this job's total cost completed, 0..=1.
    pub fn fraction_complete(&self) -> f64 {
        if self.cost > 0.0 {
            self.completed_work / self.cost
        } else {
            0.0
        }
    }

    /// Apply a backend progress event for the given pass.
    ///
    /// Completed work for a pass is the full cost of every earlier pass
    /// plus the reported fraction of the current one. The stored value only
    /// ever moves forward: a late or repeated event from an earlier point
    /// cannot walk progress backwards.
    pub fn apply_progress(&mut self, pass: EncodePass, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let pass_cost = self.video_length_secs;
        let scan_cost = self.scan_cost();

        let completed = match pass {
            EncodePass::SubtitleScan => scan_cost * fraction,
            EncodePass::First => scan_cost + pass_cost * fraction,
            EncodePass::Second => scan_cost + pass_cost + pass_cost * fraction,
        };

        if completed > self.completed_work {
            self.completed_work = completed;
        }
    }

    /// Mark the whole job's work as done.
    pub fn complete(&mut self) {
        self.completed_work = self.cost;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // Property: cost is at least the video length, and equals
    // length * (1 + two_pass) + (subtitle_scan ? length / 30 : 0).
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_cost_formula(
            len in 0.0f64..100_000.0,
            two_pass in proptest::bool::ANY,
            scan in proptest::bool::ANY,
        ) {
            let cost = job_cost(len, two_pass, scan);

            prop_assert!(cost >= len);

            let passes = if two_pass { 2.0 } else { 1.0 };
            let scan_part = if scan { len / 30.0 } else { 0.0 };
            let expected = len * passes + scan_part;
            prop_assert!((cost - expected).abs() < 1e-9);
        }

        // Property: over any event sequence, completed work is
        // non-decreasing and never exceeds the job's cost.
        #[test]
        fn prop_completed_work_monotone_and_bounded(
            len in 1.0f64..50_000.0,
            two_pass in proptest::bool::ANY,
            scan in proptest::bool::ANY,
            events in proptest::collection::vec(
                (prop_oneof![Just(-1i32), Just(1i32), Just(2i32)], -0.5f64..1.5),
                1..50,
            ),
        ) {
            let mut work = JobWork::new(len, two_pass, scan);
            let mut previous = 0.0f64;

            for (raw_pass, fraction) in events {
                if let Some(pass) = EncodePass::from_raw(raw_pass) {
                    work.apply_progress(pass, fraction);
                }
                let completed = work.completed_work();
                prop_assert!(completed >= previous,
                    "completed work regressed: {} -> {}", previous, completed);
                prop_assert!(completed <= work.cost + 1e-9,
                    "completed work {} exceeds cost {}", completed, work.cost);
                previous = completed;
            }
        }
    }

    #[test]
    fn test_cost_single_pass_no_scan() {
        assert_eq!(job_cost(1000.0, false, false), 1000.0);
    }

    #[test]
    fn test_cost_two_pass_with_scan() {
        // 600 + 600 + 600/30 = 1220
        let cost = job_cost(600.0, true, true);
        assert!((cost - 1220.0).abs() < 1e-9);
    }

    #[test]
    fn test_pass_progression_two_pass_with_scan() {
        let mut work = JobWork::new(600.0, true, true);
        assert!((work.cost - 1220.0).abs() < 1e-9);

        // Scan pass at 50%: 20 * 0.5 = 10
        work.apply_progress(EncodePass::SubtitleScan, 0.5);
        assert!((work.completed_work() - 10.0).abs() < 1e-9);

        // Pass 1 at 100%: 20 + 600 = 620
        work.apply_progress(EncodePass::First, 1.0);
        assert!((work.completed_work() - 620.0).abs() < 1e-9);

        // Pass 2 at 25%: 20 + 600 + 150 = 770
        work.apply_progress(EncodePass::Second, 0.25);
        assert!((work.completed_work() - 770.0).abs() < 1e-9);

        work.apply_progress(EncodePass::Second, 1.0);
        assert!((work.completed_work() - work.cost).abs() < 1e-9);
    }

    #[test]
    fn test_stale_event_does_not_regress() {
        let mut work = JobWork::new(100.0, false, false);

        work.apply_progress(EncodePass::First, 0.8);
        assert!((work.completed_work() - 80.0).abs() < 1e-9);

        // A stale, earlier event arrives late
        work.apply_progress(EncodePass::First, 0.3);
        assert!((work.completed_work() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_fraction_clamped() {
        let mut work = JobWork::new(100.0, false, false);
        work.apply_progress(EncodePass::First, 1.7);
        assert!((work.completed_work() - 100.0).abs() < 1e-9);

        let mut work = JobWork::new(100.0, false, false);
        work.apply_progress(EncodePass::First, -0.4);
        assert_eq!(work.completed_work(), 0.0);
    }

    #[test]
    fn test_pass_mapping() {
        assert_eq!(EncodePass::from_raw(-1), Some(EncodePass::SubtitleScan));
        assert_eq!(EncodePass::from_raw(1), Some(EncodePass::First));
        assert_eq!(EncodePass::from_raw(2), Some(EncodePass::Second));
        assert_eq!(EncodePass::from_raw(0), None);
        assert_eq!(EncodePass::from_raw(3), None);
    }

    #[test]
    fn test_zero_length_job() {
        let mut work = JobWork::new(0.0, true, true);
        assert_eq!(work.cost, 0.0);
        work.apply_progress(EncodePass::First, 0.5);
        assert_eq!(work.fraction_complete(), 0.0);
    }

    #[test]
    fn test_complete_fills_cost() {
        let mut work = JobWork::new(250.0, true, false);
        work.apply_progress(EncodePass::First, 0.4);
        work.complete();
        assert!((work.completed_work() - work.cost).abs() < 1e-9);
        assert!((work.fraction_complete() - 1.0).abs() < 1e-9);
    }
}
