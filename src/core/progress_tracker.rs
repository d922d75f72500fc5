//! Aggregate progress tracking
//!
//! Per-segment byte counts are merged into one total out of the playlist's
//! declared size and sampled on a fixed cadence. Each sample carries the
//! cumulative value and the bytes completed since the previous sample.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use crate::core::models::{DownloadProgress, SegmentProgress};

/// One progress sample: cumulative progress and the increment since the last sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    pub progress: DownloadProgress,
    pub delta: u64,
}

/// Merges per-segment progress into a single signal.
///
/// A segment's record never moves backwards: a retried request restarting
/// from zero keeps the bytes seen so far until it overtakes them. This keeps
/// the cumulative value monotonic so deltas sum to the final total.
#[derive(Debug)]
pub struct ProgressAggregator {
    total_size: u64,
    records: HashMap<String, SegmentProgress>,
    last_sampled: u64,
}

impl ProgressAggregator {
    pub fn new(total_size: u64) -> Self {
        Self {
            total_size,
            records: HashMap::new(),
            last_sampled: 0,
        }
    }

    /// Record bytes received so far for a segment
    pub fn update(&mut self, segment: &str, completed: u64, expected: Option<u64>) {
        let record = self.records.entry(segment.to_string()).or_default();
        record.completed = record.completed.max(completed);
        if expected.is_some() {
            record.expected = expected;
        }
    }

    /// Record a segment as complete with its final size on disk
    pub fn mark_finished(&mut self, segment: &str, size: u64) {
        let record = self.records.entry(segment.to_string()).or_default();
        *record = SegmentProgress::finished(size.max(record.completed));
    }

    /// Sum of completed bytes across all segments
    pub fn completed(&self) -> u64 {
        self.records
            .values()
            .fold(0u64, |acc, record| acc.saturating_add(record.completed))
    }

    pub fn progress(&self) -> DownloadProgress {
        DownloadProgress {
            completed: self.completed(),
            total: self.total_size,
        }
    }

    /// Take a sample and advance the delta baseline
    pub fn sample(&mut self) -> ProgressSample {
        let progress = self.progress();
        let delta = progress.completed.saturating_sub(self.last_sampled);
        self.last_sampled = progress.completed;

        debug!(
            "📊 Progress: {}/{} bytes ({:.1}%), +{}",
            progress.completed,
            progress.total,
            progress.fraction() * 100.0,
            delta
        );

        ProgressSample { progress, delta }
    }
}

/// Repeating sampler tick. The first tick fires one full period after creation.
pub fn progress_interval(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_reports_cumulative_and_delta() {
        let mut aggregator = ProgressAggregator::new(1000);

        aggregator.update("ts/a.ts", 100, Some(400));
        aggregator.update("ts/b.ts", 50, None);
        let first = aggregator.sample();
        assert_eq!(first.progress.completed, 150);
        assert_eq!(first.progress.total, 1000);
        assert_eq!(first.delta, 150);

        aggregator.update("ts/a.ts", 400, Some(400));
        let second = aggregator.sample();
        assert_eq!(second.progress.completed, 450);
        assert_eq!(second.delta, 300);

        let idle = aggregator.sample();
        assert_eq!(idle.delta, 0);
        assert_eq!(idle.progress.completed, 450);
    }

    #[test]
    fn test_restarted_segment_does_not_move_backwards() {
        let mut aggregator = ProgressAggregator::new(500);
        aggregator.update("ts/a.ts", 300, Some(500));
        aggregator.sample();

        // retry starts again from zero
        aggregator.update("ts/a.ts", 10, Some(500));
        let sample = aggregator.sample();
        assert_eq!(sample.progress.completed, 300);
        assert_eq!(sample.delta, 0);

        aggregator.mark_finished("ts/a.ts", 500);
        let sample = aggregator.sample();
        assert_eq!(sample.progress.completed, 500);
        assert_eq!(sample.delta, 200);
    }

    #[test]
    fn test_mark_finished_records_full_size() {
        let mut aggregator = ProgressAggregator::new(64);
        aggregator.update("ts/a.ts", 10, Some(64));
        aggregator.mark_finished("ts/a.ts", 64);
        aggregator.mark_finished("ts/b.ts", 32);

        assert_eq!(aggregator.completed(), 96);
        assert_eq!(aggregator.progress().total, 64);
    }

    #[tokio::test]
    async fn test_progress_interval_first_tick_after_period() {
        let period = Duration::from_millis(40);
        let started = Instant::now();
        let mut ticker = progress_interval(period);

        ticker.tick().await;
        assert!(started.elapsed() >= period);
    }
}
