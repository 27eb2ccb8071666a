// Progress reporting shared between a runner and the coordinator

use crate::models::Progress;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// Collects progress reports from a runner.
/// Reports only touch memory; the coordinator persists the latest snapshot
/// at most once per flush interval.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    inner: Arc<Mutex<ProgressState>>,
}

#[derive(Debug)]
struct ProgressState {
    progress: Progress,
    dirty: bool,
    started_at: DateTime<Utc>,
}

impl ProgressSink {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProgressState {
                progress: Progress::default(),
                dirty: false,
                started_at,
            })),
        }
    }

    /// Record a report. Counts never move backwards; percent and ETA are derived.
    pub fn report(&self, current_item: Option<&str>, processed: u64, total: Option<u64>) {
        let now = Utc::now();
        let mut state = self.inner.lock();
        let started_at = state.started_at;
        let progress = &mut state.progress;

        let processed = processed.max(progress.processed_items);
        let total = match (progress.total_items, total) {
            (Some(prev), Some(next)) => Some(prev.max(next)),
            (prev, next) => next.or(prev),
        };

        progress.processed_items = processed;
        progress.total_items = total;
        if let Some(item) = current_item {
            progress.current_item = Some(item.to_string());
        }
        progress.progress_percent = total
            .filter(|t| *t > 0)
            .map(|t| (processed as f64 / t as f64 * 100.0).min(100.0));
        progress.estimated_end_time = estimate_end(started_at, now, processed, total);
        progress.updated_at = Some(now);
        state.dirty = true;
    }

    pub fn snapshot(&self) -> Progress {
        self.inner.lock().progress.clone()
    }

    /// Latest snapshot if anything changed since the last call
    pub(crate) fn take_dirty(&self) -> Option<Progress> {
        let mut state = self.inner.lock();
        if !state.dirty {
            return None;
        }
        state.dirty = false;
        Some(state.progress.clone())
    }
}

fn estimate_end(
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
    processed: u64,
    total: Option<u64>,
) -> Option<DateTime<Utc>> {
    let total = total?;
    if processed == 0 {
        return None;
    }
    if processed >= total {
        return Some(now);
    }
    let elapsed_ms = (now - started_at).num_milliseconds().max(0) as f64;
    let remaining_ms = elapsed_ms * (total - processed) as f64 / processed as f64;
    Some(now + Duration::milliseconds(remaining_ms as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_are_monotonic() {
        let sink = ProgressSink::new(Utc::now());
        sink.report(Some("row 10"), 10, Some(100));
        sink.report(None, 4, Some(50));

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.processed_items, 10);
        assert_eq!(snapshot.total_items, Some(100));
        assert_eq!(snapshot.current_item.as_deref(), Some("row 10"));
        assert_eq!(snapshot.progress_percent, Some(10.0));
    }

    #[test]
    fn test_percent_is_capped() {
        let sink = ProgressSink::new(Utc::now());
        sink.report(None, 12, Some(10));
        assert_eq!(sink.snapshot().progress_percent, Some(100.0));
    }

    #[test]
    fn test_unknown_total_has_no_percent_or_eta() {
        let sink = ProgressSink::new(Utc::now());
        sink.report(Some("scan"), 3, None);
        let snapshot = sink.snapshot();
        assert_eq!(snapshot.progress_percent, None);
        assert_eq!(snapshot.estimated_end_time, None);
    }

    #[test]
    fn test_eta_extrapolates_elapsed_time() {
        let started = Utc::now() - Duration::seconds(10);
        let sink = ProgressSink::new(started);
        sink.report(None, 25, Some(100));
        let eta = sink.snapshot().estimated_end_time.unwrap();
        let remaining = eta - Utc::now();
        // 10s for a quarter of the work leaves roughly 30s
        assert!(remaining > Duration::seconds(28));
        assert!(remaining < Duration::seconds(32));
    }

    #[test]
    fn test_dirty_flag_coalesces_reports() {
        let sink = ProgressSink::new(Utc::now());
        assert!(sink.take_dirty().is_none());
        sink.report(None, 1, Some(3));
        sink.report(None, 2, Some(3));
        let flushed = sink.take_dirty().unwrap();
        assert_eq!(flushed.processed_items, 2);
        assert!(sink.take_dirty().is_none());
    }
}
