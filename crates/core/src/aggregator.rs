use chrono::{DateTime, Utc};

use crate::snapshot::LocationSnapshot;
use crate::types::{AggregateStats, CheckIn, HistoryWindow, LocationHistory};

/// Reduces a history into summary statistics labelled with `window_label`.
///
/// Never fails: an empty history yields zero counts and no average accuracy.
pub fn aggregate(history: &LocationHistory, window_label: &str) -> AggregateStats {
    summarize(history.as_slice(), window_label)
}

/// Re-sorts the readings newest first, drops those older than the window and aggregates the rest.
pub fn aggregate_within(
    snapshots: &[LocationSnapshot],
    window: &HistoryWindow,
    now: DateTime<Utc>,
) -> AggregateStats {
    let mut history = LocationHistory::from_unordered(snapshots.to_vec());
    history.retain_since(now - window.duration);
    summarize(history.as_slice(), &window.label)
}

/// Newest check-in tagged reading, for endpoints without an explicit check-in record.
pub fn latest_check_in(history: &LocationHistory) -> Option<CheckIn> {
    history
        .iter()
        .find(|snapshot| snapshot.event_type().is_check_in())
        .map(|snapshot| CheckIn {
            timestamp: snapshot.timestamp(),
            status: None,
        })
}

fn summarize(snapshots: &[LocationSnapshot], window_label: &str) -> AggregateStats {
    let (accuracy_sum, accuracy_count) = snapshots
        .iter()
        .filter_map(LocationSnapshot::accuracy)
        .fold((0.0_f64, 0_usize), |(sum, count), value| {
            (sum + value, count + 1)
        });

    let avg_accuracy = (accuracy_count > 0).then(|| accuracy_sum / accuracy_count as f64);
    let active_violations = snapshots
        .iter()
        .filter(|snapshot| snapshot.event_type().is_fence_violation())
        .count();

    AggregateStats {
        total_updates: snapshots.len(),
        avg_accuracy,
        active_violations,
        period: window_label.to_string(),
    }
}
