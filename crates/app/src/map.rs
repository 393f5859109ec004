//! Location map view: current position, geo-fence membership and history.

use chrono::{DateTime, Utc};
use tracing::debug;

use placement_safety_api::WorkerLocationResponse;
use placement_safety_core::{
    aggregate, ingest_history, latest_check_in, parse_geo_fence, parse_snapshot, resolve,
    HistoryWindow, Thresholds,
};

use crate::site::SiteKind;
use crate::view::SubjectView;

pub fn derive_map_view(
    subject_id: &str,
    response: WorkerLocationResponse,
    days: u32,
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> SubjectView {
    let report = ingest_history(&response.location_history);
    let mut rejected = report.rejected.len();

    let current = response
        .current_location
        .as_ref()
        .and_then(|raw| match parse_snapshot(raw) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                rejected += 1;
                debug!(stage = "view", subject = subject_id, error = %err, "current location rejected");
                None
            }
        });
    let latest = current.or_else(|| report.history.latest().cloned());
    let geo_fence = response
        .geo_fence_status
        .as_ref()
        .and_then(|raw| match parse_geo_fence(raw) {
            Ok(fence) => {
                rejected += fence.dropped.len();
                for err in &fence.dropped {
                    debug!(stage = "view", subject = subject_id, error = %err, "geo-fence field dropped");
                }
                Some(fence.status)
            }
            Err(err) => {
                rejected += 1;
                debug!(stage = "view", subject = subject_id, error = %err, "geo-fence status rejected");
                None
            }
        });
    // This endpoint carries no check-in record; use the newest check-in ping instead.
    let last_check_in = latest_check_in(&report.history);

    // The backend bounds the history to `days`, so no local truncation here.
    let stats = aggregate(&report.history, &HistoryWindow::days(days).label);
    let status = resolve(
        latest.as_ref(),
        last_check_in.as_ref(),
        geo_fence.as_ref(),
        now,
        thresholds,
    );

    SubjectView {
        subject_id: subject_id.to_string(),
        site: SiteKind::Map,
        status,
        stats,
        latest,
        history: report.history,
        geo_fence,
        last_check_in,
        reported_status: None,
        reported_stats: response.stats,
        rejected_records: rejected,
        fetched_at: now,
        stale: false,
        last_error: None,
    }
}
