//! Family safety view: status, last check-in and the last day of locations.

use chrono::{DateTime, Utc};
use tracing::debug;

use placement_safety_api::FamilyStatusResponse;
use placement_safety_core::{
    aggregate_within, ingest_history, parse_check_in, parse_snapshot, resolve, HistoryWindow,
    Thresholds,
};

use crate::site::SiteKind;
use crate::view::SubjectView;

/// The family endpoint takes no window parameter; stats cover the last 24 hours.
pub fn family_window() -> HistoryWindow {
    HistoryWindow::hours(24)
}

pub fn derive_family_view(
    subject_id: &str,
    response: FamilyStatusResponse,
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> SubjectView {
    let report = ingest_history(&response.location_history);
    let mut rejected = report.rejected.len();

    let current = response
        .location
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

    let last_check_in = response
        .last_check_in
        .as_ref()
        .and_then(|raw| match parse_check_in(raw) {
            Ok(check_in) => Some(check_in),
            Err(err) => {
                rejected += 1;
                debug!(stage = "view", subject = subject_id, error = %err, "check-in record rejected");
                None
            }
        });

    let stats = aggregate_within(report.history.as_slice(), &family_window(), now);
    let status = resolve(
        latest.as_ref(),
        last_check_in.as_ref(),
        None,
        now,
        thresholds,
    );

    SubjectView {
        subject_id: subject_id.to_string(),
        site: SiteKind::Family,
        status,
        stats,
        latest,
        history: report.history,
        geo_fence: None,
        last_check_in,
        reported_status: response.status,
        reported_stats: None,
        rejected_records: rejected,
        fetched_at: now,
        stale: false,
        last_error: None,
    }
}
