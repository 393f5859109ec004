use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use placement_safety_api::ReportedStatus;
use placement_safety_core::{
    aggregate, resolve, AggregateStats, CheckIn, GeoFenceStatus, LocationHistory,
    LocationSnapshot, SafetyStatus, Thresholds,
};

use crate::poller::TickContext;
use crate::site::SiteKind;

/// Everything the presentation layer needs for one watched subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectView {
    pub subject_id: String,
    pub site: SiteKind,
    pub status: SafetyStatus,
    pub stats: AggregateStats,
    pub latest: Option<LocationSnapshot>,
    pub history: LocationHistory,
    pub geo_fence: Option<GeoFenceStatus>,
    pub last_check_in: Option<CheckIn>,
    /// Backend-computed status, family view only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_status: Option<ReportedStatus>,
    /// Backend-computed statistics, map view only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_stats: Option<Value>,
    pub rejected_records: usize,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
    pub last_error: Option<String>,
}

impl SubjectView {
    /// View for a subject the backend has no data for.
    pub fn no_data(
        subject_id: &str,
        site: SiteKind,
        period: &str,
        now: DateTime<Utc>,
        thresholds: &Thresholds,
    ) -> Self {
        let history = LocationHistory::default();
        Self {
            subject_id: subject_id.to_string(),
            site,
            status: resolve(None, None, None, now, thresholds),
            stats: aggregate(&history, period),
            latest: None,
            history,
            geo_fence: None,
            last_check_in: None,
            reported_status: None,
            reported_stats: None,
            rejected_records: 0,
            fetched_at: now,
            stale: false,
            last_error: None,
        }
    }
}

/// Latest view of one site. Every update replaces the whole value.
#[derive(Clone)]
pub struct ViewHandle {
    sender: Arc<watch::Sender<Option<Arc<SubjectView>>>>,
}

impl ViewHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn current(&self) -> Option<Arc<SubjectView>> {
        self.sender.borrow().clone()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<SubjectView>>> {
        self.sender.subscribe()
    }

    /// Publishes `view` unless `ctx` has been superseded.
    ///
    /// The generation check runs under the channel lock, so once a controller
    /// is stopped and the view cleared, no tick of the old generation can land.
    pub fn publish_current(&self, ctx: &TickContext, view: SubjectView) -> bool {
        let next = Arc::new(view);
        self.sender.send_if_modified(|slot| {
            if !ctx.is_current() {
                return false;
            }
            *slot = Some(next);
            true
        })
    }

    /// Keeps the last good view of the tick's subject but flags it stale.
    ///
    /// Falls back to `placeholder` when nothing was loaded for this subject yet.
    /// Does nothing once `ctx` has been superseded.
    pub fn mark_stale(
        &self,
        ctx: &TickContext,
        error: String,
        placeholder: impl FnOnce() -> SubjectView,
    ) -> bool {
        self.sender.send_if_modified(|slot| {
            if !ctx.is_current() {
                return false;
            }
            let base = match slot.as_deref() {
                Some(view) if view.subject_id == ctx.subject_id() => view.clone(),
                _ => placeholder(),
            };
            *slot = Some(Arc::new(SubjectView {
                stale: true,
                last_error: Some(error),
                ..base
            }));
            true
        })
    }

    pub fn clear(&self) {
        self.sender.send_replace(None);
    }
}

impl Default for ViewHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::TimeZone;
    use placement_safety_core::SafetyLevel;
    use tokio::sync::mpsc;

    use crate::poller::PollingController;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn view(subject: &str) -> SubjectView {
        SubjectView::no_data(subject, SiteKind::Family, "24h", now(), &Thresholds::default())
    }

    #[test]
    fn no_data_view_is_unknown() {
        let view = view("w-1");
        assert_eq!(view.status.level, SafetyLevel::Unknown);
        assert_eq!(view.stats.total_updates, 0);
        assert_eq!(view.stats.avg_accuracy, None);
        assert!(!view.stale);
    }

    #[test]
    fn stale_marking_keeps_previous_data() {
        let handle = ViewHandle::new();
        let ctx = TickContext::detached("w-1");
        let mut good = view("w-1");
        good.rejected_records = 4;
        assert!(handle.publish_current(&ctx, good.clone()));

        assert!(handle.mark_stale(&ctx, "timeout".to_string(), || view("w-1")));

        let current = handle.current().expect("view");
        assert!(current.stale);
        assert_eq!(current.last_error.as_deref(), Some("timeout"));
        assert_eq!(current.rejected_records, 4);
        assert_eq!(current.fetched_at, good.fetched_at);
    }

    #[test]
    fn stale_marking_ignores_other_subjects() {
        let handle = ViewHandle::new();
        let mut other = view("w-other");
        other.rejected_records = 9;
        handle.publish_current(&TickContext::detached("w-other"), other);

        handle.mark_stale(&TickContext::detached("w-1"), "timeout".to_string(), || {
            view("w-1")
        });

        let current = handle.current().expect("view");
        assert_eq!(current.subject_id, "w-1");
        assert_eq!(current.rejected_records, 0);
        assert!(current.stale);
    }

    #[test]
    fn superseded_ticks_change_nothing() {
        let handle = ViewHandle::new();
        let old = TickContext::superseded("w-1");

        assert!(!handle.publish_current(&old, view("w-1")));
        assert!(handle.current().is_none());

        handle.publish_current(&TickContext::detached("w-2"), view("w-2"));
        assert!(!handle.mark_stale(&old, "late".to_string(), || view("w-1")));
        let current = handle.current().expect("view");
        assert_eq!(current.subject_id, "w-2");
        assert!(!current.stale);
    }

    #[test]
    fn updates_replace_instead_of_mutating() {
        let handle = ViewHandle::new();
        let ctx = TickContext::detached("w-1");
        let mut receiver = handle.subscribe();
        handle.publish_current(&ctx, view("w-1"));
        let first = handle.current().expect("first");

        handle.mark_stale(&ctx, "boom".to_string(), || view("w-1"));

        assert!(!first.stale);
        assert!(receiver.has_changed().expect("sender alive"));
        assert!(receiver.borrow_and_update().as_ref().expect("view").stale);

        handle.clear();
        assert!(handle.current().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cleared_view_stays_clear_after_cancellation() {
        let controller = PollingController::new(SiteKind::Map);
        let handle = ViewHandle::new();
        let (started_tx, mut started_rx) = mpsc::unbounded_channel::<()>();

        let publisher = handle.clone();
        controller.start("w-1", Duration::from_secs(60), move |ctx: TickContext| {
            let publisher = publisher.clone();
            let started = started_tx.clone();
            async move {
                let _ = started.send(());
                // No await point: abort cannot interrupt this loop, only the generation can.
                while publisher.publish_current(&ctx, view(ctx.subject_id())) {}
                Ok::<(), String>(())
            }
        });

        started_rx.recv().await.expect("tick started");
        controller.stop();
        handle.clear();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.current().is_none());
    }
}
