use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info};

use placement_safety_api::{SafetyApiClient, SafetyApiError};
use placement_safety_core::{HistoryWindow, Thresholds};

use crate::family::{derive_family_view, family_window};
use crate::map::derive_map_view;
use crate::poller::{PollingController, TickContext};
use crate::view::{SubjectView, ViewHandle};

/// The two consuming views of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteKind {
    Family,
    Map,
}

impl SiteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Family => "family",
            Self::Map => "map",
        }
    }
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "family" => Ok(Self::Family),
            "map" => Ok(Self::Map),
            other => Err(format!("unknown site `{other}`")),
        }
    }
}

/// Fetch-and-derive step shared by both sites.
pub struct Pipeline {
    client: SafetyApiClient,
    thresholds: Thresholds,
    map_history_days: u32,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl Pipeline {
    pub fn new(client: SafetyApiClient, thresholds: Thresholds, map_history_days: u32) -> Self {
        Self {
            client,
            thresholds,
            map_history_days,
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Runs one poll tick for `kind` and publishes the outcome into `view`.
    ///
    /// Nothing is published once `ctx` is no longer current. A missing subject
    /// yields an `unknown` view; other failures keep the last view and flag it
    /// stale before the error is handed back to the poller.
    pub async fn refresh(
        &self,
        kind: SiteKind,
        ctx: &TickContext,
        view: &ViewHandle,
    ) -> Result<(), SafetyApiError> {
        let subject_id = ctx.subject_id();
        let outcome = match kind {
            SiteKind::Family => self
                .client
                .family_status(subject_id)
                .await
                .map(|response| {
                    derive_family_view(subject_id, response, self.now(), &self.thresholds)
                }),
            SiteKind::Map => self
                .client
                .worker_location(subject_id, self.map_history_days)
                .await
                .map(|response| {
                    derive_map_view(
                        subject_id,
                        response,
                        self.map_history_days,
                        self.now(),
                        &self.thresholds,
                    )
                }),
        };

        match outcome {
            Ok(next) => {
                let rejected = next.rejected_records;
                let level = next.status.level;
                let rule = next.status.rule;
                if !view.publish_current(ctx, next) {
                    discarded(kind, subject_id);
                    return Ok(());
                }
                if rejected > 0 {
                    counter!("safety_snapshots_rejected_total", "site" => kind.as_str())
                        .increment(rejected as u64);
                }
                debug!(
                    stage = "pipeline",
                    site = kind.as_str(),
                    subject = subject_id,
                    level = level.as_str(),
                    rule = rule.as_str(),
                    "view refreshed"
                );
                Ok(())
            }
            Err(SafetyApiError::NotFound) => {
                if view.publish_current(ctx, self.placeholder(kind, subject_id)) {
                    info!(stage = "pipeline", site = kind.as_str(), subject = subject_id, "subject has no safety data");
                } else {
                    discarded(kind, subject_id);
                }
                Ok(())
            }
            Err(err) => {
                let marked = view.mark_stale(ctx, err.to_string(), || {
                    self.placeholder(kind, subject_id)
                });
                if marked {
                    Err(err)
                } else {
                    discarded(kind, subject_id);
                    Ok(())
                }
            }
        }
    }

    fn placeholder(&self, kind: SiteKind, subject_id: &str) -> SubjectView {
        let period = match kind {
            SiteKind::Family => family_window().label,
            SiteKind::Map => HistoryWindow::days(self.map_history_days).label,
        };
        SubjectView::no_data(subject_id, kind, &period, self.now(), &self.thresholds)
    }
}

fn discarded(kind: SiteKind, subject_id: &str) {
    debug!(stage = "pipeline", site = kind.as_str(), subject = subject_id, "discarding result for superseded subject");
}

/// One call site: its poller, its published view and its cadence.
pub struct Site {
    kind: SiteKind,
    controller: PollingController,
    view: ViewHandle,
    pipeline: Arc<Pipeline>,
    interval: Duration,
    switch: Mutex<()>,
}

impl Site {
    pub fn new(kind: SiteKind, pipeline: Arc<Pipeline>, interval: Duration) -> Self {
        Self {
            kind,
            controller: PollingController::new(kind),
            view: ViewHandle::new(),
            pipeline,
            interval,
            switch: Mutex::new(()),
        }
    }

    pub fn kind(&self) -> SiteKind {
        self.kind
    }

    /// Switches this site to `subject_id`, dropping whatever was shown before.
    pub fn watch(&self, subject_id: &str) {
        let _switch = self.lock_switch();
        self.controller.stop();
        self.view.clear();

        let kind = self.kind;
        let pipeline = self.pipeline.clone();
        let view = self.view.clone();
        self.controller
            .start(subject_id, self.interval, move |ctx: TickContext| {
                let pipeline = pipeline.clone();
                let view = view.clone();
                async move { pipeline.refresh(kind, &ctx, &view).await }
            });
    }

    pub fn unwatch(&self) {
        let _switch = self.lock_switch();
        self.controller.stop();
        self.view.clear();
    }

    /// Latest view, provided it belongs to the subject currently watched.
    pub fn current_view(&self) -> Option<Arc<SubjectView>> {
        let subject_id = self.controller.subject_id()?;
        self.view
            .current()
            .filter(|view| view.subject_id == subject_id)
    }

    #[cfg(test)]
    pub fn view(&self) -> &ViewHandle {
        &self.view
    }

    pub fn is_watching(&self) -> bool {
        self.controller.is_running()
    }

    pub fn subject_id(&self) -> Option<String> {
        self.controller.subject_id()
    }

    fn lock_switch(&self) -> MutexGuard<'_, ()> {
        self.switch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
