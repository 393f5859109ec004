use std::{
    fmt::Display,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::{Duration, Instant},
};

use metrics::{counter, histogram};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::site::SiteKind;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle given to every tick. Tied to one subject and one `start` call.
#[derive(Debug, Clone)]
pub struct TickContext {
    subject_id: Arc<str>,
    generation: u64,
    current: Arc<AtomicU64>,
}

impl TickContext {
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// `false` once the controller was stopped or switched to another subject.
    ///
    /// Ticks must check this before publishing anything observable.
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.generation
    }

    #[cfg(test)]
    pub(crate) fn detached(subject_id: &str) -> Self {
        Self {
            subject_id: Arc::from(subject_id),
            generation: 1,
            current: Arc::new(AtomicU64::new(1)),
        }
    }

    #[cfg(test)]
    pub(crate) fn superseded(subject_id: &str) -> Self {
        Self {
            subject_id: Arc::from(subject_id),
            generation: 1,
            current: Arc::new(AtomicU64::new(2)),
        }
    }
}

struct ActivePoll {
    subject_id: Arc<str>,
    handle: JoinHandle<()>,
}

/// Owned, cancellable periodic refresh for one call site.
///
/// At most one subject is polled at a time and at most one tick is in flight.
pub struct PollingController {
    site: SiteKind,
    generation: Arc<AtomicU64>,
    active: Mutex<Option<ActivePoll>>,
}

impl PollingController {
    pub fn new(site: SiteKind) -> Self {
        Self {
            site,
            generation: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
        }
    }

    /// Starts polling `subject_id`: one tick right away, then one every `period`.
    ///
    /// A poll already running for any subject is cancelled first.
    pub fn start<F, Fut, E>(&self, subject_id: impl Into<String>, period: Duration, on_tick: F)
    where
        F: Fn(TickContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut active = self.lock_active();
        if let Some(previous) = active.take() {
            self.cancel(previous);
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let subject_id: Arc<str> = Arc::from(subject_id.into());
        let context = TickContext {
            subject_id: subject_id.clone(),
            generation,
            current: self.generation.clone(),
        };

        let handle = tokio::spawn(run_loop(
            self.site,
            period.max(MIN_PERIOD),
            context,
            on_tick,
        ));
        info!(
            stage = "poller",
            site = self.site.as_str(),
            subject = %subject_id,
            interval_secs = period.as_secs_f64(),
            "polling started"
        );

        *active = Some(ActivePoll { subject_id, handle });
    }

    /// Cancels the periodic trigger and any in-flight tick. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut active = self.lock_active();
        if let Some(previous) = active.take() {
            self.cancel(previous);
        }
    }

    /// Subject currently being polled, if any.
    pub fn subject_id(&self) -> Option<String> {
        self.lock_active()
            .as_ref()
            .map(|active| active.subject_id.to_string())
    }

    pub fn is_running(&self) -> bool {
        self.lock_active().is_some()
    }

    fn cancel(&self, previous: ActivePoll) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        previous.handle.abort();
        info!(
            stage = "poller",
            site = self.site.as_str(),
            subject = %previous.subject_id,
            "polling stopped"
        );
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActivePoll>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PollingController {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop<F, Fut, E>(site: SiteKind, period: Duration, context: TickContext, on_tick: F)
where
    F: Fn(TickContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if !context.is_current() {
            break;
        }

        counter!("safety_poll_ticks_total", "site" => site.as_str()).increment(1);
        let started = Instant::now();
        let fetch = on_tick(context.clone());
        tokio::pin!(fetch);

        let result = loop {
            tokio::select! {
                biased;
                result = &mut fetch => break result,
                _ = ticker.tick() => {
                    counter!("safety_poll_coalesced_total", "site" => site.as_str()).increment(1);
                    debug!(
                        stage = "poller",
                        site = site.as_str(),
                        subject = %context.subject_id,
                        "tick dropped while previous fetch is in flight"
                    );
                }
            }
        };

        histogram!("safety_fetch_seconds", "site" => site.as_str())
            .record(started.elapsed().as_secs_f64());

        if let Err(err) = result {
            counter!("safety_poll_failures_total", "site" => site.as_str()).increment(1);
            warn!(
                stage = "poller",
                site = site.as_str(),
                subject = %context.subject_id,
                error = %err,
                "poll tick failed"
            );
        }
    }
}
