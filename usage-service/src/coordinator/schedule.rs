use std::{sync::Arc, sync::Mutex, time::Duration};

use futures::future::BoxFuture;
use time::{OffsetDateTime, Time};
use tokio::{task::JoinHandle, time::MissedTickBehavior};

pub type JobFuture = BoxFuture<'static, ()>;

/// A unit of scheduled work. Called once per firing.
pub type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Timer registrations the coordinator needs, independent of the runtime.
pub trait Scheduler: Send + Sync {
    /// Run `job` once, as soon as possible.
    fn run_now(&self, job: Job);

    /// Run `job` once at the absolute instant `at` (immediately if it has passed).
    fn run_at(&self, at: OffsetDateTime, job: Job);

    /// Run `job` every `period`, the first time one period from now.
    fn run_every(&self, period: Duration, job: Job);
}

/// Next occurrence of the local wall-clock time `at`, in the offset of `now`.
///
/// Today's occurrence is used unless `now` is already past it.
pub fn next_daily_boundary(now: OffsetDateTime, at: Time) -> OffsetDateTime {
    let today = now.replace_time(at);
    if now > today {
        today + time::Duration::days(1)
    } else {
        today
    }
}

/// `Scheduler` backed by spawned tokio tasks.
#[derive(Default)]
pub struct TokioScheduler {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut handles) = self.handles.lock() {
            handles.retain(|h| !h.is_finished());
            handles.push(handle);
        }
    }

    /// Abort every timer registered through this scheduler.
    pub fn shutdown(&self) {
        if let Ok(mut handles) = self.handles.lock() {
            for h in handles.drain(..) {
                h.abort();
            }
        }
    }
}

impl Scheduler for TokioScheduler {
    fn run_now(&self, job: Job) {
        self.track(tokio::spawn(async move { job().await }));
    }

    fn run_at(&self, at: OffsetDateTime, job: Job) {
        let delay = Duration::try_from(at - OffsetDateTime::now_utc()).unwrap_or(Duration::ZERO);
        tracing::debug!(at = %at, delay_secs = delay.as_secs(), "scheduling one-shot job");

        self.track(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job().await;
        }));
    }

    fn run_every(&self, period: Duration, job: Job) {
        tracing::debug!(period_secs = period.as_secs(), "scheduling recurring job");

        self.track(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                job().await;
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::{datetime, time};

    #[test]
    fn boundary_later_today_is_used() {
        let now = datetime!(2024-07-02 00:10:00 -7);

        assert_eq!(next_daily_boundary(now, time!(00:30)), datetime!(2024-07-02 00:30:00 -7));
    }

    #[test]
    fn boundary_already_passed_moves_to_tomorrow() {
        let now = datetime!(2024-07-02 13:45:00 -7);

        assert_eq!(next_daily_boundary(now, time!(00:30)), datetime!(2024-07-03 00:30:00 -7));
    }

    #[test]
    fn boundary_exactly_now_is_today() {
        let now = datetime!(2024-07-02 00:30:00 UTC);

        assert_eq!(next_daily_boundary(now, time!(00:30)), now);
    }

    #[test]
    fn boundary_rolls_over_month_end() {
        let now = datetime!(2024-07-31 23:00:00 UTC);

        assert_eq!(next_daily_boundary(now, time!(00:30)), datetime!(2024-08-01 00:30:00 UTC));
    }

    fn counting_job(counter: Arc<AtomicUsize>) -> Job {
        Arc::new(move || -> JobFuture {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn run_now_and_past_run_at_fire_promptly() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.run_now(counting_job(counter.clone()));
        scheduler.run_at(
            OffsetDateTime::now_utc() - time::Duration::minutes(1),
            counting_job(counter.clone()),
        );

        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_aborts_pending_jobs() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.run_every(Duration::from_millis(20), counting_job(counter.clone()));
        scheduler.shutdown();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
