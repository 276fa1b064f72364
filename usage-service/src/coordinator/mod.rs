pub mod schedule;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use time::{macros::format_description, OffsetDateTime, Time, UtcOffset};
use tokio::sync::{watch, Mutex};
use usage_client::{
    api::{ApiError, UsageApi},
    domain::{
        build_series, high_water_mark, parse_hourly_usage, DailyAggregate, HourlyUsageRecord, ParseError,
        StatisticPoint, StatisticSeries,
    },
};

use crate::{
    sinks::{SeriesPoints, SinkError, StatisticsSink},
    transform,
};
pub use schedule::{next_daily_boundary, Job, JobFuture, Scheduler, TokioScheduler};

/// The single "update failed" signal of a refresh cycle.
#[derive(thiserror::Error, Debug)]
pub enum CoordinatorError {
    #[error("error fetching data: {0}")]
    Fetch(#[from] ApiError),
    #[error("error fetching data: {0}")]
    Parse(#[from] ParseError),
    #[error("error fetching data: invalid usage record: {0}")]
    Validation(String),
    #[error("error fetching data: {0}")]
    Sink(#[from] SinkError),
    #[error("error fetching data: cannot build fetch window: {0}")]
    Window(String),
}

/// Date range requested from the usage API.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchWindow {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    /// `dd-mm-yyyy`
    pub start_date: String,
    /// `dd-mm-yyyy`
    pub end_date: String,
}

/// Two-day window ending yesterday: `end = now - 1 day`, `start = end - 1 day`.
pub fn lookback_window(now: OffsetDateTime) -> Result<FetchWindow, CoordinatorError> {
    let format = format_description!("[day]-[month]-[year]");
    let end = now - time::Duration::days(1);
    let start = end - time::Duration::days(1);

    let fmt = |ts: OffsetDateTime| ts.format(format).map_err(|e| CoordinatorError::Window(e.to_string()));

    Ok(FetchWindow {
        start_date: fmt(start)?,
        end_date: fmt(end)?,
        start,
        end,
    })
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Device part of the statistic ids.
    pub device: String,
    /// Local time of the first scheduled refresh.
    pub daily_at: Time,
    /// Cadence after the first scheduled refresh.
    pub interval: Duration,
    pub utc_offset: UtcOffset,
}

/// Last submitted point per statistic id.
type HighWaterMarks = HashMap<String, StatisticPoint>;

/// Fetches hourly usage on a schedule, feeds the statistics sink and holds the
/// latest `DailyAggregate` for sensors.
pub struct UpdateCoordinator<A, K> {
    api: A,
    sink: K,
    settings: CoordinatorSettings,
    series: Vec<StatisticSeries>,
    snapshot: watch::Sender<Option<DailyAggregate>>,
    last_update_success: AtomicBool,
    // Held for the whole cycle: refreshes never overlap.
    in_flight: Mutex<HighWaterMarks>,
}

impl<A, K> UpdateCoordinator<A, K>
where
    A: UsageApi + 'static,
    K: StatisticsSink + 'static,
{
    pub fn new(api: A, sink: K, settings: CoordinatorSettings) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            api,
            sink,
            series: StatisticSeries::for_device(&settings.device),
            settings,
            snapshot,
            last_update_success: AtomicBool::new(false),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Latest successfully computed aggregate, `None` before the first success.
    pub fn latest(&self) -> Option<DailyAggregate> {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified each time a new aggregate is published.
    pub fn subscribe(&self) -> watch::Receiver<Option<DailyAggregate>> {
        self.snapshot.subscribe()
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::SeqCst)
    }

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.settings.utc_offset)
    }

    /// Register the schedule and kick off an immediate refresh.
    ///
    /// The first scheduled run lands on the next `daily_at` boundary; from that
    /// run onwards a fixed `interval` cadence takes over. Returns the instant of
    /// the first scheduled run.
    pub fn start(self: &Arc<Self>, scheduler: Arc<dyn Scheduler>) -> OffsetDateTime {
        self.start_at(self.now(), scheduler)
    }

    pub fn start_at(self: &Arc<Self>, now: OffsetDateTime, scheduler: Arc<dyn Scheduler>) -> OffsetDateTime {
        let first_run = next_daily_boundary(now, self.settings.daily_at);
        let interval = self.settings.interval;
        let refresh = self.refresh_job();

        let first_run_job: Job = {
            let scheduler = scheduler.clone();
            let refresh = refresh.clone();
            Arc::new(move || -> JobFuture {
                let scheduler = scheduler.clone();
                let refresh = refresh.clone();
                Box::pin(async move {
                    tracing::info!(interval_secs = interval.as_secs(), "first scheduled refresh, switching to fixed interval");
                    scheduler.run_every(interval, refresh.clone());
                    refresh().await;
                })
            })
        };

        tracing::info!(first_run = %first_run, "scheduling usage refresh");
        scheduler.run_at(first_run, first_run_job);
        // Data right away rather than at the first boundary.
        scheduler.run_now(refresh);

        first_run
    }

    fn refresh_job(self: &Arc<Self>) -> Job {
        let this = Arc::clone(self);
        Arc::new(move || -> JobFuture {
            let this = this.clone();
            Box::pin(async move {
                // Failures are logged and counted inside `refresh`.
                let _ = this.refresh().await;
            })
        })
    }

    /// Run one fetch-aggregate-submit cycle for the window ending yesterday.
    pub async fn refresh(&self) -> Result<DailyAggregate, CoordinatorError> {
        self.refresh_at(self.now()).await
    }

    pub async fn refresh_at(&self, now: OffsetDateTime) -> Result<DailyAggregate, CoordinatorError> {
        let mut marks = self.in_flight.lock().await;
        let started = Instant::now();
        metrics::counter!("usage_refresh_total").increment(1);

        let result = self.run_cycle(now, &mut marks).await;
        metrics::histogram!("usage_refresh_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(aggregate) => {
                self.last_update_success.store(true, Ordering::SeqCst);
                self.snapshot.send_replace(Some(aggregate.clone()));
                tracing::info!(
                    total_kwh = aggregate.total_kwh(),
                    total_cost = aggregate.total_cost(),
                    reference = %aggregate.timestamp,
                    "usage aggregate updated"
                );
                Ok(aggregate)
            }
            Err(e) => {
                self.last_update_success.store(false, Ordering::SeqCst);
                metrics::counter!("usage_refresh_failed_total").increment(1);
                tracing::error!(error = %e, "usage refresh failed, keeping previous aggregate");
                Err(e)
            }
        }
    }

    async fn run_cycle(
        &self,
        now: OffsetDateTime,
        marks: &mut HighWaterMarks,
    ) -> Result<DailyAggregate, CoordinatorError> {
        let window = lookback_window(now)?;
        tracing::debug!(start = %window.start_date, end = %window.end_date, "requesting hourly usage");

        let response = self
            .api
            .get_hourly_usage(&window.start_date, &window.end_date)
            .await?;

        let aggregate = DailyAggregate::from_entries(&response.energy_usage, window.end);

        let records = parse_hourly_usage(Some(response.energy_usage.as_slice()))?;
        transform::validate_batch(&records)?;

        self.submit_statistics(&records, marks).await?;

        Ok(aggregate)
    }

    async fn high_water(
        &self,
        series: &StatisticSeries,
        marks: &mut HighWaterMarks,
    ) -> Result<Option<StatisticPoint>, CoordinatorError> {
        if let Some(p) = marks.get(series.id()) {
            return Ok(Some(*p));
        }

        let stored = self.sink.last_point(series.id()).await?;
        if let Some(p) = stored {
            marks.insert(series.id().to_string(), p);
        }
        Ok(stored)
    }

    async fn submit_statistics(
        &self,
        records: &[HourlyUsageRecord],
        marks: &mut HighWaterMarks,
    ) -> Result<(), CoordinatorError> {
        if records.is_empty() {
            tracing::debug!("no valid data to process");
            return Ok(());
        }

        // Every series is built before anything is written.
        let mut batch = Vec::with_capacity(self.series.len());
        for series in &self.series {
            let last = self.high_water(series, marks).await?;
            let points = build_series(series.tier, records, last.as_ref());
            if points.is_empty() {
                tracing::debug!(statistic_id = %series.id(), "no new periods to submit");
                continue;
            }
            tracing::debug!(
                statistic_id = %series.id(),
                records = points.len(),
                "adding statistics data"
            );
            batch.push(SeriesPoints {
                metadata: &series.metadata,
                points,
            });
        }

        if batch.is_empty() {
            return Ok(());
        }

        // One call for every tier: the sink stores all of them or none.
        self.sink.add_statistics_batch(&batch).await?;

        for series in &batch {
            if let Some(mark) = high_water_mark(&series.points) {
                marks.insert(series.statistic_id().to_string(), mark);
            }
        }

        Ok(())
    }
}
