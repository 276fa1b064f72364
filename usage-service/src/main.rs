use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc};
use time::OffsetDateTime;
use usage_client::{
    api::{Credentials, HttpUsageClient},
    domain::StatisticPoint,
};
use usage_service::{
    config::{AppConfig, SinkKind, StatisticsConfig},
    coordinator::{CoordinatorSettings, Scheduler, TokioScheduler, UpdateCoordinator},
    http_server, observability,
    sensor::SensorSet,
    setup::{ConfigFlow, FlowResult, UserInput},
    sinks::{
        MemoryStatisticsSink, QuestDbIlpStatisticsSink, QuestDbStatisticsSink, SeriesPoints, SinkError, StatisticsSink,
    },
};

enum UsageStatisticsSink {
    Ilp(QuestDbIlpStatisticsSink),
    Pgwire(QuestDbStatisticsSink),
    Memory(MemoryStatisticsSink),
}

#[async_trait::async_trait]
impl StatisticsSink for UsageStatisticsSink {
    async fn add_statistics_batch(&self, batch: &[SeriesPoints<'_>]) -> Result<(), SinkError> {
        match self {
            Self::Ilp(s) => s.add_statistics_batch(batch).await,
            Self::Pgwire(s) => s.add_statistics_batch(batch).await,
            Self::Memory(s) => s.add_statistics_batch(batch).await,
        }
    }

    async fn last_point(&self, statistic_id: &str) -> Result<Option<StatisticPoint>, SinkError> {
        match self {
            Self::Ilp(s) => s.last_point(statistic_id).await,
            Self::Pgwire(s) => s.last_point(statistic_id).await,
            Self::Memory(s) => s.last_point(statistic_id).await,
        }
    }
}

async fn build_sink(cfg: &StatisticsConfig) -> Result<UsageStatisticsSink> {
    let questdb = cfg.questdb.as_ref();

    if !cfg.kind.can_read_back() {
        tracing::warn!(
            kind = ?cfg.kind,
            "statistics sink cannot be read back: running sums restart from zero after a restart"
        );
    }

    let sink = match cfg.kind {
        SinkKind::Pgwire => {
            let questdb = questdb.ok_or_else(|| anyhow::anyhow!("statistics.questdb is required for pgwire"))?;
            let uri = questdb
                .uri
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("statistics.questdb.uri is required for pgwire"))?;
            let pool = PgPoolOptions::new()
                .max_connections(questdb.max_connections)
                .connect(uri)
                .await?;
            UsageStatisticsSink::Pgwire(QuestDbStatisticsSink::new(pool))
        }
        SinkKind::Ilp => {
            let addr = questdb
                .and_then(|q| q.ilp_tcp_addr.as_deref())
                .ok_or_else(|| anyhow::anyhow!("statistics.questdb.ilp_tcp_addr is required for ilp"))?;
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid statistics.questdb.ilp_tcp_addr: {e}"))?;
            UsageStatisticsSink::Ilp(QuestDbIlpStatisticsSink::new(addr))
        }
        SinkKind::Memory => {
            tracing::warn!("statistics are kept in memory only and lost on exit");
            UsageStatisticsSink::Memory(MemoryStatisticsSink::new())
        }
    };

    Ok(sink)
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    if cfg.http.is_some() {
        http_server::install_metrics_recorder()?;
    }

    let utc_offset = cfg.schedule.utc_offset()?;
    let settings = CoordinatorSettings {
        device: cfg.account.device.clone(),
        daily_at: cfg.schedule.daily_at()?,
        interval: cfg.schedule.interval()?,
        utc_offset,
    };

    // Validate the account before anything is scheduled.
    let api_cfg = cfg.api.clone();
    let flow = ConfigFlow::new(move |creds: &Credentials| {
        HttpUsageClient::new(&api_cfg.base_url, creds.clone(), api_cfg.timeout())
    });
    let input = UserInput {
        name: cfg.account.name.clone(),
        credentials: cfg.account.credentials(),
    };
    let now = OffsetDateTime::now_utc().to_offset(utc_offset);
    let entry = match flow.step_user(Some(input), now).await {
        FlowResult::CreateEntry { title, entry } => {
            tracing::info!(%title, entry_id = %entry.entry_id, "account set up");
            entry
        }
        FlowResult::ShowForm { errors, .. } => {
            let code = errors.get("base").copied().unwrap_or("unknown");
            anyhow::bail!("account setup failed: {code}");
        }
    };

    let api = HttpUsageClient::new(&cfg.api.base_url, entry.credentials.clone(), cfg.api.timeout())?;
    let sink = build_sink(&cfg.statistics).await?;

    let coordinator = Arc::new(UpdateCoordinator::new(api, sink, settings));
    let sensors = Arc::new(SensorSet::new(&entry, coordinator.clone()));
    sensors.spawn_update_logger();

    if let Some(http_cfg) = &cfg.http {
        http_server::spawn(&http_cfg.bind_addr, sensors.clone())?;
    }

    let scheduler = Arc::new(TokioScheduler::new());
    let first_run = coordinator.start(scheduler.clone() as Arc<dyn Scheduler>);
    tracing::info!(%first_run, "usage service running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    scheduler.shutdown();

    Ok(())
}
