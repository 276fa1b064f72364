use sqlx::{postgres::PgPool, Postgres, QueryBuilder};
use usage_client::{db::statistics_queries, domain::StatisticPoint};

use super::{SeriesPoints, SinkError, StatisticsSink};

/// Statistics sink writing to QuestDB over the Postgres wire protocol.
///
/// Expected table:
/// `usage_statistics (ts TIMESTAMP, statistic_id SYMBOL, name STRING, source SYMBOL,
///  unit SYMBOL, state DOUBLE, sum DOUBLE) timestamp(ts)`
pub struct QuestDbStatisticsSink {
    pool: PgPool,
}

impl QuestDbStatisticsSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// One statement for the whole batch, so QuestDB applies all of it or none.
    async fn insert_batch(&self, batch: &[SeriesPoints<'_>]) -> Result<(), sqlx::Error> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO usage_statistics (ts, statistic_id, name, source, unit, state, sum) ",
        );

        let rows = batch
            .iter()
            .flat_map(|series| series.points.iter().map(move |p| (series.metadata, p)));

        builder.push_values(rows, |mut b, (metadata, p)| {
            b.push_bind(p.start)
                .push_bind(metadata.statistic_id.clone())
                .push_bind(metadata.name.clone())
                .push_bind(metadata.source.clone())
                .push_bind(metadata.unit_of_measurement.clone())
                .push_bind(p.state)
                .push_bind(p.sum);
        });

        let query = builder.build();
        query.execute(&self.pool).await.map(|_| ())
    }
}

#[async_trait::async_trait]
impl StatisticsSink for QuestDbStatisticsSink {
    async fn add_statistics_batch(&self, batch: &[SeriesPoints<'_>]) -> Result<(), SinkError> {
        let points: usize = batch.iter().map(|s| s.points.len()).sum();
        if points == 0 {
            return Ok(());
        }

        match self.insert_batch(batch).await {
            Ok(()) => {
                metrics::counter!("statistics_points_submitted_total").increment(points as u64);
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    series = batch.len(),
                    "questdb statistics insert failed"
                );
                metrics::counter!("statistics_sink_errors_total").increment(1);
                Err(SinkError::Write(e.to_string()))
            }
        }
    }

    async fn last_point(&self, statistic_id: &str) -> Result<Option<StatisticPoint>, SinkError> {
        statistics_queries::last_point(&self.pool, statistic_id)
            .await
            .map_err(|e| SinkError::Query(e.to_string()))
    }
}
