pub mod memory;
pub mod questdb;
pub mod questdb_ilp;

pub use memory::MemoryStatisticsSink;
pub use questdb::QuestDbStatisticsSink;
pub use questdb_ilp::QuestDbIlpStatisticsSink;

use usage_client::domain::{StatisticMetadata, StatisticPoint};

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("statistics sink connect failed: {0}")]
    Connect(String),
    #[error("statistics sink write failed: {0}")]
    Write(String),
    #[error("statistics sink query failed: {0}")]
    Query(String),
}

/// Points of one series within a cycle's submission.
#[derive(Debug, Clone)]
pub struct SeriesPoints<'a> {
    pub metadata: &'a StatisticMetadata,
    pub points: Vec<StatisticPoint>,
}

impl SeriesPoints<'_> {
    pub fn statistic_id(&self) -> &str {
        &self.metadata.statistic_id
    }
}

/// Long-term store for statistic series.
///
/// The store owns merge semantics for a series id; callers only ever append
/// points newer than `last_point`.
#[async_trait::async_trait]
pub trait StatisticsSink: Send + Sync {
    /// Store every series of `batch` or none of them.
    async fn add_statistics_batch(&self, batch: &[SeriesPoints<'_>]) -> Result<(), SinkError>;

    async fn add_statistics(
        &self,
        metadata: &StatisticMetadata,
        points: &[StatisticPoint],
    ) -> Result<(), SinkError> {
        self.add_statistics_batch(&[SeriesPoints {
            metadata,
            points: points.to_vec(),
        }])
        .await
    }

    /// Latest point stored for `statistic_id`, or `None` when the store is
    /// empty for it or cannot be read back.
    async fn last_point(&self, statistic_id: &str) -> Result<Option<StatisticPoint>, SinkError>;
}

#[async_trait::async_trait]
impl<T: StatisticsSink + ?Sized> StatisticsSink for std::sync::Arc<T> {
    async fn add_statistics_batch(&self, batch: &[SeriesPoints<'_>]) -> Result<(), SinkError> {
        (**self).add_statistics_batch(batch).await
    }

    async fn last_point(&self, statistic_id: &str) -> Result<Option<StatisticPoint>, SinkError> {
        (**self).last_point(statistic_id).await
    }
}
