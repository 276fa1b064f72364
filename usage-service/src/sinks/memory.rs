use std::collections::BTreeMap;

use tokio::sync::Mutex;
use usage_client::domain::{StatisticMetadata, StatisticPoint};

use super::{SeriesPoints, SinkError, StatisticsSink};

/// Keeps every submitted series in process memory. Used for dry runs
/// (`statistics.kind = "memory"`) and tests.
#[derive(Default)]
pub struct MemoryStatisticsSink {
    series: Mutex<BTreeMap<String, StoredSeries>>,
}

#[derive(Debug, Clone)]
pub struct StoredSeries {
    pub metadata: StatisticMetadata,
    pub points: Vec<StatisticPoint>,
    /// Number of submissions that carried the series.
    pub submissions: usize,
}

impl MemoryStatisticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn series(&self, statistic_id: &str) -> Option<StoredSeries> {
        self.series.lock().await.get(statistic_id).cloned()
    }

    pub async fn total_submissions(&self) -> usize {
        self.series.lock().await.values().map(|s| s.submissions).sum()
    }
}

#[async_trait::async_trait]
impl StatisticsSink for MemoryStatisticsSink {
    async fn add_statistics_batch(&self, batch: &[SeriesPoints<'_>]) -> Result<(), SinkError> {
        let mut guard = self.series.lock().await;

        for series in batch {
            let entry = guard
                .entry(series.statistic_id().to_string())
                .or_insert_with(|| StoredSeries {
                    metadata: series.metadata.clone(),
                    points: Vec::new(),
                    submissions: 0,
                });

            entry.metadata = series.metadata.clone();
            entry.submissions += 1;
            for p in &series.points {
                // Same period submitted again replaces the stored one.
                match entry.points.iter_mut().find(|q| q.start == p.start) {
                    Some(existing) => *existing = *p,
                    None => entry.points.push(*p),
                }
            }
            entry.points.sort_by_key(|p| p.start);
        }

        Ok(())
    }

    async fn last_point(&self, statistic_id: &str) -> Result<Option<StatisticPoint>, SinkError> {
        Ok(self
            .series
            .lock()
            .await
            .get(statistic_id)
            .and_then(|s| s.points.last().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn metadata() -> StatisticMetadata {
        StatisticMetadata {
            statistic_id: "salt_river_project:home_on_peak_usage".to_string(),
            name: "On Peak Usage".to_string(),
            source: "salt_river_project".to_string(),
            unit_of_measurement: "kWh".to_string(),
            has_mean: false,
            has_sum: true,
        }
    }

    #[tokio::test]
    async fn merges_points_by_period_and_reports_last() {
        let sink = MemoryStatisticsSink::new();
        let first = StatisticPoint {
            start: datetime!(2024-07-01 00:00:00 UTC),
            state: 1.0,
            sum: 1.0,
        };
        let second = StatisticPoint {
            start: datetime!(2024-07-01 01:00:00 UTC),
            state: 2.0,
            sum: 3.0,
        };

        sink.add_statistics(&metadata(), &[second, first]).await.unwrap();
        sink.add_statistics(&metadata(), &[second]).await.unwrap();

        let stored = sink.series(&metadata().statistic_id).await.unwrap();
        assert_eq!(stored.points, vec![first, second]);
        assert_eq!(stored.submissions, 2);
        assert_eq!(
            sink.last_point(&metadata().statistic_id).await.unwrap(),
            Some(second)
        );
        assert_eq!(sink.last_point("unknown").await.unwrap(), None);
    }
}
