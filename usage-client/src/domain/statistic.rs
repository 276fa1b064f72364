use serde::Serialize;
use time::OffsetDateTime;

use super::{HourlyUsageRecord, UsageTier, DOMAIN, UNIT_KILO_WATT_HOUR};

/// Fixed description of a long-term statistic series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticMetadata {
    pub statistic_id: String,
    pub name: String,
    pub source: String,
    pub unit_of_measurement: String,
    pub has_mean: bool,
    pub has_sum: bool,
}

/// One period of a statistic series. `sum` is cumulative over every period
/// ever submitted for the series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, sqlx::FromRow)]
pub struct StatisticPoint {
    #[sqlx(rename = "ts")]
    pub start: OffsetDateTime,
    pub state: f64,
    pub sum: f64,
}

/// The per-tier usage series of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticSeries {
    pub tier: UsageTier,
    pub metadata: StatisticMetadata,
}

impl StatisticSeries {
    pub fn new(device: &str, tier: UsageTier) -> Self {
        Self {
            tier,
            metadata: StatisticMetadata {
                statistic_id: format!("{DOMAIN}:{device}_{}_usage", tier.slug()),
                name: tier.display_name().to_string(),
                source: DOMAIN.to_string(),
                unit_of_measurement: UNIT_KILO_WATT_HOUR.to_string(),
                has_mean: false,
                has_sum: true,
            },
        }
    }

    /// All four series of a device, in `UsageTier::ALL` order.
    pub fn for_device(device: &str) -> Vec<Self> {
        UsageTier::ALL.iter().map(|t| Self::new(device, *t)).collect()
    }

    pub fn id(&self) -> &str {
        &self.metadata.statistic_id
    }
}

/// Build the points of one tier's series from a batch of records.
///
/// The running sum is accumulated in input order, starting at `last.sum`.
/// Records at or before `last.start` were already submitted and are skipped so
/// that a re-fetched window never counts an hour twice.
pub fn build_series(
    tier: UsageTier,
    records: &[HourlyUsageRecord],
    last: Option<&StatisticPoint>,
) -> Vec<StatisticPoint> {
    let high_water: Option<OffsetDateTime> = last.map(|p| p.start);
    let mut sum = last.map(|p| p.sum).unwrap_or(0.0);

    records
        .iter()
        .filter(|r| high_water.map_or(true, |hw| r.timestamp > hw))
        .map(|r| {
            let state = r.kwh(tier);
            sum += state;
            StatisticPoint {
                start: r.timestamp,
                state,
                sum,
            }
        })
        .collect()
}

/// Mark to resume from after `points` were stored.
///
/// `start` is the newest period of the batch, whatever its position, and `sum`
/// is the running total after the whole batch.
pub fn high_water_mark(points: &[StatisticPoint]) -> Option<StatisticPoint> {
    let newest = points.iter().max_by_key(|p| p.start)?;
    let total = points.last()?.sum;

    Some(StatisticPoint {
        sum: total,
        ..*newest
    })
}
