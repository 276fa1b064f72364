pub mod daily_aggregate;
pub mod hourly_usage;
pub mod statistic;
pub mod tier;

pub use daily_aggregate::DailyAggregate;
pub use hourly_usage::{
    parse_hourly_usage, CostBreakdown, HourlyUsageRecord, KwhBreakdown, ParseError, RawHourlyUsage,
};
pub use statistic::{build_series, high_water_mark, StatisticMetadata, StatisticPoint, StatisticSeries};
pub use tier::UsageTier;

/// Integration domain used as the `source` of every statistic series.
pub const DOMAIN: &str = "salt_river_project";

pub const UNIT_KILO_WATT_HOUR: &str = "kWh";
