use anyhow::Result;
use sqlx::PgPool;

use crate::domain::StatisticPoint;

/// Most recent point stored for a statistic series, if any.
///
/// Its `start` is the high-water mark for the series and its `sum` is where
/// the next running sum has to continue from.
pub async fn last_point(pool: &PgPool, statistic_id: &str) -> Result<Option<StatisticPoint>> {
    let row = sqlx::query_as::<_, StatisticPoint>(
        r#"
        SELECT
            ts,
            state,
            sum
        FROM usage_statistics
        WHERE statistic_id = $1
        ORDER BY ts DESC
        LIMIT 1
        "#,
    )
    .bind(statistic_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
