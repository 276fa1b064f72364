use crate::coordinator::CoordinatorError;
use time::macros::datetime;
use usage_client::domain::{HourlyUsageRecord, UsageTier};

/// Pure validation of a `HourlyUsageRecord`.
///
/// Rules:
/// - every tier's kWh must be finite and non-negative.
/// - timestamp must be within a broad sanity window [2000-01-01, 2100-01-01].
pub fn validate_hourly_usage(record: &HourlyUsageRecord) -> Result<(), CoordinatorError> {
    for tier in UsageTier::ALL {
        let kwh = record.kwh(tier);
        if !kwh.is_finite() || kwh < 0.0 {
            return Err(CoordinatorError::Validation(format!(
                "{tier} kwh must be non-negative, got {kwh} at {}",
                record.timestamp
            )));
        }
    }

    let min_ts = datetime!(2000-01-01 00:00:00 UTC);
    let max_ts = datetime!(2100-01-01 00:00:00 UTC);

    if record.timestamp < min_ts || record.timestamp > max_ts {
        return Err(CoordinatorError::Validation(format!(
            "timestamp {} out of allowed range",
            record.timestamp
        )));
    }

    Ok(())
}

/// Validate a whole batch; the first bad record rejects the batch.
pub fn validate_batch(records: &[HourlyUsageRecord]) -> Result<(), CoordinatorError> {
    for record in records {
        if let Err(e) = validate_hourly_usage(record) {
            metrics::counter!("validation_hourly_usage_rejected_total").increment(1);
            return Err(e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record() -> HourlyUsageRecord {
        HourlyUsageRecord {
            timestamp: datetime!(2024-01-01 00:00:00 UTC),
            on_peak_kwh: 1.0,
            off_peak_kwh: 0.5,
            shoulder_kwh: 0.0,
            super_off_peak_kwh: 0.2,
        }
    }

    #[test]
    fn hourly_usage_validation_accepts_valid_record() {
        assert!(validate_hourly_usage(&record()).is_ok());
    }

    #[test]
    fn hourly_usage_validation_rejects_negative_kwh() {
        let r = HourlyUsageRecord {
            shoulder_kwh: -0.1,
            ..record()
        };

        let res = validate_hourly_usage(&r);
        assert!(matches!(res, Err(CoordinatorError::Validation(_))));
    }

    #[test]
    fn hourly_usage_validation_rejects_nan() {
        let r = HourlyUsageRecord {
            on_peak_kwh: f64::NAN,
            ..record()
        };

        assert!(validate_hourly_usage(&r).is_err());
    }

    #[test]
    fn hourly_usage_validation_rejects_out_of_range_ts() {
        let r = HourlyUsageRecord {
            timestamp: datetime!(1800-01-01 00:00:00 UTC),
            ..record()
        };

        let res = validate_hourly_usage(&r);
        assert!(matches!(res, Err(CoordinatorError::Validation(_))));
    }

    #[test]
    fn batch_validation_stops_at_first_bad_record() {
        let bad = HourlyUsageRecord {
            off_peak_kwh: -1.0,
            ..record()
        };

        assert!(validate_batch(&[record(), record()]).is_ok());
        assert!(validate_batch(&[record(), bad, record()]).is_err());
    }
}
