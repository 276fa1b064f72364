use serde::{Deserialize, Serialize};
use time::{format_description::BorrowedFormatItem, macros::format_description, OffsetDateTime, PrimitiveDateTime};

use super::UsageTier;

/// Timestamp layout of `RawHourlyUsage::date`. The API sends no offset; values are UTC.
const API_DATE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

/// kWh breakdown of one hourly entry as returned by the usage API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KwhBreakdown {
    #[serde(default)]
    pub on_peak_kwh: f64,
    #[serde(default)]
    pub off_peak_kwh: f64,
    #[serde(default)]
    pub shoulder_kwh: f64,
    #[serde(default)]
    pub super_off_peak_kwh: f64,
    /// Provided by the API but never trusted; totals are recomputed from the tiers.
    #[serde(default)]
    pub total_kwh: Option<f64>,
}

impl KwhBreakdown {
    pub fn tier(&self, tier: UsageTier) -> f64 {
        match tier {
            UsageTier::OnPeak => self.on_peak_kwh,
            UsageTier::OffPeak => self.off_peak_kwh,
            UsageTier::Shoulder => self.shoulder_kwh,
            UsageTier::SuperOffPeak => self.super_off_peak_kwh,
        }
    }
}

/// Cost breakdown of one hourly entry as returned by the usage API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    #[serde(default)]
    pub on_peak_cost: f64,
    #[serde(default)]
    pub off_peak_cost: f64,
    #[serde(default)]
    pub shoulder_cost: f64,
    #[serde(default)]
    pub super_off_peak_cost: f64,
    #[serde(default)]
    pub total_cost: Option<f64>,
}

impl CostBreakdown {
    pub fn tier(&self, tier: UsageTier) -> f64 {
        match tier {
            UsageTier::OnPeak => self.on_peak_cost,
            UsageTier::OffPeak => self.off_peak_cost,
            UsageTier::Shoulder => self.shoulder_cost,
            UsageTier::SuperOffPeak => self.super_off_peak_cost,
        }
    }
}

/// One hourly entry of the usage API response, before parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHourlyUsage {
    pub date: String,
    #[serde(default)]
    pub kwh_data: KwhBreakdown,
    #[serde(default)]
    pub cost_data: CostBreakdown,
}

/// Energy used during one hour, split by tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourlyUsageRecord {
    pub timestamp: OffsetDateTime,
    pub on_peak_kwh: f64,
    pub off_peak_kwh: f64,
    pub shoulder_kwh: f64,
    pub super_off_peak_kwh: f64,
}

impl HourlyUsageRecord {
    pub fn kwh(&self, tier: UsageTier) -> f64 {
        match tier {
            UsageTier::OnPeak => self.on_peak_kwh,
            UsageTier::OffPeak => self.off_peak_kwh,
            UsageTier::Shoulder => self.shoulder_kwh,
            UsageTier::SuperOffPeak => self.super_off_peak_kwh,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("API response can not be parsed: no hourly usage entries")]
    Empty,
    #[error("invalid hourly usage date '{value}': {reason}")]
    InvalidDate { value: String, reason: String },
}

fn parse_api_date(value: &str) -> Result<OffsetDateTime, ParseError> {
    PrimitiveDateTime::parse(value.trim(), API_DATE_FORMAT)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| ParseError::InvalidDate {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Turn raw API entries into typed records, keeping their order.
///
/// A missing or empty input is a hard error: the API is expected to return at
/// least one hour for any window it accepts.
pub fn parse_hourly_usage(
    entries: Option<&[RawHourlyUsage]>,
) -> Result<Vec<HourlyUsageRecord>, ParseError> {
    let entries = match entries {
        Some(e) if !e.is_empty() => e,
        _ => return Err(ParseError::Empty),
    };

    entries
        .iter()
        .map(|raw| {
            let k = &raw.kwh_data;
            Ok(HourlyUsageRecord {
                timestamp: parse_api_date(&raw.date)?,
                on_peak_kwh: k.on_peak_kwh,
                off_peak_kwh: k.off_peak_kwh,
                shoulder_kwh: k.shoulder_kwh,
                super_off_peak_kwh: k.super_off_peak_kwh,
            })
        })
        .collect()
}
