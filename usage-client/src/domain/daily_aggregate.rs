use serde::ser::{Error as _, SerializeStruct};
use serde::{Serialize, Serializer};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use super::{RawHourlyUsage, UsageTier};

/// Totals over all hourly entries of one fetch window.
///
/// `total_kwh` and `total_cost` are always derived from the four tiers; any
/// total the API sends along is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyAggregate {
    pub on_peak_kwh_total: f64,
    pub off_peak_kwh_total: f64,
    pub shoulder_kwh_total: f64,
    pub super_off_peak_kwh_total: f64,
    pub on_peak_cost_total: f64,
    pub off_peak_cost_total: f64,
    pub shoulder_cost_total: f64,
    pub super_off_peak_cost_total: f64,
    /// End date of the window the totals were computed over.
    pub timestamp: OffsetDateTime,
}

impl DailyAggregate {
    pub fn from_entries(entries: &[RawHourlyUsage], timestamp: OffsetDateTime) -> Self {
        let kwh = |tier: UsageTier| entries.iter().map(|e| e.kwh_data.tier(tier)).sum::<f64>();
        let cost = |tier: UsageTier| entries.iter().map(|e| e.cost_data.tier(tier)).sum::<f64>();

        Self {
            on_peak_kwh_total: kwh(UsageTier::OnPeak),
            off_peak_kwh_total: kwh(UsageTier::OffPeak),
            shoulder_kwh_total: kwh(UsageTier::Shoulder),
            super_off_peak_kwh_total: kwh(UsageTier::SuperOffPeak),
            on_peak_cost_total: cost(UsageTier::OnPeak),
            off_peak_cost_total: cost(UsageTier::OffPeak),
            shoulder_cost_total: cost(UsageTier::Shoulder),
            super_off_peak_cost_total: cost(UsageTier::SuperOffPeak),
            timestamp,
        }
    }

    pub fn kwh_total(&self, tier: UsageTier) -> f64 {
        match tier {
            UsageTier::OnPeak => self.on_peak_kwh_total,
            UsageTier::OffPeak => self.off_peak_kwh_total,
            UsageTier::Shoulder => self.shoulder_kwh_total,
            UsageTier::SuperOffPeak => self.super_off_peak_kwh_total,
        }
    }

    pub fn cost_total(&self, tier: UsageTier) -> f64 {
        match tier {
            UsageTier::OnPeak => self.on_peak_cost_total,
            UsageTier::OffPeak => self.off_peak_cost_total,
            UsageTier::Shoulder => self.shoulder_cost_total,
            UsageTier::SuperOffPeak => self.super_off_peak_cost_total,
        }
    }

    pub fn total_kwh(&self) -> f64 {
        UsageTier::ALL.iter().map(|t| self.kwh_total(*t)).sum()
    }

    pub fn total_cost(&self) -> f64 {
        UsageTier::ALL.iter().map(|t| self.cost_total(*t)).sum()
    }

    /// Look a numeric field up by name, e.g. `"on_peak_kwh_total"` or `"total_kwh"`.
    pub fn get(&self, field: &str) -> Option<f64> {
        let value = match field {
            "total_kwh" => self.total_kwh(),
            "total_cost" => self.total_cost(),
            "on_peak_kwh_total" => self.on_peak_kwh_total,
            "off_peak_kwh_total" => self.off_peak_kwh_total,
            "shoulder_kwh_total" => self.shoulder_kwh_total,
            "super_off_peak_kwh_total" => self.super_off_peak_kwh_total,
            "on_peak_cost_total" => self.on_peak_cost_total,
            "off_peak_cost_total" => self.off_peak_cost_total,
            "shoulder_cost_total" => self.shoulder_cost_total,
            "super_off_peak_cost_total" => self.super_off_peak_cost_total,
            _ => return None,
        };
        Some(value)
    }
}

impl Serialize for DailyAggregate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let timestamp = self.timestamp.format(&Rfc3339).map_err(S::Error::custom)?;

        let mut s = serializer.serialize_struct("DailyAggregate", 11)?;
        s.serialize_field("on_peak_kwh_total", &self.on_peak_kwh_total)?;
        s.serialize_field("off_peak_kwh_total", &self.off_peak_kwh_total)?;
        s.serialize_field("shoulder_kwh_total", &self.shoulder_kwh_total)?;
        s.serialize_field("super_off_peak_kwh_total", &self.super_off_peak_kwh_total)?;
        s.serialize_field("on_peak_cost_total", &self.on_peak_cost_total)?;
        s.serialize_field("off_peak_cost_total", &self.off_peak_cost_total)?;
        s.serialize_field("shoulder_cost_total", &self.shoulder_cost_total)?;
        s.serialize_field("super_off_peak_cost_total", &self.super_off_peak_cost_total)?;
        s.serialize_field("total_kwh", &self.total_kwh())?;
        s.serialize_field("total_cost", &self.total_cost())?;
        s.serialize_field("timestamp", &timestamp)?;
        s.end()
    }
}
