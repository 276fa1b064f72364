use std::fmt;

use serde::{Deserialize, Serialize};

/// Billing category a block of energy usage falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageTier {
    OnPeak,
    OffPeak,
    Shoulder,
    SuperOffPeak,
}

impl UsageTier {
    pub const ALL: [UsageTier; 4] = [
        UsageTier::OnPeak,
        UsageTier::OffPeak,
        UsageTier::Shoulder,
        UsageTier::SuperOffPeak,
    ];

    pub const fn slug(self) -> &'static str {
        match self {
            UsageTier::OnPeak => "on_peak",
            UsageTier::OffPeak => "off_peak",
            UsageTier::Shoulder => "shoulder",
            UsageTier::SuperOffPeak => "super_off_peak",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            UsageTier::OnPeak => "On Peak Usage",
            UsageTier::OffPeak => "Off Peak Usage",
            UsageTier::Shoulder => "Shoulder Usage",
            UsageTier::SuperOffPeak => "Super Off Peak Usage",
        }
    }
}

impl fmt::Display for UsageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}
