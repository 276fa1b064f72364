use serde::Deserialize;
use std::{fs, time::Duration};
use time::{macros::format_description, Time, UtcOffset};
use usage_client::api::Credentials;

use crate::setup::DEFAULT_ENTRY_NAME;

fn default_entry_name() -> String {
    DEFAULT_ENTRY_NAME.to_string()
}

fn default_device() -> String {
    usage_client::domain::DOMAIN.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_daily_at() -> String {
    "00:30".to_string()
}

fn default_interval_hours() -> u64 {
    24
}

fn default_max_connections() -> u32 {
    4
}

/// Credentials and naming of the single utility account this service polls.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    #[serde(default = "default_entry_name")]
    pub name: String,
    pub billing_account: String,
    pub username: String,
    pub password: String,
    /// Device part of the statistic ids, `<domain>:<device>_<tier>_usage`.
    #[serde(default = "default_device")]
    pub device: String,
}

impl AccountConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            billing_account: self.billing_account.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Local wall-clock time of the first scheduled fetch, `HH:MM`.
    #[serde(default = "default_daily_at")]
    pub daily_at: String,
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
    /// Fixed offset used as local time, e.g. `-07:00`. Falls back to the host offset.
    pub utc_offset: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: default_daily_at(),
            interval_hours: default_interval_hours(),
            utc_offset: None,
        }
    }
}

impl ScheduleConfig {
    pub fn daily_at(&self) -> anyhow::Result<Time> {
        Time::parse(self.daily_at.trim(), format_description!("[hour]:[minute]"))
            .map_err(|e| anyhow::anyhow!("invalid schedule.daily_at '{}': {e}", self.daily_at))
    }

    pub fn interval(&self) -> anyhow::Result<Duration> {
        if self.interval_hours == 0 {
            anyhow::bail!("schedule.interval_hours must be positive");
        }
        Ok(Duration::from_secs(self.interval_hours * 3600))
    }

    pub fn utc_offset(&self) -> anyhow::Result<UtcOffset> {
        match &self.utc_offset {
            Some(s) => UtcOffset::parse(
                s.trim(),
                format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
            )
            .map_err(|e| anyhow::anyhow!("invalid schedule.utc_offset '{s}': {e}")),
            None => Ok(UtcOffset::current_local_offset().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "local UTC offset unavailable, scheduling in UTC");
                UtcOffset::UTC
            })),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Write-only. Running sums restart from zero when the service restarts,
    /// and re-fetched hours then overwrite stored sums with smaller ones.
    Ilp,
    Pgwire,
    Memory,
}

impl SinkKind {
    /// Whether the sink reports its last stored point, so running sums
    /// continue from stored history.
    pub fn can_read_back(self) -> bool {
        !matches!(self, SinkKind::Ilp)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestDbConfig {
    pub uri: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    pub ilp_tcp_addr: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatisticsConfig {
    pub kind: SinkKind,
    pub questdb: Option<QuestDbConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub account: AccountConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub statistics: StatisticsConfig,
    pub http: Option<HttpConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("USAGE_CONFIG").unwrap_or_else(|_| "usage-config.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config '{path}': {e}"))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [account]
        billing_account = "123456789"
        username = "user"
        password = "secret"

        [api]
        base_url = "https://api.example.test/v1"

        [statistics]
        kind = "memory"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = AppConfig::from_toml_str(MINIMAL).unwrap();

        assert_eq!(cfg.account.name, DEFAULT_ENTRY_NAME);
        assert_eq!(cfg.account.name, "Home");
        assert_eq!(cfg.account.device, "salt_river_project");
        assert_eq!(cfg.api.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.schedule.daily_at().unwrap(), time::macros::time!(00:30));
        assert_eq!(cfg.schedule.interval().unwrap(), Duration::from_secs(86_400));
        assert_eq!(cfg.statistics.kind, SinkKind::Memory);
        assert!(cfg.http.is_none());
    }

    #[test]
    fn parses_explicit_schedule_and_sink() {
        let toml = format!(
            "{MINIMAL}\n{}",
            r#"
            [schedule]
            daily_at = "01:15"
            interval_hours = 12
            utc_offset = "-07:00"
            "#
        )
        .replace("kind = \"memory\"", "kind = \"ilp\"\nquestdb = { ilp_tcp_addr = \"127.0.0.1:9009\" }");

        let cfg = AppConfig::from_toml_str(&toml).unwrap();

        assert_eq!(cfg.schedule.daily_at().unwrap(), time::macros::time!(01:15));
        assert_eq!(cfg.schedule.interval().unwrap(), Duration::from_secs(12 * 3600));
        assert_eq!(cfg.schedule.utc_offset().unwrap(), time::macros::offset!(-7));
        assert_eq!(cfg.statistics.kind, SinkKind::Ilp);
        assert_eq!(
            cfg.statistics.questdb.unwrap().ilp_tcp_addr.as_deref(),
            Some("127.0.0.1:9009")
        );
    }

    #[test]
    fn rejects_bad_schedule_values() {
        let schedule = ScheduleConfig {
            daily_at: "25:99".to_string(),
            interval_hours: 0,
            utc_offset: Some("PST".to_string()),
        };

        assert!(schedule.daily_at().is_err());
        assert!(schedule.interval().is_err());
        assert!(schedule.utc_offset().is_err());
    }

    #[test]
    fn only_ilp_sink_cannot_read_back() {
        assert!(!SinkKind::Ilp.can_read_back());
        assert!(SinkKind::Pgwire.can_read_back());
        assert!(SinkKind::Memory.can_read_back());
    }

    #[test]
    fn credentials_come_from_account() {
        let cfg = AppConfig::from_toml_str(MINIMAL).unwrap();

        let creds = cfg.account.credentials();

        assert_eq!(creds.billing_account, "123456789");
        assert_eq!(creds.username, "user");
    }
}
