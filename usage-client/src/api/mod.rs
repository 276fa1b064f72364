use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::domain::RawHourlyUsage;

/// Account credentials for the usage API.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub billing_account: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("billing_account", &self.billing_account)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body of the hourly usage endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlyUsageResponse {
    #[serde(default)]
    pub energy_usage: Vec<RawHourlyUsage>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("usage API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("usage API returned status {0}")]
    Status(u16),
    #[error("invalid usage API url: {0}")]
    Url(String),
}

impl ApiError {
    /// True when the API could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        match self {
            ApiError::Http(e) => e.is_connect() || e.is_timeout(),
            ApiError::Status(code) => *code >= 500,
            ApiError::Url(_) => false,
        }
    }
}

/// The operations the coordinator and the setup flow need from the usage API.
///
/// Dates are `dd-mm-yyyy`, both ends inclusive.
#[async_trait::async_trait]
pub trait UsageApi: Send + Sync {
    async fn is_authorised(&self) -> Result<bool, ApiError>;

    async fn get_hourly_usage(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> Result<HourlyUsageResponse, ApiError>;
}

pub struct HttpUsageClient {
    client: Client,
    base_url: Url,
    credentials: Credentials,
}

impl HttpUsageClient {
    pub fn new(base_url: &str, credentials: Credentials, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url).map_err(|e| ApiError::Url(format!("{base_url}: {e}")))?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    fn account_url(&self) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::Url("base url cannot have path segments".to_string()))?
            .pop_if_empty()
            .push("accounts")
            .push(&self.credentials.billing_account);
        Ok(url)
    }

    fn hourly_usage_url(&self, start_date: &str, end_date: &str) -> Result<Url, ApiError> {
        let mut url = self.account_url()?;
        url.path_segments_mut()
            .map_err(|()| ApiError::Url("base url cannot have path segments".to_string()))?
            .push("usage")
            .push("hourly");
        url.query_pairs_mut()
            .append_pair("beginDate", start_date)
            .append_pair("endDate", end_date);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl UsageApi for HttpUsageClient {
    #[tracing::instrument(skip(self), fields(billing_account = %self.credentials.billing_account))]
    async fn is_authorised(&self) -> Result<bool, ApiError> {
        let response = self
            .client
            .get(self.account_url()?)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            s => Err(ApiError::Status(s.as_u16())),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn get_hourly_usage(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> Result<HourlyUsageResponse, ApiError> {
        let url = self.hourly_usage_url(start_date, end_date)?;
        tracing::debug!(%url, "fetching hourly usage");

        let response = self
            .client
            .get(url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        let body = response.json::<HourlyUsageResponse>().await?;
        tracing::debug!(entries = body.energy_usage.len(), "fetched hourly usage");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> HttpUsageClient {
        HttpUsageClient::new(
            base,
            Credentials {
                billing_account: "123456789".to_string(),
                username: "user".to_string(),
                password: "secret".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn hourly_usage_url_carries_account_and_dates() {
        let c = client("https://api.example.test/v1/");

        let url = c.hourly_usage_url("01-07-2024", "02-07-2024").unwrap();

        assert_eq!(
            url.as_str(),
            "https://api.example.test/v1/accounts/123456789/usage/hourly?beginDate=01-07-2024&endDate=02-07-2024"
        );
    }

    #[test]
    fn account_url_without_trailing_slash() {
        let c = client("https://api.example.test/v1");

        assert_eq!(
            c.account_url().unwrap().as_str(),
            "https://api.example.test/v1/accounts/123456789"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let res = HttpUsageClient::new(
            "not a url",
            Credentials {
                billing_account: "1".to_string(),
                username: "u".to_string(),
                password: "p".to_string(),
            },
            Duration::from_secs(1),
        );

        assert!(matches!(res, Err(ApiError::Url(_))));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials {
            billing_account: "1".to_string(),
            username: "u".to_string(),
            password: "hunter2".to_string(),
        };

        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn response_decodes_vendor_payload() {
        let json = r#"{
            "energy_usage": [
                {
                    "date": "2024-07-01T00:00:00",
                    "kwh_data": {"on_peak_kwh": 2.0, "off_peak_kwh": 1.0, "shoulder_kwh": 0.5, "super_off_peak_kwh": 0.1, "total_kwh": 3.6},
                    "cost_data": {"on_peak_cost": 0.4, "off_peak_cost": 0.1, "shoulder_cost": 0.05, "super_off_peak_cost": 0.01, "total_cost": 0.56}
                }
            ]
        }"#;

        let body: HourlyUsageResponse = serde_json::from_str(json).unwrap();

        assert_eq!(body.energy_usage.len(), 1);
        assert_eq!(body.energy_usage[0].kwh_data.shoulder_kwh, 0.5);
        assert_eq!(body.energy_usage[0].cost_data.total_cost, Some(0.56));
    }
}
