use std::collections::BTreeMap;

use time::OffsetDateTime;
use usage_client::{
    api::{ApiError, Credentials, UsageApi},
    domain::parse_hourly_usage,
};

use crate::coordinator::lookback_window;

pub const DEFAULT_ENTRY_NAME: &str = "Home";
pub const DEVICE_NAME: &str = "Salt River Project";
pub const DEVICE_MANUFACTURER: &str = "Salt River Project";
pub const DEVICE_MODEL: &str = "Service Api";
pub const DEVICE_CONFIG_URL: &str = "https://www.srpnet.com/";

/// What the user supplies to set an account up.
#[derive(Debug, Clone)]
pub struct UserInput {
    pub name: String,
    pub credentials: Credentials,
}

/// A validated account the service runs against.
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    /// Stable per billing account.
    pub entry_id: String,
    pub title: String,
    pub name: String,
    pub credentials: Credentials,
}

impl ConfigEntry {
    fn new(title: String, input: UserInput) -> Self {
        let hash = blake3::hash(input.credentials.billing_account.as_bytes());
        let mut entry_id = hash.to_hex().to_string();
        entry_id.truncate(32);

        Self {
            entry_id,
            title,
            name: input.name,
            credentials: input.credentials,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    #[error("invalid authentication")]
    InvalidAuth,
    #[error("cannot connect: {0}")]
    CannotConnect(String),
    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl SetupError {
    /// Error code shown next to the form.
    pub fn code(&self) -> &'static str {
        match self {
            SetupError::InvalidAuth => "invalid_auth",
            SetupError::CannotConnect(_) => "cannot_connect",
            SetupError::Unknown(_) => "unknown",
        }
    }
}

impl From<ApiError> for SetupError {
    fn from(e: ApiError) -> Self {
        if e.is_connectivity() {
            SetupError::CannotConnect(e.to_string())
        } else {
            SetupError::Unknown(e.to_string())
        }
    }
}

/// Check the credentials and that the account returns usable data.
pub async fn validate_input<A: UsageApi + ?Sized>(api: &A, now: OffsetDateTime) -> Result<String, SetupError> {
    if !api.is_authorised().await? {
        return Err(SetupError::InvalidAuth);
    }

    let window = lookback_window(now).map_err(|e| SetupError::Unknown(e.to_string()))?;
    let response = api.get_hourly_usage(&window.start_date, &window.end_date).await?;
    parse_hourly_usage(Some(response.energy_usage.as_slice())).map_err(|e| SetupError::Unknown(e.to_string()))?;

    Ok(DEVICE_NAME.to_string())
}

#[derive(Debug)]
pub enum FlowResult {
    ShowForm {
        step_id: &'static str,
        /// `"base"` maps to one of the `SetupError` codes.
        errors: BTreeMap<&'static str, &'static str>,
    },
    CreateEntry {
        title: String,
        entry: ConfigEntry,
    },
}

/// Single-step account setup.
pub struct ConfigFlow<F> {
    client_factory: F,
}

impl<F, A> ConfigFlow<F>
where
    F: Fn(&Credentials) -> Result<A, ApiError>,
    A: UsageApi,
{
    pub fn new(client_factory: F) -> Self {
        Self { client_factory }
    }

    pub async fn step_user(&self, input: Option<UserInput>, now: OffsetDateTime) -> FlowResult {
        let mut errors = BTreeMap::new();

        if let Some(input) = input {
            let validated = match (self.client_factory)(&input.credentials) {
                Ok(api) => validate_input(&api, now).await,
                Err(e) => Err(SetupError::Unknown(e.to_string())),
            };

            match validated {
                Ok(title) => {
                    return FlowResult::CreateEntry {
                        title: title.clone(),
                        entry: ConfigEntry::new(title, input),
                    }
                }
                Err(e) => {
                    if let SetupError::Unknown(_) = e {
                        tracing::error!(error = %e, "unexpected exception during setup");
                    } else {
                        tracing::warn!(error = %e, "account setup rejected");
                    }
                    errors.insert("base", e.code());
                }
            }
        }

        FlowResult::ShowForm {
            step_id: "user",
            errors,
        }
    }
}
