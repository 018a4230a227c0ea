use std::{env, net::SocketAddr, time::Duration};

use reqwest::Url;
use thiserror::Error;

use crate::registry::ResolvedBackend;

pub const DEFAULT_MODEL_ENDPOINTS: &str =
    "mistral-nemo=http://mistral-internal:8000,llama3=http://llama-internal:8000";
pub const SECRET_PLACEHOLDER: &str = "NOT_SET_IN_ENV";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("malformed model endpoint entry {0:?}, expected model=http(s)://host[:port]")]
    MalformedEndpoint(String),
    #[error("model {0:?} is registered more than once")]
    DuplicateModel(String),
    #[error("no model endpoints configured")]
    EmptyRegistry,
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub listen_addr: SocketAddr,
    pub endpoints: Vec<ResolvedBackend>,
    /// Embedded into every prompt preamble. Advisory only: the backend model
    /// is asked not to repeat it, nothing stops it from doing so.
    pub prompt_secret: String,
    pub backend_timeout: Duration,
    pub stream_pacing: Duration,
    pub request_deadline: Duration,
    pub default_model: String,
    pub model_owner: String,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; `lookup` returns `None`
    /// for unset variables.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_owned());
        let prompt_secret = lookup("GOLDEN_BOAR")
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| SECRET_PLACEHOLDER.to_owned());

        Ok(Self {
            listen_addr: parse_value(
                "ADAPTER_LISTEN_ADDR",
                var("ADAPTER_LISTEN_ADDR", "0.0.0.0:8000"),
            )?,
            endpoints: parse_endpoint_table(&var(
                "TRITON_MODEL_ENDPOINTS",
                DEFAULT_MODEL_ENDPOINTS,
            ))?,
            prompt_secret,
            backend_timeout: Duration::from_secs(parse_value(
                "TRITON_TIMEOUT_SECS",
                var("TRITON_TIMEOUT_SECS", "300"),
            )?),
            stream_pacing: Duration::from_millis(parse_value(
                "STREAM_PACING_MS",
                var("STREAM_PACING_MS", "20"),
            )?),
            request_deadline: Duration::from_secs(parse_value(
                "REQUEST_DEADLINE_SECS",
                var("REQUEST_DEADLINE_SECS", "330"),
            )?),
            default_model: var("DEFAULT_MODEL", "mistral-nemo"),
            model_owner: var("MODEL_OWNER", "triton"),
        })
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            endpoints: parse_endpoint_table(DEFAULT_MODEL_ENDPOINTS).unwrap_or_default(),
            prompt_secret: SECRET_PLACEHOLDER.to_owned(),
            backend_timeout: Duration::from_secs(300),
            stream_pacing: Duration::from_millis(20),
            request_deadline: Duration::from_secs(330),
            default_model: "mistral-nemo".to_owned(),
            model_owner: "triton".to_owned(),
        }
    }
}

fn parse_value<T>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue { name, value })
}

/// Parses `model=base_url` pairs separated by commas, keeping their order.
pub fn parse_endpoint_table(raw: &str) -> Result<Vec<ResolvedBackend>, ConfigError> {
    let mut endpoints: Vec<ResolvedBackend> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let Some((model, base)) = entry.split_once('=') else {
            return Err(ConfigError::MalformedEndpoint(entry.to_owned()));
        };
        let model = model.trim();
        let base = base.trim().trim_end_matches('/');
        if model.is_empty() || !is_http_base(base) {
            return Err(ConfigError::MalformedEndpoint(entry.to_owned()));
        }
        if endpoints.iter().any(|existing| existing.model_id == model) {
            return Err(ConfigError::DuplicateModel(model.to_owned()));
        }
        endpoints.push(ResolvedBackend {
            model_id: model.to_owned(),
            base_address: base.to_owned(),
        });
    }

    if endpoints.is_empty() {
        return Err(ConfigError::EmptyRegistry);
    }
    Ok(endpoints)
}

fn is_http_base(base: &str) -> bool {
    Url::parse(base).is_ok_and(|url| {
        matches!(url.scheme(), "http" | "https")
            && url.host_str().is_some_and(|host| !host.is_empty())
    })
}
