use jobdash_core::realtime::{HEARTBEAT_PING, HEARTBEAT_PONG};
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_CHANNEL_PATH: &str = "/notifications/ws";
pub const DEFAULT_UNREAD_PATH: &str = "/notifications/unread";
pub const DEFAULT_ROSTER_PATH: &str = "/agents";

const DEFAULT_HEARTBEAT_SECS: u64 = 30;
const DEFAULT_RECONNECT_SECS: u64 = 5;
const DEFAULT_POLL_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid url for {field}: {value} ({reason})")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("unsupported url scheme for {field}: {scheme}")]
    UnsupportedScheme { field: &'static str, scheme: String },
    #[error("invalid duration for {key}: {value}")]
    InvalidDuration { key: &'static str, value: String },
}

/// Everything the sync core needs to know about its environment. Built once
/// and handed to the coordinator; components never read the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub api_base_url: Url,
    pub channel_url: Url,
    pub auth_token: Option<String>,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub unread_path: String,
    pub roster_path: String,
    pub heartbeat_ping: String,
    pub heartbeat_pong: String,
}

impl SyncConfig {
    pub fn new(api_base_url: &str) -> Result<Self, ConfigError> {
        let api_base_url = parse_url("api_base_url", api_base_url)?;
        match api_base_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ConfigError::UnsupportedScheme {
                    field: "api_base_url",
                    scheme: other.to_string(),
                })
            }
        }
        let channel_url = derive_channel_url(&api_base_url)?;
        Ok(Self {
            api_base_url,
            channel_url,
            auth_token: None,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            unread_path: DEFAULT_UNREAD_PATH.to_string(),
            roster_path: DEFAULT_ROSTER_PATH.to_string(),
            heartbeat_ping: HEARTBEAT_PING.to_string(),
            heartbeat_pong: HEARTBEAT_PONG.to_string(),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let resolve = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let base = resolve("JOBDASH_API_URL").ok_or(ConfigError::Missing("JOBDASH_API_URL"))?;
        let mut config = Self::new(base.trim())?;
        if let Some(value) = resolve("JOBDASH_WS_URL") {
            config = config.with_channel_url(value.trim())?;
        }
        if let Some(value) = resolve("JOBDASH_TOKEN") {
            config.auth_token = Some(value.trim().to_string());
        }
        if let Some(value) = resolve("JOBDASH_POLL_INTERVAL_SECS") {
            config.poll_interval = parse_secs("JOBDASH_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = resolve("JOBDASH_HEARTBEAT_SECS") {
            config.heartbeat_interval = parse_secs("JOBDASH_HEARTBEAT_SECS", &value)?;
        }
        if let Some(value) = resolve("JOBDASH_RECONNECT_SECS") {
            config.reconnect_delay = parse_secs("JOBDASH_RECONNECT_SECS", &value)?;
        }
        Ok(config)
    }

    pub fn with_channel_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        let url = parse_url("channel_url", raw)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ConfigError::UnsupportedScheme {
                    field: "channel_url",
                    scheme: other.to_string(),
                })
            }
        }
        self.channel_url = url;
        Ok(self)
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn unread_url(&self) -> Url {
        join_path(&self.api_base_url, &self.unread_path)
    }

    pub fn roster_url(&self) -> Url {
        join_path(&self.api_base_url, &self.roster_path)
    }
}

pub(crate) fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|err| ConfigError::InvalidUrl {
        field,
        value: raw.to_string(),
        reason: err.to_string(),
    })
}

fn parse_secs(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidDuration {
            key,
            value: value.to_string(),
        }),
    }
}

fn derive_channel_url(base: &Url) -> Result<Url, ConfigError> {
    let mut url = join_path(base, DEFAULT_CHANNEL_PATH);
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| ConfigError::UnsupportedScheme {
            field: "channel_url",
            scheme: base.scheme().to_string(),
        })?;
    Ok(url)
}

fn join_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    let suffix = path.trim_start_matches('/');
    url.set_path(&format!("{prefix}/{suffix}"));
    url.set_query(None);
    url.set_fragment(None);
    url
}
