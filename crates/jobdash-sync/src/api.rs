use crate::config::SyncConfig;
use async_trait::async_trait;
use jobdash_core::AgentRecord;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Pull endpoints the sync core depends on. Everything else in the REST
/// surface lives outside this crate.
#[async_trait]
pub trait DashboardApi: Send + Sync {
    async fn unread_notifications(&self) -> Result<Vec<Value>, ApiError>;

    async fn agent_roster(&self) -> Result<Vec<AgentRecord>, ApiError>;
}

#[derive(Clone)]
pub struct HttpDashboardApi {
    http: Client,
    unread_url: Url,
    roster_url: Url,
    token: Option<String>,
}

impl HttpDashboardApi {
    pub fn new(config: &SyncConfig) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http,
            unread_url: config.unread_url(),
            roster_url: config.roster_url(),
            token: config.auth_token.clone(),
        })
    }

    async fn get_json<T>(&self, url: &Url) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let mut request = self.http.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let res = request.send().await?;

        if res.status().is_success() {
            Ok(res.json::<T>().await?)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(ApiError::UnexpectedStatus { status, body })
        }
    }
}

#[async_trait]
impl DashboardApi for HttpDashboardApi {
    async fn unread_notifications(&self) -> Result<Vec<Value>, ApiError> {
        self.get_json(&self.unread_url).await
    }

    async fn agent_roster(&self) -> Result<Vec<AgentRecord>, ApiError> {
        self.get_json(&self.roster_url).await
    }
}
