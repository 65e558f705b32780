use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, ClientBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::config::ApiConfig;
use crate::error::{ConfigError, FetchError, GENERIC_FAILURE};
use crate::settings::{Settings, Voice};
use crate::summary::{ArticleCollection, SummaryCollection};

/// Read side of the remote service the client keeps itself in sync with.
#[async_trait]
pub trait SummarySource: Send + Sync {
    async fn fetch_summaries(&self) -> Result<SummaryCollection, FetchError>;

    async fn fetch_voices(&self, provider: &str) -> Result<Vec<Voice>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// HTTP client for the Narrate News backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base: Url,
}

impl ApiClient {
    pub fn new(client: Client, mut base: Url) -> Self {
        // joins must append to the base path, not replace its last segment
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { client, base }
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, ConfigError> {
        let client = ClientBuilder::new()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ConfigError::Http)?;
        Ok(Self::new(client, config.base_url()?))
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.base
            .join(path)
            .map_err(|e| FetchError::Transport(format!("invalid endpoint {path}: {e}")))
    }

    pub async fn summaries(&self) -> Result<SummaryCollection, FetchError> {
        let url = self.endpoint("summaries")?;
        debug!(%url, "fetching summaries");
        let summaries: SummaryCollection = decode(self.client.get(url).send().await?).await?;
        debug!(count = summaries.len(), "summaries received");
        Ok(summaries)
    }

    pub async fn articles(&self, date: Option<NaiveDate>) -> Result<ArticleCollection, FetchError> {
        let mut url = self.endpoint("articles")?;
        if let Some(date) = date {
            url.query_pairs_mut()
                .append_pair("filter_date", &date.format("%Y-%m-%d").to_string());
        }
        decode(self.client.get(url).send().await?).await
    }

    pub async fn voices(&self, provider: &str) -> Result<Vec<Voice>, FetchError> {
        let mut url = self.endpoint("voices/")?;
        url.path_segments_mut()
            .map_err(|_| FetchError::Transport("base url cannot carry a path".into()))?
            .pop_if_empty()
            .push(provider);
        decode(self.client.get(url).send().await?).await
    }

    pub async fn settings(&self) -> Result<Settings, FetchError> {
        let url = self.endpoint("settings")?;
        decode(self.client.get(url).send().await?).await
    }

    /// Stores `settings` and returns what the backend actually kept.
    pub async fn update_settings(&self, settings: &Settings) -> Result<Settings, FetchError> {
        let url = self.endpoint("settings")?;
        let stored: Settings = decode(self.client.post(url).json(settings).send().await?).await?;
        info!(provider = %stored.tts_provider, voice = %stored.voice, "settings updated");
        Ok(stored)
    }

    /// Asks the backend to run one processing pass over its feeds.
    pub async fn start_processing(&self) -> Result<(), FetchError> {
        let url = self.endpoint("process")?;
        let response = self.client.post(url).send().await?;
        check_status(response).await?;
        info!("processing started");
        Ok(())
    }
}

#[async_trait]
impl SummarySource for ApiClient {
    async fn fetch_summaries(&self) -> Result<SummaryCollection, FetchError> {
        self.summaries().await
    }

    async fn fetch_voices(&self, provider: &str) -> Result<Vec<Voice>, FetchError> {
        self.voices(provider).await
    }
}

async fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.detail)
        .map(|detail| match detail {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        })
        .filter(|detail| !detail.is_empty())
        .unwrap_or_else(|| GENERIC_FAILURE.to_owned());
    Err(FetchError::Status {
        status: status.as_u16(),
        detail,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, FetchError> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
}
