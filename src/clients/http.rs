//! 生成サービス (analysis / composition / rendering / structure) の HTTP クライアント。
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::generation::{AnalysisRequest, CompositionRequest, GenerationClient, RenderingRequest};
use super::structuring::{Structurer, StructuringPhase, StructuringRequest};
use crate::config::Config;
use crate::model::{AnalysisPayload, AnalysisRecord, Composition, RenderedImage};
use crate::util::json::extract_svg;
use crate::util::retry::{RetryConfig, is_transient_chain};

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    analysis: Value,
}

#[derive(Debug, Deserialize)]
struct StructureResponse {
    svg: String,
}

#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    retry: RetryConfig,
}

impl HttpGenerationClient {
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合。
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build generation HTTP client")?;

        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let base_url = Url::parse(&base_url).context("invalid generation base URL")?;

        Ok(Self {
            client,
            base_url,
            api_key: None,
            retry: RetryConfig::default(),
        })
    }

    /// # Errors
    /// See [`HttpGenerationClient::new`].
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut client = Self::new(config.generation_base_url(), config.generation_timeout())?
            .with_retry(RetryConfig::new(
                config.http_max_retries(),
                config.http_backoff_base_ms(),
                config.http_backoff_cap_ms(),
            ));
        if let Some(key) = config.generation_api_key() {
            client = client.with_api_key(key);
        }
        Ok(client)
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub(crate) fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// # Errors
    /// Unreachable service or non-2xx status.
    pub async fn health_check(&self) -> Result<()> {
        let url = self
            .base_url
            .join("health")
            .context("failed to build generation health URL")?;

        self.client
            .get(url)
            .send()
            .await
            .context("generation health request failed")?
            .error_for_status()
            .context("generation health endpoint returned error status")?;

        Ok(())
    }

    async fn post_json<B, R>(&self, endpoint: &str, body: &B, label: &str) -> Result<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(endpoint)
            .with_context(|| format!("failed to build {label} URL"))?;

        let mut attempt = 0;
        loop {
            match self.send_once(url.clone(), body, label).await {
                Ok(response) => {
                    if attempt > 0 {
                        info!(attempt, endpoint = label, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(err) => {
                    attempt += 1;

                    if !self.retry.can_retry(attempt) {
                        warn!(
                            attempt,
                            max_attempts = self.retry.max_attempts,
                            endpoint = label,
                            "request failed after all retries"
                        );
                        return Err(err);
                    }
                    if !is_transient_chain(&err) {
                        return Err(err);
                    }

                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        endpoint = label,
                        error = %format!("{err:#}"),
                        "request failed, retrying after delay"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn send_once<B, R>(&self, url: Url, body: &B, label: &str) -> Result<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        request
            .send()
            .await
            .with_context(|| format!("{label} request failed"))?
            .error_for_status()
            .with_context(|| format!("{label} endpoint returned error status"))?
            .json::<R>()
            .await
            .with_context(|| format!("failed to deserialize {label} response"))
    }
}

/// 文字列で返ってきた分析はパースを試み、失敗したら生テキストのまま保持する。
fn analysis_payload(value: Value) -> Result<AnalysisPayload> {
    match value {
        Value::String(text) => Ok(AnalysisRecord::from_text(&text)
            .map_or(AnalysisPayload::Raw(text), AnalysisPayload::Parsed)),
        Value::Object(_) => serde_json::from_value::<AnalysisRecord>(value)
            .map(AnalysisPayload::Parsed)
            .context("analysis object has an unexpected shape"),
        other => Err(anyhow!("analysis response must be an object or text, got {other}")),
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisPayload> {
        debug!(utterance = %request.utterance, "requesting analysis");
        let response: AnalysisResponse = self.post_json("v1/analysis", request, "analysis").await?;
        analysis_payload(response.analysis)
    }

    async fn compose(&self, request: &CompositionRequest) -> Result<Composition> {
        debug!(utterance = %request.utterance, "requesting composition");
        self.post_json("v1/composition", request, "composition").await
    }

    async fn render(&self, request: &RenderingRequest) -> Result<RenderedImage> {
        debug!(utterance = %request.utterance, "requesting rendering");
        let image: RenderedImage = self.post_json("v1/rendering", request, "rendering").await?;
        if image.data.is_empty() {
            return Err(anyhow!("rendering response carried no image data"));
        }
        Ok(image)
    }
}

#[async_trait]
impl Structurer for HttpGenerationClient {
    async fn structure(
        &self,
        request: &StructuringRequest,
        phase: &(dyn Fn(StructuringPhase) + Send + Sync),
    ) -> Result<String> {
        phase(StructuringPhase::Sending);
        let response: StructureResponse = self.post_json("v1/structure", request, "structure").await?;
        phase(StructuringPhase::Receiving);
        phase(StructuringPhase::Sanitizing);
        extract_svg(&response.svg)
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("structure response did not contain SVG markup"))
    }
}
