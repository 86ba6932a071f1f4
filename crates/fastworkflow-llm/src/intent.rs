use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::ProviderError;

/// A candidate command label with its classifier score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPrediction {
    pub label: String,
    pub score: f64,
}

/// A neural intent classifier tier.
///
/// Exposes both label scoring over a candidate set and the dense embedding
/// hook the utterance cache reuses.
#[async_trait]
pub trait IntentModel: Send + Sync {
    fn name(&self) -> &str;

    /// Score each candidate label for the utterance, best first.
    async fn predict(
        &self,
        utterance: &str,
        labels: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<ScoredPrediction>, ProviderError>;

    /// Dense embedding of the utterance.
    async fn embed(
        &self,
        text: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<f32>, ProviderError>;
}

/// Intent classifier backed by an inference server exposing a zero-shot
/// classification endpoint and an OpenAI-compatible embeddings endpoint.
pub struct HttpIntentModel {
    client: reqwest::Client,
    model_name: String,
    base_url: String,
    api_key: Option<String>,
}

impl HttpIntentModel {
    pub fn new(
        model_name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout_seconds: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            client,
            model_name: model_name.into(),
            base_url: base_url.into(),
            api_key,
        }
    }

    async fn predict_inner(
        &self,
        utterance: &str,
        labels: &[String],
    ) -> Result<Vec<ScoredPrediction>, ProviderError> {
        let url = format!("{}/v1/classify", self.base_url);
        let body = serde_json::json!({
            "model": self.model_name,
            "input": utterance,
            "labels": labels,
        });
        debug!(model = %self.model_name, labels = labels.len(), "classify request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "classify API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let parsed: ClassifyResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let mut scores: Vec<ScoredPrediction> = parsed
            .scores
            .into_iter()
            .map(|s| ScoredPrediction {
                label: s.label,
                score: s.score,
            })
            .collect();
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(scores)
    }

    async fn embed_inner(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model_name,
            "input": text,
        });

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "embeddings API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let parsed: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::Parse("empty embeddings response".to_string()))
    }
}

#[async_trait]
impl IntentModel for HttpIntentModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn predict(
        &self,
        utterance: &str,
        labels: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<ScoredPrediction>, ProviderError> {
        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(ProviderError::Cancelled),
                    result = self.predict_inner(utterance, labels) => result,
                }
            }
            None => self.predict_inner(utterance, labels).await,
        }
    }

    async fn embed(
        &self,
        text: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<f32>, ProviderError> {
        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(ProviderError::Cancelled),
                    result = self.embed_inner(text) => result,
                }
            }
            None => self.embed_inner(text).await,
        }
    }
}

#[derive(Deserialize)]
struct ClassifyResponse {
    scores: Vec<LabelScore>,
}

#[derive(Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}
