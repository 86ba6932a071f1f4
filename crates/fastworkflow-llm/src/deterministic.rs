use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::intent::{IntentModel, ScoredPrediction};
use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

/// In-process provider for tests and degraded mode.
///
/// Returns queued canned responses in order; when the queue is empty it
/// returns an empty completion, which downstream code treats as "use
/// defaults".
#[derive(Default)]
pub struct DeterministicProvider {
    canned: Mutex<Vec<String>>,
}

impl DeterministicProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            canned: Mutex::new(responses),
        }
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.canned.lock().unwrap().push(response.into());
    }
}

#[async_trait]
impl LlmProvider for DeterministicProvider {
    fn name(&self) -> &str {
        "deterministic"
    }

    async fn send(
        &self,
        req: &ChatRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<ChatResponse, ProviderError> {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
        }
        let mut canned = self.canned.lock().unwrap();
        let content = if canned.is_empty() {
            String::new()
        } else {
            canned.remove(0)
        };
        Ok(ChatResponse {
            content,
            model: req.model.clone(),
            tokens_in: 0,
            tokens_out: 0,
        })
    }
}

/// Embedding dimension of the lexical model.
const EMBED_DIM: usize = 256;

/// Lexical intent model: scores candidate labels by token overlap with the
/// label name and any registered example utterances, and embeds text as a
/// normalized hashed character-trigram bag.
///
/// Deterministic and dependency-free; serves as the small tier in tests and
/// as the fallback when no inference server is configured.
#[derive(Default)]
pub struct LexicalIntentModel {
    examples: HashMap<String, Vec<String>>,
}

impl LexicalIntentModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register example utterances for a label, improving its scores.
    pub fn with_examples(mut self, label: impl Into<String>, examples: &[&str]) -> Self {
        self.examples.insert(
            label.into(),
            examples.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    fn score_label(&self, utterance: &str, label: &str) -> f64 {
        let utterance_tokens = tokenize(utterance);
        if utterance_tokens.is_empty() {
            return 0.0;
        }

        // Best score across the label name itself and its examples.
        let bare = label.rsplit('/').next().unwrap_or(label);
        let mut best = token_overlap(&utterance_tokens, &tokenize(&bare.replace('_', " ")));
        if let Some(examples) = self.examples.get(label) {
            for example in examples {
                let s = token_overlap(&utterance_tokens, &tokenize(example));
                if s > best {
                    best = s;
                }
            }
        }
        best
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn token_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = b.iter().filter(|t| a.contains(t)).count();
    shared as f64 / b.len().max(a.len()) as f64
}

fn trigram_embedding(text: &str) -> Vec<f32> {
    let mut vec = vec![0f32; EMBED_DIM];
    let normalized: String = format!("  {}  ", text.to_lowercase());
    let chars: Vec<char> = normalized.chars().collect();
    for window in chars.windows(3) {
        let mut hash: u64 = 1469598103934665603;
        for c in window {
            hash ^= *c as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        vec[(hash % EMBED_DIM as u64) as usize] += 1.0;
    }
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

#[async_trait]
impl IntentModel for LexicalIntentModel {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn predict(
        &self,
        utterance: &str,
        labels: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<ScoredPrediction>, ProviderError> {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
        }
        let mut scores: Vec<ScoredPrediction> = labels
            .iter()
            .map(|label| ScoredPrediction {
                label: label.clone(),
                score: self.score_label(utterance, label),
            })
            .collect();
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(scores)
    }

    async fn embed(
        &self,
        text: &str,
        _cancel: Option<&CancellationToken>,
    ) -> Result<Vec<f32>, ProviderError> {
        Ok(trigram_embedding(text))
    }
}
