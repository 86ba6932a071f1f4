use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use fastworkflow_core::types::ConversationTurn;
use fastworkflow_llm::{ChatRequest, LlmProvider};

/// Generate a topic and summary for a conversation.
///
/// Only the per-turn summaries are sent to the model — never the verbose
/// traces. Failures degrade to a topic derived from the first turn summary
/// so rotation always completes.
pub async fn generate_topic_and_summary(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    turns: &[ConversationTurn],
) -> (String, String) {
    let summaries_only: Vec<serde_json::Value> = turns
        .iter()
        .map(|t| json!({ "conversation_summary": t.summary }))
        .collect();
    let turns_str = serde_json::to_string_pretty(&summaries_only).unwrap_or_default();

    let system = "Generate a concise topic and summary for a conversation.\n\
                  Respond with a single JSON object: \
                  {\"topic\": \"<short topic, 3-6 words>\", \"summary\": \"<brief summary paragraph>\"}";
    let request = ChatRequest::prompt(model, system, format!("Conversation turns:\n{turns_str}"));

    match provider.send(&request, None).await {
        Ok(response) => {
            if let Some((topic, summary)) = parse_topic_summary(&response.content) {
                return (topic, summary);
            }
            warn!("topic/summary response was not parseable, falling back");
            fallback(turns)
        }
        Err(e) => {
            warn!(error = %e, "topic/summary generation failed, falling back");
            fallback(turns)
        }
    }
}

fn parse_topic_summary(content: &str) -> Option<(String, String)> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    let value: serde_json::Value = serde_json::from_str(&content[start..=end]).ok()?;
    let topic = value.get("topic")?.as_str()?.trim().to_string();
    let summary = value.get("summary")?.as_str()?.trim().to_string();
    if topic.is_empty() {
        return None;
    }
    Some((topic, summary))
}

/// Degraded topic/summary: first turn summary truncated to a few words.
fn fallback(turns: &[ConversationTurn]) -> (String, String) {
    let first = turns.first().map(|t| t.summary.as_str()).unwrap_or("");
    let topic: String = if first.is_empty() {
        "Conversation".to_string()
    } else {
        first.split_whitespace().take(6).collect::<Vec<_>>().join(" ")
    };
    let summary = turns
        .iter()
        .map(|t| t.summary.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    (topic, summary)
}
