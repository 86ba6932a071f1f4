use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fastworkflow_core::types::CommandOutput;
use fastworkflow_llm::{ChatRequest, LlmProvider};
use fastworkflow_registry::WorkflowDefinition;

/// Maximum clarification retries per agentic turn before the error is
/// returned to the caller.
pub const MAX_CLARIFY_ATTEMPTS: usize = 3;

/// Reformulate a command that hit an intent detection error.
///
/// The model sees the original command, the error, and the candidate
/// commands' signatures, and must return the complete clarified command with
/// all original parameters preserved. `None` when the model is unavailable
/// or returns nothing usable; the caller then surfaces the error as-is.
pub async fn clarify_intent(
    provider: &Arc<dyn LlmProvider>,
    model: &str,
    definition: &WorkflowDefinition,
    original_command: &str,
    error_message: &str,
    candidates: &[String],
    cancel: Option<&CancellationToken>,
) -> Option<String> {
    let metadata = if candidates.is_empty() {
        String::from("(no candidate list; pick from the commands named in the error message)")
    } else {
        candidates
            .iter()
            .filter_map(|name| definition.command(name))
            .map(|descriptor| format!("- {}", descriptor.signature()))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let system = "Handle intent detection errors by clarifying user intent.\n\
                  Review the candidate commands to understand each command's purpose and parameters.\n\
                  IMPORTANT: preserve ALL parameters from the original command.\n\
                  Respond with exactly one line: the clarified command, starting with the correct command name.";
    let user = format!(
        "Original command: {original_command}\n\nError:\n{error_message}\n\nCandidate commands:\n{metadata}"
    );

    let request = ChatRequest::prompt(model, system, user);
    match provider.send(&request, cancel).await {
        Ok(response) => {
            let clarified = response
                .content
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(String::from)?;
            if clarified.eq_ignore_ascii_case(original_command) {
                // No progress; retrying with the same text would loop.
                return None;
            }
            debug!(clarified, "intent clarified");
            Some(clarified)
        }
        Err(e) => {
            warn!(error = %e, "intent clarification failed");
            None
        }
    }
}

/// The structured error kind a pipeline failure output carries, if any.
pub fn error_kind(output: &CommandOutput) -> Option<&str> {
    output
        .command_responses
        .iter()
        .find_map(|r| r.artifacts.get("error_kind").and_then(|v| v.as_str()))
}

/// Candidate list attached to an ambiguity failure output.
pub fn error_candidates(output: &CommandOutput) -> Vec<String> {
    output
        .command_responses
        .iter()
        .find_map(|r| r.artifacts.get("candidates").and_then(|v| v.as_array()))
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Ask-user fallback: push the clarification request onto the command output
/// queue and wait briefly on the user message queue. Used only as a last
/// resort inside agent tool-use; returns `None` when no user message
/// arrives before the deadline.
pub async fn ask_user(
    output_tx: &tokio::sync::mpsc::Sender<CommandOutput>,
    message_rx: &tokio::sync::Mutex<tokio::sync::mpsc::Receiver<String>>,
    request: CommandOutput,
    wait: Duration,
) -> Option<String> {
    if output_tx.send(request).await.is_err() {
        return None;
    }
    let mut rx = message_rx.lock().await;
    tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
}
