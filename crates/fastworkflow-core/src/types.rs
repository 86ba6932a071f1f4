use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel for string fields that were not found in the utterance.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// Sentinel for integer fields that were not found or failed coercion.
pub const INVALID_INT_VALUE: i64 = i64::MIN;
/// Sentinel for float fields that were not found or failed coercion.
pub const INVALID_FLOAT_VALUE: f64 = f64::MIN;

/// Workflow context keys managed by the engine. Command code must not write
/// these directly.
pub mod context_keys {
    /// The preserved parameter-bearing command text for the current turn.
    pub const COMMAND: &str = "command";
    /// The resolved command name carried from intent detection to extraction.
    pub const COMMAND_NAME: &str = "command_name";
    /// Partially-filled parameter record from a failed extraction turn.
    pub const STORED_PARAMETERS: &str = "stored_parameters";
    /// Current NLU pipeline stage.
    pub const NLU_PIPELINE_STAGE: &str = "NLU_Pipeline_Stage";
    /// Set when the session runs in agent (tool-use) mode.
    pub const RUN_AS_AGENT: &str = "run_as_agent";
}

/// The four stages of the NLU pipeline state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NluPipelineStage {
    #[default]
    IntentDetection,
    IntentAmbiguityClarification,
    IntentMisunderstandingClarification,
    ParameterExtraction,
}

impl fmt::Display for NluPipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NluPipelineStage::IntentDetection => "INTENT_DETECTION",
            NluPipelineStage::IntentAmbiguityClarification => "INTENT_AMBIGUITY_CLARIFICATION",
            NluPipelineStage::IntentMisunderstandingClarification => {
                "INTENT_MISUNDERSTANDING_CLARIFICATION"
            }
            NluPipelineStage::ParameterExtraction => "PARAMETER_EXTRACTION",
        };
        f.write_str(s)
    }
}

/// A single typed parameter value, including the engine sentinels.
///
/// Sentinels (`NotFound`, `InvalidInt`, `InvalidFloat`) mark fields that still
/// need user input; validation writes them back in place of `Null` so a
/// partially-filled record survives serialization unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
    NotFound,
    InvalidInt,
    InvalidFloat,
    Null,
}

impl ParamValue {
    /// True if the value is one of the "still needs input" sentinels.
    pub fn is_sentinel(&self) -> bool {
        match self {
            ParamValue::NotFound | ParamValue::InvalidInt | ParamValue::InvalidFloat
            | ParamValue::Null => true,
            ParamValue::Str(s) => s == NOT_FOUND,
            ParamValue::Int(i) => *i == INVALID_INT_VALUE,
            ParamValue::Float(f) => *f == INVALID_FLOAT_VALUE,
            _ => false,
        }
    }

    /// Render for display in error messages and traces.
    pub fn display(&self) -> String {
        match self {
            ParamValue::Str(s) => s.clone(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(f) => f.to_string(),
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::List(items) => items.join(", "),
            ParamValue::NotFound => NOT_FOUND.to_string(),
            ParamValue::InvalidInt | ParamValue::InvalidFloat | ParamValue::Null => String::new(),
        }
    }

    /// Convert to a plain JSON value for dispatch and artifacts.
    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Str(s) => Value::String(s.clone()),
            ParamValue::Int(i) => Value::from(*i),
            ParamValue::Float(f) => Value::from(*f),
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::List(items) => {
                Value::Array(items.iter().map(|s| Value::String(s.clone())).collect())
            }
            _ => Value::Null,
        }
    }
}

/// An ordered parameter record for one command invocation.
///
/// Field order follows the command schema declaration order; `BTreeMap` is not
/// used because declared order (not lexical order) drives error enumeration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExtractedParameters {
    pub fields: Vec<(String, ParamValue)>,
}

impl ExtractedParameters {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn set(&mut self, name: &str, value: ParamValue) {
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name.to_string(), value));
        }
    }

    /// Field names whose value is still a sentinel, in declared order.
    pub fn sentinel_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, v)| v.is_sentinel())
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Plain JSON object of the non-sentinel values.
    pub fn to_json_map(&self) -> BTreeMap<String, Value> {
        self.fields
            .iter()
            .filter(|(_, v)| !v.is_sentinel())
            .map(|(n, v)| (n.clone(), v.to_json()))
            .collect()
    }
}

/// A structured, bypass-NLU invocation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Context class name; `None` targets the current command context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub command_name: String,
    #[serde(default)]
    pub command_text: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Recommendation {
    pub summary: String,
    #[serde(default)]
    pub suggested_actions: Vec<Action>,
}

/// One response unit produced by a command's response generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub response: String,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub artifacts: BTreeMap<String, Value>,
    #[serde(default)]
    pub next_actions: Vec<Action>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
}

fn default_true() -> bool {
    true
}

impl CommandResponse {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            success: true,
            artifacts: BTreeMap::new(),
            next_actions: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    pub fn failure(response: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::text(response)
        }
    }
}

/// The aggregate output of one command invocation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommandOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_name: Option<String>,
    pub command_responses: Vec<CommandResponse>,
}

impl CommandOutput {
    pub fn single(response: CommandResponse) -> Self {
        Self {
            command_name: None,
            command_responses: vec![response],
        }
    }

    pub fn with_command(mut self, name: impl Into<String>) -> Self {
        self.command_name = Some(name.into());
        self
    }

    /// `success=false` on any response halts further pipeline processing.
    pub fn success(&self) -> bool {
        self.command_responses.iter().all(|r| r.success)
    }

    pub fn command_aborted(&self) -> bool {
        self.command_responses
            .iter()
            .any(|r| r.artifacts.get("command_name").map(Value::as_str) == Some(Some("abort")))
    }
}

/// A trace event emitted at pipeline phase boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub kind: TraceKind,
    pub data: Value,
    /// Unix milliseconds.
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    StageEntered,
    IntentCandidates,
    IntentResolved,
    ParametersExtracted,
    ValidationResult,
    Dispatch,
    Response,
    Error,
    Timeout,
}

impl TraceEvent {
    pub fn new(kind: TraceKind, data: Value) -> Self {
        Self {
            kind,
            data,
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Receives trace events at pipeline phase boundaries. The session runtime
/// multiplexes them to the in-memory turn buffer and the live stream.
pub trait TraceSink: Send + Sync {
    fn emit(&self, event: TraceEvent);
}

/// Sink that drops every event; used by tests and the action bypass path.
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn emit(&self, _event: TraceEvent) {}
}

/// One completed (utterance → response) pair in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub summary: String,
    pub traces: Vec<TraceEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Value>,
}
