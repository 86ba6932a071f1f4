use thiserror::Error;

#[derive(Debug, Error)]
pub enum FastworkflowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workflow definition error in {file}: {reason}")]
    WorkflowDefinition { file: String, reason: String },

    #[error("Context inheritance cycle involving '{context}'")]
    InheritanceCycle { context: String },

    #[error("Command not found: {name}")]
    CommandNotFound { name: String },

    #[error("Context not found: {name}")]
    ContextNotFound { name: String },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Session not found: {user_id}")]
    SessionNotFound { user_id: String },

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FastworkflowError {
    /// Short error code string included in HTTP error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            FastworkflowError::Config(_) => "CONFIG_ERROR",
            FastworkflowError::WorkflowDefinition { .. } => "WORKFLOW_DEFINITION_ERROR",
            FastworkflowError::InheritanceCycle { .. } => "INHERITANCE_CYCLE",
            FastworkflowError::CommandNotFound { .. } => "COMMAND_NOT_FOUND",
            FastworkflowError::ContextNotFound { .. } => "CONTEXT_NOT_FOUND",
            FastworkflowError::AuthFailed(_) => "AUTH_FAILED",
            FastworkflowError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            FastworkflowError::ConversationNotFound(_) => "CONVERSATION_NOT_FOUND",
            FastworkflowError::Database(_) => "DATABASE_ERROR",
            FastworkflowError::LlmProvider(_) => "LLM_PROVIDER_ERROR",
            FastworkflowError::Serialization(_) => "SERIALIZATION_ERROR",
            FastworkflowError::Io(_) => "IO_ERROR",
            FastworkflowError::Timeout { .. } => "TIMEOUT",
            FastworkflowError::Cancelled => "CANCELLED",
            FastworkflowError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for defects that must abort process startup (bad schema, DAG cycle).
    pub fn is_fatal_at_load(&self) -> bool {
        matches!(
            self,
            FastworkflowError::Config(_)
                | FastworkflowError::WorkflowDefinition { .. }
                | FastworkflowError::InheritanceCycle { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FastworkflowError>;
