pub mod agent;
pub mod engine;
pub mod traces;

pub use engine::{ConversationRef, Engine, InvocationResult, StreamFormat};
pub use traces::TraceCollector;
