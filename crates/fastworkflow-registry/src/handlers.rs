use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use fastworkflow_core::error::Result;
use fastworkflow_core::types::{CommandOutput, ExtractedParameters};

/// An application object that can hold command focus.
///
/// The navigator never inspects the object beyond its context name; command
/// code downcasts through `as_any`.
pub trait CommandContext: Any + Send + Sync {
    /// The context (class) name used for command routing.
    fn context_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// The mutable workflow surface visible to command code.
///
/// Implemented by the session crate's `Workflow`; defining the trait here
/// keeps response generators registrable in the workflow registry without a
/// dependency cycle.
pub trait WorkflowContext: Send {
    fn id(&self) -> &str;

    fn current_command_context(&self) -> Option<Arc<dyn CommandContext>>;

    /// Response generators may change focus by assigning here.
    fn set_current_command_context(&mut self, obj: Option<Arc<dyn CommandContext>>);

    fn current_command_context_name(&self) -> String;

    fn context_value(&self, key: &str) -> Option<Value>;

    fn set_context_value(&mut self, key: &str, value: Value);
}

/// Produces the user-facing output of one command invocation.
pub trait ResponseGenerator: Send + Sync {
    fn respond(
        &self,
        workflow: &mut dyn WorkflowContext,
        command_text: &str,
        parameters: &ExtractedParameters,
    ) -> Result<CommandOutput>;
}

/// Optional per-command hooks driving parameter extraction and validation.
pub trait ParamExtractionHooks: Send + Sync {
    /// Return the set of valid key values for a `db_lookup` field.
    fn db_lookup(
        &self,
        _workflow: &dyn WorkflowContext,
        _command_name: &str,
        _field: &str,
    ) -> Vec<String> {
        Vec::new()
    }

    /// Mutate the record before validation (e.g. insert a leading `#`).
    fn process_extracted_parameters(
        &self,
        _workflow: &dyn WorkflowContext,
        _command_name: &str,
        _parameters: &mut ExtractedParameters,
    ) {
    }

    /// Domain validation after the generic checks; may mutate the record.
    fn validate_extracted_parameters(
        &self,
        _workflow: &dyn WorkflowContext,
        _command_name: &str,
        _parameters: &mut ExtractedParameters,
    ) -> (bool, String) {
        (true, String::new())
    }
}

/// User-defined accessors for a context class.
pub trait ContextClass: Send + Sync {
    /// The parent of `obj`, or `None` when the context class has no parent
    /// notion for this object.
    fn get_parent(&self, obj: &Arc<dyn CommandContext>) -> Option<Arc<dyn CommandContext>>;

    /// Human-readable name for the focused object; defaults to the class name.
    fn get_displayname(&self, _obj: &Arc<dyn CommandContext>) -> Option<String> {
        None
    }
}

/// Process-owned registration of application code: response generators and
/// extraction hooks keyed by qualified command name, context classes keyed by
/// context name.
///
/// Initialization is a single explicit step at startup; `clear` is the
/// teardown dual (used by tests).
#[derive(Default)]
pub struct HandlerRegistry {
    response_generators: DashMap<String, Arc<dyn ResponseGenerator>>,
    param_hooks: DashMap<String, Arc<dyn ParamExtractionHooks>>,
    context_classes: DashMap<String, Arc<dyn ContextClass>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_response_generator(
        &self,
        command_name: &str,
        generator: Arc<dyn ResponseGenerator>,
    ) {
        self.response_generators
            .insert(command_name.to_string(), generator);
    }

    pub fn register_param_hooks(&self, command_name: &str, hooks: Arc<dyn ParamExtractionHooks>) {
        self.param_hooks.insert(command_name.to_string(), hooks);
    }

    pub fn register_context_class(&self, context_name: &str, class: Arc<dyn ContextClass>) {
        self.context_classes.insert(context_name.to_string(), class);
    }

    pub fn response_generator(&self, command_name: &str) -> Option<Arc<dyn ResponseGenerator>> {
        self.response_generators.get(command_name).map(|e| e.clone())
    }

    pub fn param_hooks(&self, command_name: &str) -> Option<Arc<dyn ParamExtractionHooks>> {
        self.param_hooks.get(command_name).map(|e| e.clone())
    }

    pub fn context_class(&self, context_name: &str) -> Option<Arc<dyn ContextClass>> {
        self.context_classes.get(context_name).map(|e| e.clone())
    }

    pub fn clear(&self) {
        self.response_generators.clear();
        self.param_hooks.clear();
        self.context_classes.clear();
    }
}
