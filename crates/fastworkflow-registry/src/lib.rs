pub mod builtins;
pub mod definition;
pub mod handlers;
pub mod inheritance;
pub mod registry;
pub mod schema;

pub use definition::WorkflowDefinition;
pub use handlers::{
    CommandContext, ContextClass, HandlerRegistry, ParamExtractionHooks, ResponseGenerator,
    WorkflowContext,
};
pub use registry::{ModuleKind, WorkflowRegistry};
pub use schema::{CommandDescriptor, FieldKind, FieldSpec};

/// The sentinel context name for global commands.
pub const GLOBAL_CONTEXT: &str = "*";

/// Split a qualified command name into `(context, bare name)`.
/// Bare names belong to the global context.
pub fn split_qualified(name: &str) -> (&str, &str) {
    match name.split_once('/') {
        Some((ctx, bare)) => (ctx, bare),
        None => (GLOBAL_CONTEXT, name),
    }
}

/// Join a context and bare command name into the qualified form.
pub fn qualify(context: &str, bare: &str) -> String {
    if context == GLOBAL_CONTEXT {
        bare.to_string()
    } else {
        format!("{context}/{bare}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_roundtrip() {
        assert_eq!(split_qualified("TodoList/add_item"), ("TodoList", "add_item"));
        assert_eq!(split_qualified("startup"), (GLOBAL_CONTEXT, "startup"));
        assert_eq!(qualify("TodoList", "add_item"), "TodoList/add_item");
        assert_eq!(qualify(GLOBAL_CONTEXT, "startup"), "startup");
    }
}
