use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::instrument;

use fastworkflow_core::error::{FastworkflowError, Result};

use crate::definition::WorkflowDefinition;
use crate::handlers::{
    ContextClass, HandlerRegistry, ParamExtractionHooks, ResponseGenerator,
};

/// Which registered module a `get_command_class` lookup resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    ResponseGenerator,
    InputForParamExtraction,
    ParametersClass,
    ContextClass,
}

/// Process-owned workflow registry: memoizes `WorkflowDefinition`s per
/// resolved path and holds the application's handler registrations.
///
/// Read-mostly; loads use a write-once cache so concurrent readers are safe.
pub struct WorkflowRegistry {
    definitions: DashMap<PathBuf, Arc<WorkflowDefinition>>,
    handlers: HandlerRegistry,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            definitions: DashMap::new(),
            handlers: HandlerRegistry::new(),
        }
    }

    /// Load (or fetch the memoized) definition for a workflow directory.
    #[instrument(skip(self), fields(folderpath = %folderpath.display()))]
    pub fn load(&self, folderpath: &Path) -> Result<Arc<WorkflowDefinition>> {
        let key = folderpath
            .canonicalize()
            .map_err(|e| FastworkflowError::WorkflowDefinition {
                file: folderpath.display().to_string(),
                reason: e.to_string(),
            })?;
        if let Some(existing) = self.definitions.get(&key) {
            return Ok(existing.clone());
        }
        let definition = Arc::new(WorkflowDefinition::load(&key)?);
        // entry() handles the race where two callers load the same path:
        // the first insert wins and both get the same Arc.
        let entry = self
            .definitions
            .entry(key)
            .or_insert_with(|| definition.clone());
        Ok(entry.clone())
    }

    /// Definition previously loaded for this path, if any.
    pub fn get_definition(&self, folderpath: &Path) -> Option<Arc<WorkflowDefinition>> {
        let key = folderpath.canonicalize().ok()?;
        self.definitions.get(&key).map(|e| e.clone())
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn response_generator(&self, command_name: &str) -> Option<Arc<dyn ResponseGenerator>> {
        self.handlers.response_generator(command_name)
    }

    pub fn param_hooks(&self, command_name: &str) -> Option<Arc<dyn ParamExtractionHooks>> {
        self.handlers.param_hooks(command_name)
    }

    pub fn context_class(&self, context_name: &str) -> Option<Arc<dyn ContextClass>> {
        self.handlers.context_class(context_name)
    }

    /// True when a module of `kind` is registered/declared for the command.
    pub fn has_command_class(
        &self,
        definition: &WorkflowDefinition,
        command_name: &str,
        kind: ModuleKind,
    ) -> bool {
        match kind {
            ModuleKind::ResponseGenerator => self.response_generator(command_name).is_some(),
            ModuleKind::InputForParamExtraction => self.param_hooks(command_name).is_some(),
            ModuleKind::ParametersClass => definition
                .command(command_name)
                .map(|c| c.has_parameters())
                .unwrap_or(false),
            ModuleKind::ContextClass => {
                let context = crate::split_qualified(command_name).0;
                self.context_class(context).is_some()
            }
        }
    }

    /// Drop all cached definitions and registrations (teardown dual of the
    /// explicit initialization step).
    pub fn clear(&self) {
        self.definitions.clear();
        self.handlers.clear();
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}
