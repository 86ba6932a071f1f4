use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use fastworkflow_core::types::{context_keys, ExtractedParameters, NluPipelineStage};
use fastworkflow_registry::{CommandContext, WorkflowContext, WorkflowRegistry, GLOBAL_CONTEXT};

use crate::error::{Result, SessionError};

/// A live workflow instance: the persistent record plus the in-memory
/// command-context focus.
///
/// The context map holds the engine's transient keys (`command`,
/// `stored_parameters`, `NLU_Pipeline_Stage`) alongside application state;
/// only the map is persisted — command-context objects are rebuilt by the
/// application's startup command on reopen.
pub struct Workflow {
    id: String,
    folderpath: PathBuf,
    parent_id: Option<String>,
    is_complete: bool,
    context: Map<String, Value>,
    root_command_context: Option<Arc<dyn CommandContext>>,
    current_command_context: Option<Arc<dyn CommandContext>>,
    dirty: bool,
}

impl Workflow {
    pub fn new(folderpath: &Path, parent_id: Option<String>) -> Self {
        Self::with_id(Uuid::now_v7().to_string(), folderpath, parent_id)
    }

    pub fn with_id(id: String, folderpath: &Path, parent_id: Option<String>) -> Self {
        Self {
            id,
            folderpath: folderpath.to_path_buf(),
            parent_id,
            is_complete: false,
            context: Map::new(),
            root_command_context: None,
            current_command_context: None,
            dirty: true,
        }
    }

    pub(crate) fn from_parts(
        id: String,
        folderpath: PathBuf,
        parent_id: Option<String>,
        is_complete: bool,
        context: Map<String, Value>,
    ) -> Self {
        Self {
            id,
            folderpath,
            parent_id,
            is_complete,
            context,
            root_command_context: None,
            current_command_context: None,
            dirty: false,
        }
    }

    pub fn folderpath(&self) -> &Path {
        &self.folderpath
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn set_complete(&mut self, value: bool) {
        self.is_complete = value;
        self.dirty = true;
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    /// Replace the context map wholesale. Used to roll back transient
    /// per-turn state after a timeout; prior-turn `stored_parameters`
    /// survive because they are part of the snapshot.
    pub fn restore_context(&mut self, context: Map<String, Value>) {
        self.context = context;
        self.dirty = true;
    }

    // ── Command context navigation (C2) ────────────────────────────────────

    pub fn root_command_context(&self) -> Option<Arc<dyn CommandContext>> {
        self.root_command_context.clone()
    }

    /// Set the root context object. Assigning a second time is an error;
    /// the current context snaps to the new root.
    pub fn set_root_command_context(&mut self, obj: Arc<dyn CommandContext>) -> Result<()> {
        if self.root_command_context.is_some() {
            return Err(SessionError::RootAlreadySet);
        }
        self.current_command_context = Some(obj.clone());
        self.root_command_context = Some(obj);
        Ok(())
    }

    pub fn is_current_command_context_root(&self) -> bool {
        match (&self.current_command_context, &self.root_command_context) {
            (Some(current), Some(root)) => Arc::ptr_eq(current, root),
            (None, None) => true,
            _ => false,
        }
    }

    /// Display name of the focused object: the context class's
    /// `get_displayname` if defined, else the class name (`global` for `*`).
    pub fn current_command_context_displayname(&self, registry: &WorkflowRegistry) -> String {
        let name = self.current_command_context_name();
        if let (Some(obj), Some(class)) = (
            &self.current_command_context,
            registry.context_class(&name),
        ) {
            if let Some(display) = class.get_displayname(obj) {
                return display;
            }
        }
        if name == GLOBAL_CONTEXT {
            "global".to_string()
        } else {
            name
        }
    }

    /// The parent of `obj`: delegates to the context class's accessor,
    /// returns the root when no accessor is registered, and `None` iff the
    /// object already is the root.
    pub fn get_parent(
        &self,
        registry: &WorkflowRegistry,
        obj: &Arc<dyn CommandContext>,
    ) -> Option<Arc<dyn CommandContext>> {
        if let Some(root) = &self.root_command_context {
            if Arc::ptr_eq(obj, root) {
                return None;
            }
        }
        match registry.context_class(obj.context_name()) {
            Some(class) => class.get_parent(obj),
            None => self.root_command_context.clone(),
        }
    }

    // ── NLU pipeline state held in the context map ─────────────────────────

    pub fn pipeline_stage(&self) -> NluPipelineStage {
        self.context
            .get(context_keys::NLU_PIPELINE_STAGE)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn set_pipeline_stage(&mut self, stage: NluPipelineStage) {
        self.context.insert(
            context_keys::NLU_PIPELINE_STAGE.to_string(),
            serde_json::to_value(stage).unwrap_or(Value::Null),
        );
        self.dirty = true;
    }

    /// The preserved parameter-bearing command text, if any.
    pub fn command_text(&self) -> Option<String> {
        self.context
            .get(context_keys::COMMAND)
            .and_then(Value::as_str)
            .map(String::from)
    }

    /// Write the command text, overwriting only if no value is set. This
    /// keeps the original parameter-bearing utterance through clarification
    /// flows.
    pub fn preserve_command_text(&mut self, command: &str) {
        if self.context.get(context_keys::COMMAND).is_none() {
            self.context.insert(
                context_keys::COMMAND.to_string(),
                Value::String(command.to_string()),
            );
            self.dirty = true;
        }
    }

    pub fn stored_parameters(&self) -> Option<ExtractedParameters> {
        self.context
            .get(context_keys::STORED_PARAMETERS)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn store_parameters(&mut self, params: &ExtractedParameters) {
        if let Ok(value) = serde_json::to_value(params) {
            self.context
                .insert(context_keys::STORED_PARAMETERS.to_string(), value);
            self.dirty = true;
        }
    }

    pub fn clear_stored_parameters(&mut self) {
        if self.context.remove(context_keys::STORED_PARAMETERS).is_some() {
            self.dirty = true;
        }
    }

    /// Clear the transient turn state and reset the stage to intent
    /// detection.
    pub fn end_command_processing(&mut self) {
        self.context.remove(context_keys::COMMAND);
        self.context.remove(context_keys::COMMAND_NAME);
        self.context.remove(context_keys::STORED_PARAMETERS);
        self.set_pipeline_stage(NluPipelineStage::IntentDetection);
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl WorkflowContext for Workflow {
    fn id(&self) -> &str {
        &self.id
    }

    fn current_command_context(&self) -> Option<Arc<dyn CommandContext>> {
        self.current_command_context.clone()
    }

    fn set_current_command_context(&mut self, obj: Option<Arc<dyn CommandContext>>) {
        self.current_command_context = obj;
    }

    fn current_command_context_name(&self) -> String {
        self.current_command_context
            .as_ref()
            .map(|obj| obj.context_name().to_string())
            .unwrap_or_else(|| GLOBAL_CONTEXT.to_string())
    }

    fn context_value(&self, key: &str) -> Option<Value> {
        self.context.get(key).cloned()
    }

    fn set_context_value(&mut self, key: &str, value: Value) {
        if value.is_null() {
            self.context.remove(key);
        } else {
            self.context.insert(key.to_string(), value);
        }
        self.dirty = true;
    }
}
