use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use fastworkflow_core::error::{FastworkflowError, Result};

use crate::builtins;
use crate::inheritance::ContextInheritanceModel;
use crate::schema::CommandDescriptor;
use crate::GLOBAL_CONTEXT;

pub const COMMANDS_DIRNAME: &str = "_commands";
/// Per-command labeled trainsets for few-shot parameter extraction.
pub const COMMAND_INFO_DIRNAME: &str = "___command_info";
/// Utterance cache databases live here, keyed by workflow id.
pub const CONVO_INFO_DIRNAME: &str = "___convo_info";

/// The static shape of one workflow directory: its context inheritance DAG,
/// the qualified command set per context, and each command's schema and
/// utterance metadata. Immutable after `load`.
#[derive(Debug)]
pub struct WorkflowDefinition {
    pub folderpath: PathBuf,
    pub inheritance: ContextInheritanceModel,
    commands: BTreeMap<String, CommandDescriptor>,
    contexts_with_commands: BTreeSet<String>,
}

impl WorkflowDefinition {
    /// Discover and validate a workflow directory. Pure — the same folder
    /// always yields the same definition; memoization lives in
    /// `WorkflowRegistry`.
    pub fn load(folderpath: &Path) -> Result<Self> {
        if !folderpath.is_dir() {
            return Err(FastworkflowError::WorkflowDefinition {
                file: folderpath.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }
        let folderpath = folderpath
            .canonicalize()
            .map_err(|e| FastworkflowError::WorkflowDefinition {
                file: folderpath.display().to_string(),
                reason: e.to_string(),
            })?;

        let inheritance = ContextInheritanceModel::load(&folderpath)?;

        let commands_dir = folderpath.join(COMMANDS_DIRNAME);
        if !commands_dir.is_dir() {
            return Err(FastworkflowError::WorkflowDefinition {
                file: commands_dir.display().to_string(),
                reason: "workflow has no _commands directory".to_string(),
            });
        }

        let mut commands = BTreeMap::new();
        let mut contexts_with_commands = BTreeSet::new();
        scan_commands_dir(&commands_dir, &mut commands, &mut contexts_with_commands)?;

        for builtin in builtins::builtin_commands() {
            commands.insert(builtin.qualified_name.clone(), builtin);
        }

        // Every parent named in the model must exist either as a command
        // context or as another model entry.
        let known: BTreeSet<&str> = inheritance
            .contexts()
            .chain(contexts_with_commands.iter().map(String::as_str))
            .collect();
        for context in inheritance.contexts() {
            for ancestor in inheritance.ancestors(context) {
                if ancestor != GLOBAL_CONTEXT && !known.contains(ancestor.as_str()) {
                    return Err(FastworkflowError::WorkflowDefinition {
                        file: folderpath
                            .join(crate::inheritance::MODEL_FILENAME)
                            .display()
                            .to_string(),
                        reason: format!("unknown parent context '{ancestor}'"),
                    });
                }
            }
        }

        info!(
            workflow = %folderpath.display(),
            commands = commands.len(),
            contexts = contexts_with_commands.len(),
            "workflow definition loaded"
        );

        Ok(Self {
            folderpath,
            inheritance,
            commands,
            contexts_with_commands,
        })
    }

    pub fn command(&self, qualified_name: &str) -> Option<&CommandDescriptor> {
        self.commands.get(qualified_name)
    }

    pub fn commands(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands.values()
    }

    /// All qualified command names reachable from `context_name`: the
    /// context's own commands, commands inherited from every ancestor in the
    /// inheritance DAG, globals, and the built-in error-correction and
    /// intent-detection commands.
    pub fn get_command_names(&self, context_name: &str) -> BTreeSet<String> {
        let mut chain = vec![context_name.to_string()];
        chain.extend(self.inheritance.ancestors(context_name));
        chain.push(builtins::ERROR_CORRECTION.to_string());
        chain.push(builtins::INTENT_DETECTION.to_string());

        let mut names = BTreeSet::new();
        for ctx in &chain {
            for cmd in self.commands.values().filter(|c| &c.context == ctx) {
                names.insert(cmd.qualified_name.clone());
            }
        }
        names
    }

    /// Commands of exactly one context (no inheritance, no builtins).
    /// The misunderstanding-clarification universe is built from this.
    pub fn own_command_names(&self, context_name: &str) -> BTreeSet<String> {
        self.commands
            .values()
            .filter(|c| c.context == context_name)
            .map(|c| c.qualified_name.clone())
            .collect()
    }

    /// The parent chain of `context_name` for the intent-detection walk:
    /// the context itself first, then ancestors up to the root.
    pub fn context_chain(&self, context_name: &str) -> Vec<String> {
        let mut chain = vec![context_name.to_string()];
        chain.extend(self.inheritance.ancestors(context_name));
        chain
    }

    /// Display text listing every command available in `context_name`,
    /// with parameter signatures, grouped for "what can i do" output.
    pub fn command_display_text(&self, context_name: &str) -> String {
        let mut lines = Vec::new();
        for name in self.get_command_names(context_name) {
            let Some(cmd) = self.commands.get(&name) else {
                continue;
            };
            if cmd.is_builtin {
                continue;
            }
            lines.push(format!("  {}", cmd.signature()));
        }
        let mut out = format!("Commands available in context '{context_name}':\n");
        out.push_str(&lines.join("\n"));
        out.push_str("\n\nor type 'what can i do' to see this list again");
        out
    }

    pub fn trainset_path(&self, command_name: &str) -> PathBuf {
        let bare = crate::split_qualified(command_name).1;
        self.folderpath
            .join(COMMAND_INFO_DIRNAME)
            .join(format!("{bare}_param_labeled.json"))
    }

    pub fn convo_info_dir(&self) -> PathBuf {
        self.folderpath.join(CONVO_INFO_DIRNAME)
    }
}

fn scan_commands_dir(
    commands_dir: &Path,
    commands: &mut BTreeMap<String, CommandDescriptor>,
    contexts: &mut BTreeSet<String>,
) -> Result<()> {
    let entries = std::fs::read_dir(commands_dir).map_err(|e| {
        FastworkflowError::WorkflowDefinition {
            file: commands_dir.display().to_string(),
            reason: e.to_string(),
        }
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.starts_with('_') || stem.starts_with('.') {
            continue;
        }

        if path.is_dir() {
            // A context directory: _commands/<Context>/<command>.json
            let context = stem.to_string();
            for cmd_entry in std::fs::read_dir(&path)
                .map_err(|e| FastworkflowError::WorkflowDefinition {
                    file: path.display().to_string(),
                    reason: e.to_string(),
                })?
                .flatten()
            {
                let cmd_path = cmd_entry.path();
                if cmd_path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(name) = cmd_path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if name.starts_with('_') {
                    continue;
                }
                let descriptor = CommandDescriptor::load(&cmd_path, &context, name)?;
                debug!(command = %descriptor.qualified_name, "command discovered");
                commands.insert(descriptor.qualified_name.clone(), descriptor);
            }
            contexts.insert(context);
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            // A global command: _commands/<command>.json
            let descriptor = CommandDescriptor::load(&path, GLOBAL_CONTEXT, stem)?;
            debug!(command = %descriptor.qualified_name, "global command discovered");
            commands.insert(descriptor.qualified_name.clone(), descriptor);
        }
    }
    Ok(())
}
