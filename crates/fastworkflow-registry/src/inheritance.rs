use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use fastworkflow_core::error::{FastworkflowError, Result};

use crate::GLOBAL_CONTEXT;

pub const MODEL_FILENAME: &str = "context_inheritance_model.json";

#[derive(Debug, Clone, Deserialize)]
struct RawContextEntry {
    #[serde(default)]
    base: Vec<String>,
}

/// The context inheritance DAG, rooted at the sentinel `*`.
///
/// Loaded from `context_inheritance_model.json`; contexts that appear only in
/// the `_commands/` tree (no model entry) implicitly inherit `*` alone.
#[derive(Debug, Clone, Default)]
pub struct ContextInheritanceModel {
    bases: BTreeMap<String, Vec<String>>,
}

impl ContextInheritanceModel {
    /// Load the model file if present; an absent file yields the empty model.
    pub fn load(workflow_folderpath: &Path) -> Result<Self> {
        let file = workflow_folderpath.join(MODEL_FILENAME);
        if !file.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&file).map_err(|e| {
            FastworkflowError::WorkflowDefinition {
                file: file.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        let raw: HashMap<String, RawContextEntry> =
            serde_json::from_str(&text).map_err(|e| FastworkflowError::WorkflowDefinition {
                file: file.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut bases = BTreeMap::new();
        for (context, entry) in raw {
            if context == GLOBAL_CONTEXT {
                return Err(FastworkflowError::WorkflowDefinition {
                    file: file.display().to_string(),
                    reason: "the global context '*' cannot declare bases".to_string(),
                });
            }
            bases.insert(context, entry.base);
        }

        let model = Self { bases };
        model.check_acyclic(&file)?;
        Ok(model)
    }

    pub fn contexts(&self) -> impl Iterator<Item = &str> {
        self.bases.keys().map(String::as_str)
    }

    /// Ancestors of `context` in declaration order, deduplicated, always
    /// ending with `*`. The context itself is not included.
    pub fn ancestors(&self, context: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.collect_ancestors(context, &mut out, &mut seen);
        if context != GLOBAL_CONTEXT && seen.insert(GLOBAL_CONTEXT.to_string()) {
            out.push(GLOBAL_CONTEXT.to_string());
        }
        out
    }

    fn collect_ancestors(&self, context: &str, out: &mut Vec<String>, seen: &mut HashSet<String>) {
        let Some(bases) = self.bases.get(context) else {
            return;
        };
        for base in bases {
            if seen.insert(base.clone()) {
                out.push(base.clone());
                self.collect_ancestors(base, out, seen);
            }
        }
    }

    fn check_acyclic(&self, file: &Path) -> Result<()> {
        // DFS with three colors: 0 unvisited, 1 on-stack, 2 done.
        let mut color: HashMap<&str, u8> = HashMap::new();
        for context in self.bases.keys() {
            if color.get(context.as_str()).copied().unwrap_or(0) == 0 {
                self.dfs(context, &mut color, file)?;
            }
        }
        Ok(())
    }

    fn dfs<'a>(
        &'a self,
        context: &'a str,
        color: &mut HashMap<&'a str, u8>,
        file: &Path,
    ) -> Result<()> {
        color.insert(context, 1);
        if let Some(bases) = self.bases.get(context) {
            for base in bases {
                match color.get(base.as_str()).copied().unwrap_or(0) {
                    1 => {
                        tracing::error!(file = %file.display(), context = %base, "context inheritance cycle");
                        return Err(FastworkflowError::InheritanceCycle {
                            context: base.clone(),
                        });
                    }
                    0 => self.dfs(base, color, file)?,
                    _ => {}
                }
            }
        }
        color.insert(context, 2);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn model_from(dir: &Path, body: &str) -> Result<ContextInheritanceModel> {
        let path = dir.join(MODEL_FILENAME);
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        ContextInheritanceModel::load(dir)
    }

    #[test]
    fn missing_model_file_is_empty_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = ContextInheritanceModel::load(dir.path()).unwrap();
        assert_eq!(model.ancestors("Anything"), vec![GLOBAL_CONTEXT.to_string()]);
    }

    #[test]
    fn ancestors_walk_the_dag_and_end_at_root() {
        let dir = tempfile::tempdir().unwrap();
        let model = model_from(
            dir.path(),
            r#"{
                "TodoItem": {"base": ["TodoList"]},
                "TodoList": {"base": ["TodoListManager"]},
                "TodoListManager": {"base": []}
            }"#,
        )
        .unwrap();
        assert_eq!(
            model.ancestors("TodoItem"),
            vec!["TodoList", "TodoListManager", "*"]
        );
        assert_eq!(model.ancestors("TodoListManager"), vec!["*"]);
    }

    #[test]
    fn diamond_inheritance_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let model = model_from(
            dir.path(),
            r#"{
                "D": {"base": ["B", "C"]},
                "B": {"base": ["A"]},
                "C": {"base": ["A"]},
                "A": {"base": []}
            }"#,
        )
        .unwrap();
        assert_eq!(model.ancestors("D"), vec!["B", "A", "C", "*"]);
    }

    #[test]
    fn cycle_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = model_from(
            dir.path(),
            r#"{"A": {"base": ["B"]}, "B": {"base": ["A"]}}"#,
        )
        .unwrap_err();
        assert!(err.is_fatal_at_load());
    }

    #[test]
    fn global_context_cannot_declare_bases() {
        let dir = tempfile::tempdir().unwrap();
        assert!(model_from(dir.path(), r#"{"*": {"base": ["A"]}}"#).is_err());
    }
}
