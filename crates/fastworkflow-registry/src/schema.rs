use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use fastworkflow_core::error::{FastworkflowError, Result};
use fastworkflow_core::types::ParamValue;

/// The tagged kind of a command parameter field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    StringList,
    Enum,
}

impl FieldKind {
    /// The sentinel value a field of this kind starts with when no declared
    /// default exists.
    pub fn sentinel(&self) -> ParamValue {
        match self {
            FieldKind::String | FieldKind::Enum => ParamValue::NotFound,
            FieldKind::Integer => ParamValue::InvalidInt,
            FieldKind::Float => ParamValue::InvalidFloat,
            FieldKind::Boolean | FieldKind::StringList => ParamValue::Null,
        }
    }
}

/// Raw on-disk field declaration. Parsed then validated into `FieldSpec`.
#[derive(Debug, Clone, Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    kind: FieldKind,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default, rename = "enum")]
    enum_values: Vec<String>,
    #[serde(default)]
    examples: Vec<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    db_lookup: bool,
    #[serde(default)]
    available_from: Option<String>,
    #[serde(default)]
    used_by: Option<String>,
}

/// One field of a command's parameter schema, immutable after load.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<ParamValue>,
    /// Anchored at load so matches are always full-string.
    pub pattern: Option<Regex>,
    /// The declared pattern as written, for error messages.
    pub pattern_str: Option<String>,
    pub enum_values: Vec<String>,
    pub examples: Vec<String>,
    pub description: String,
    pub db_lookup: bool,
    pub available_from: Option<String>,
    pub used_by: Option<String>,
}

impl FieldSpec {
    /// Initial value: declared default, else the kind sentinel.
    pub fn initial_value(&self) -> ParamValue {
        self.default.clone().unwrap_or_else(|| self.kind.sentinel())
    }

    fn from_raw(raw: RawField, file: &Path) -> Result<Self> {
        let pattern = match &raw.pattern {
            Some(p) => Some(Regex::new(&format!("^(?:{p})$")).map_err(|e| {
                FastworkflowError::WorkflowDefinition {
                    file: file.display().to_string(),
                    reason: format!("field '{}' has an invalid pattern: {e}", raw.name),
                }
            })?),
            None => None,
        };
        if raw.kind == FieldKind::Enum && raw.enum_values.is_empty() {
            return Err(FastworkflowError::WorkflowDefinition {
                file: file.display().to_string(),
                reason: format!("enum field '{}' declares no values", raw.name),
            });
        }
        let default = match &raw.default {
            Some(v) => Some(coerce_default(&raw.kind, v).ok_or_else(|| {
                FastworkflowError::WorkflowDefinition {
                    file: file.display().to_string(),
                    reason: format!("field '{}' default does not match its type", raw.name),
                }
            })?),
            None => None,
        };
        let description = raw
            .description
            .unwrap_or_else(|| format!("The {}", raw.name));
        Ok(Self {
            name: raw.name,
            kind: raw.kind,
            required: raw.required,
            default,
            pattern,
            pattern_str: raw.pattern,
            enum_values: raw.enum_values,
            examples: raw.examples,
            description,
            db_lookup: raw.db_lookup,
            available_from: raw.available_from,
            used_by: raw.used_by,
        })
    }
}

fn coerce_default(kind: &FieldKind, value: &Value) -> Option<ParamValue> {
    match kind {
        FieldKind::String | FieldKind::Enum => value.as_str().map(|s| ParamValue::Str(s.into())),
        FieldKind::Integer => value.as_i64().map(ParamValue::Int),
        FieldKind::Float => value.as_f64().map(ParamValue::Float),
        FieldKind::Boolean => value.as_bool().map(ParamValue::Bool),
        FieldKind::StringList => value.as_array().map(|items| {
            ParamValue::List(
                items
                    .iter()
                    .map(|v| match v.as_str() {
                        Some(s) => s.to_string(),
                        None => v.to_string(),
                    })
                    .collect(),
            )
        }),
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Vec<RawField>,
    #[serde(default)]
    plain_utterances: Vec<String>,
    #[serde(default)]
    template_utterances: Vec<String>,
}

/// A command descriptor, immutable after registration.
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    /// Fully qualified name (`Context/command` or bare for global).
    pub qualified_name: String,
    /// Context class name or `*`.
    pub context: String,
    /// Bare command name.
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub parameters: Vec<FieldSpec>,
    pub plain_utterances: Vec<String>,
    pub template_utterances: Vec<String>,
    /// Built-in error-correction / intent-detection commands bypass dispatch
    /// to application response generators.
    pub is_builtin: bool,
}

impl CommandDescriptor {
    /// Parse a descriptor JSON file for `context`/`name`.
    pub fn load(file: &Path, context: &str, name: &str) -> Result<Self> {
        let text = std::fs::read_to_string(file).map_err(|e| {
            FastworkflowError::WorkflowDefinition {
                file: file.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        let raw: RawDescriptor =
            serde_json::from_str(&text).map_err(|e| FastworkflowError::WorkflowDefinition {
                file: file.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut parameters = Vec::with_capacity(raw.parameters.len());
        let mut seen = std::collections::HashSet::new();
        for raw_field in raw.parameters {
            if !seen.insert(raw_field.name.clone()) {
                return Err(FastworkflowError::WorkflowDefinition {
                    file: file.display().to_string(),
                    reason: format!("duplicate parameter '{}'", raw_field.name),
                });
            }
            parameters.push(FieldSpec::from_raw(raw_field, file)?);
        }

        Ok(Self {
            qualified_name: crate::qualify(context, name),
            context: context.to_string(),
            name: name.to_string(),
            display_name: raw.display_name.unwrap_or_else(|| name.replace('_', " ")),
            description: raw.description.unwrap_or_default(),
            parameters,
            plain_utterances: raw.plain_utterances,
            template_utterances: raw.template_utterances,
            is_builtin: false,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.parameters.iter().find(|f| f.name == name)
    }

    /// True when the command declares no parameters at all — extraction is
    /// skipped entirely for these.
    pub fn has_parameters(&self) -> bool {
        !self.parameters.is_empty()
    }

    /// Display signature used by "what can i do" listings:
    /// `name(field1, field2, ...)`.
    pub fn signature(&self) -> String {
        if self.parameters.is_empty() {
            return self.name.clone();
        }
        let fields: Vec<&str> = self.parameters.iter().map(|f| f.name.as_str()).collect();
        format!("{}({})", self.name, fields.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_descriptor(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(format!("{name}.json"));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn load_parses_schema_and_utterances() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_descriptor(
            dir.path(),
            "cancel_pending_order",
            r##"{
                "display_name": "Cancel pending order",
                "parameters": [
                    {"name": "order_id", "type": "string", "required": true,
                     "pattern": "#W\\d+", "examples": ["#W0000001"], "db_lookup": true},
                    {"name": "reason", "type": "enum", "required": true,
                     "enum": ["no longer needed", "ordered by mistake"]}
                ],
                "plain_utterances": ["cancel my order"],
                "template_utterances": ["cancel order <order_id>"]
            }"##,
        );
        let desc = CommandDescriptor::load(&path, "*", "cancel_pending_order").unwrap();
        assert_eq!(desc.qualified_name, "cancel_pending_order");
        assert_eq!(desc.parameters.len(), 2);
        assert!(desc.parameters[0].pattern.is_some());
        assert!(desc.parameters[0].db_lookup);
        assert_eq!(desc.parameters[1].enum_values.len(), 2);
        assert_eq!(desc.signature(), "cancel_pending_order(order_id, reason)");
    }

    #[test]
    fn invalid_pattern_is_fatal_and_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_descriptor(
            dir.path(),
            "bad",
            r#"{"parameters": [{"name": "x", "type": "string", "pattern": "["}]}"#,
        );
        let err = CommandDescriptor::load(&path, "*", "bad").unwrap_err();
        assert!(err.to_string().contains("bad.json"));
        assert!(err.is_fatal_at_load());
    }

    #[test]
    fn enum_without_values_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_descriptor(
            dir.path(),
            "bad_enum",
            r#"{"parameters": [{"name": "status", "type": "enum"}]}"#,
        );
        assert!(CommandDescriptor::load(&path, "*", "bad_enum").is_err());
    }

    #[test]
    fn sentinels_follow_field_kind() {
        assert_eq!(FieldKind::String.sentinel(), ParamValue::NotFound);
        assert_eq!(FieldKind::Integer.sentinel(), ParamValue::InvalidInt);
        assert_eq!(FieldKind::Float.sentinel(), ParamValue::InvalidFloat);
        assert_eq!(FieldKind::StringList.sentinel(), ParamValue::Null);
    }
}
