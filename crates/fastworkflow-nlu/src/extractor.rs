use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fastworkflow_core::config::NluConfig;
use fastworkflow_core::types::{ExtractedParameters, ParamValue};
use fastworkflow_llm::{ChatRequest, LlmProvider};
use fastworkflow_registry::{
    CommandDescriptor, FieldSpec, WorkflowContext, WorkflowDefinition, WorkflowRegistry,
};

use crate::coerce;
use crate::fuzzy;

/// Result of one extraction + validation pass.
#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    pub parameters_are_valid: bool,
    pub parameters: ExtractedParameters,
    pub error_message: Option<String>,
    pub suggestions: BTreeMap<String, Vec<String>>,
    pub missing_invalid_fields: Vec<String>,
}

/// LLM + regex parameter extraction with cross-turn merge and validation
/// (C5).
#[derive(Clone)]
pub struct ParameterExtractor {
    provider: Arc<dyn LlmProvider>,
    model: String,
    config: NluConfig,
}

impl ParameterExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, config: NluConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            config,
        }
    }

    /// Extract, merge with any prior partial record, and validate.
    ///
    /// Source priority: carry-over continuation when `prior` exists, else
    /// regex-tagged extraction (agentic mode), else LLM extraction. The
    /// returned record has every missing/invalid field written back as the
    /// kind sentinel.
    #[allow(clippy::too_many_arguments)]
    pub async fn extract(
        &self,
        registry: &WorkflowRegistry,
        definition: &WorkflowDefinition,
        descriptor: &CommandDescriptor,
        workflow: &mut dyn WorkflowContext,
        command_text: &str,
        prior: Option<ExtractedParameters>,
        agentic: bool,
        cancel: Option<&CancellationToken>,
    ) -> ExtractionOutput {
        if descriptor.parameters.is_empty() {
            return ExtractionOutput {
                parameters_are_valid: true,
                parameters: ExtractedParameters::default(),
                error_message: None,
                suggestions: BTreeMap::new(),
                missing_invalid_fields: Vec::new(),
            };
        }

        // The preserved text may still lead with the command name.
        let text = strip_command_name(command_text, &descriptor.name);

        let mut record = match &prior {
            Some(stored) => carry_over(descriptor, stored, &text),
            None => {
                let extracted = if agentic {
                    match extract_from_xml(descriptor, &text) {
                        Some(record) => Some(record),
                        None => self.llm_extract(definition, descriptor, &text, cancel).await,
                    }
                } else {
                    self.llm_extract(definition, descriptor, &text, cancel).await
                };
                extracted.unwrap_or_else(|| default_record(descriptor))
            }
        };

        let (is_valid, validation_message, suggestions, missing_invalid) =
            self.validate(registry, descriptor, workflow, &mut record);

        // Write sentinels back so the stored partial record stays typed.
        for field_name in &missing_invalid {
            if let Some(spec) = descriptor.field(field_name) {
                record.set(field_name, spec.kind.sentinel());
            }
        }

        if is_valid {
            return ExtractionOutput {
                parameters_are_valid: true,
                parameters: record,
                error_message: None,
                suggestions,
                missing_invalid_fields: missing_invalid,
            };
        }

        let mut message = String::new();
        let snapshot = format_parameters_for_display(&record);
        if !snapshot.is_empty() {
            message.push_str(&format!("Extracted parameters so far:\n{snapshot}\n\n"));
        }
        message.push_str(&validation_message);
        if agentic {
            message.push_str("\nCheck your command name if the wrong command was executed.");
        } else {
            message.push_str(
                "\nEnter 'abort' to get out of this error state and/or execute a different command.",
            );
            message.push_str("\nEnter 'you misunderstood' if the wrong command was executed.");
        }

        ExtractionOutput {
            parameters_are_valid: false,
            parameters: record,
            error_message: Some(message),
            suggestions,
            missing_invalid_fields: missing_invalid,
        }
    }

    /// Validate an already-built record without extraction — the
    /// `perform_action` bypass path. Missing/invalid fields are written back
    /// as sentinels exactly as in the full extraction flow.
    pub fn validate_record(
        &self,
        registry: &WorkflowRegistry,
        descriptor: &CommandDescriptor,
        workflow: &mut dyn WorkflowContext,
        mut record: ExtractedParameters,
    ) -> ExtractionOutput {
        let (is_valid, message, suggestions, missing_invalid) =
            self.validate(registry, descriptor, workflow, &mut record);
        for field_name in &missing_invalid {
            if let Some(spec) = descriptor.field(field_name) {
                record.set(field_name, spec.kind.sentinel());
            }
        }
        ExtractionOutput {
            parameters_are_valid: is_valid,
            parameters: record,
            error_message: (!is_valid).then_some(message),
            suggestions,
            missing_invalid_fields: missing_invalid,
        }
    }

    /// Validation over the merged record: required presence, pattern
    /// fullmatch, enum membership, `db_lookup` with canonical-spelling
    /// correction, then the optional domain validator. Mutates the record
    /// for canonicalization.
    fn validate(
        &self,
        registry: &WorkflowRegistry,
        descriptor: &CommandDescriptor,
        workflow: &mut dyn WorkflowContext,
        record: &mut ExtractedParameters,
    ) -> (bool, String, BTreeMap<String, Vec<String>>, Vec<String>) {
        let hooks = registry.param_hooks(&descriptor.qualified_name);
        if let Some(hooks) = &hooks {
            hooks.process_extracted_parameters(workflow, &descriptor.qualified_name, record);
        }

        let mut is_valid = true;
        let mut missing_fields: Vec<String> = Vec::new();
        let mut invalid_fields: Vec<String> = Vec::new();
        let mut all_suggestions: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for spec in &descriptor.parameters {
            let value = record.get(&spec.name).cloned().unwrap_or(ParamValue::Null);

            if spec.required && value.is_sentinel() {
                missing_fields.push(spec.name.clone());
                is_valid = false;
                continue;
            }
            if value.is_sentinel() {
                continue;
            }

            if let Some(pattern) = &spec.pattern {
                let text = value.display();
                if !pattern.is_match(&text) {
                    invalid_fields.push(format!("{} '{}'", spec.name, text));
                    let example = spec.examples.first().cloned().unwrap_or_default();
                    let shown = spec.pattern_str.as_deref().unwrap_or(pattern.as_str());
                    all_suggestions.insert(
                        spec.name.clone(),
                        vec![format!(
                            "Please use the format matching pattern {shown} (e.g., {example})"
                        )],
                    );
                    is_valid = false;
                    continue;
                }
            }

            if !spec.enum_values.is_empty() {
                if let Some((canonical, suggestions)) = check_enum(spec, &value) {
                    match canonical {
                        Some(spelling) => record.set(&spec.name, ParamValue::Str(spelling)),
                        None => {
                            invalid_fields.push(format!("{} '{}'", spec.name, value.display()));
                            if !suggestions.is_empty() {
                                all_suggestions.insert(spec.name.clone(), suggestions);
                            }
                            is_valid = false;
                            continue;
                        }
                    }
                }
            }

            if spec.db_lookup {
                if let Some(hooks) = &hooks {
                    let key_values =
                        hooks.db_lookup(workflow, &descriptor.qualified_name, &spec.name);
                    let (matched, corrected, suggestions) =
                        db_fuzzy_match(&value.display(), &key_values);
                    if matched {
                        if let Some(spelling) = corrected {
                            record.set(&spec.name, ParamValue::Str(spelling));
                        }
                    } else if !suggestions.is_empty() {
                        invalid_fields.push(format!("{} '{}'", spec.name, value.display()));
                        all_suggestions.insert(spec.name.clone(), suggestions);
                        is_valid = false;
                    }
                }
            }
        }

        let mut domain_message = String::new();
        if let Some(hooks) = &hooks {
            let (ok, message) =
                hooks.validate_extracted_parameters(workflow, &descriptor.qualified_name, record);
            if !ok {
                is_valid = false;
                domain_message = message;
            }
        }

        if is_valid {
            return (
                true,
                "All required parameters are valid.".to_string(),
                BTreeMap::new(),
                Vec::new(),
            );
        }

        let mut message = String::new();
        if !missing_fields.is_empty() {
            message.push_str(&self.config.missing_information_errmsg);
            let described: Vec<String> = missing_fields
                .iter()
                .map(|name| match descriptor.field(name) {
                    Some(spec) if !spec.enum_values.is_empty() => {
                        format!("{name} (one of: {})", spec.enum_values.join(", "))
                    }
                    _ => name.clone(),
                })
                .collect();
            message.push_str(&described.join(", "));
            message.push('\n');
        }
        if !invalid_fields.is_empty() {
            message.push_str(&self.config.invalid_information_errmsg);
            message.push_str(&invalid_fields.join(", "));
            message.push('\n');
        }
        for (field, suggestions) in &all_suggestions {
            if suggestions.is_empty() {
                continue;
            }
            let is_format_instruction = suggestions
                .iter()
                .any(|s| s.to_lowercase().contains("format") || s.to_lowercase().contains("pattern"));
            if is_format_instruction {
                message.push_str(&format!("\n{}: {}", field, suggestions.join(", ")));
            } else {
                message.push_str(&format!(
                    "\nDid you mean one of these {}s? {}",
                    field,
                    suggestions.join(", ")
                ));
            }
        }
        if !domain_message.is_empty() {
            message.push_str(&format!("\n{domain_message}"));
        }

        // Enumerate the still-needed fields in declared order, with the
        // comma rule appended.
        let mut combined: Vec<String> = Vec::new();
        for spec in &descriptor.parameters {
            let in_missing = missing_fields.contains(&spec.name);
            let in_invalid = invalid_fields
                .iter()
                .any(|f| f.split(" '").next() == Some(spec.name.as_str()));
            if in_missing || in_invalid {
                combined.push(spec.name.clone());
            }
        }
        if !combined.is_empty() {
            message.push_str(&format!(
                "\nProvide corrected parameter values in the exact order specified below, separated by commas:\n{}",
                combined.join(", ")
            ));
            message.push_str(
                "\nFor parameter values that include a comma, provide separately from other values, and one at a time.",
            );
        }

        (false, message, all_suggestions, combined)
    }

    /// Typed LLM extraction: a signature generated from the field schema,
    /// few-shot examples from the per-command labeled set, JSON output.
    /// Failures are logged and yield `None` so defaults apply.
    async fn llm_extract(
        &self,
        definition: &WorkflowDefinition,
        descriptor: &CommandDescriptor,
        command_text: &str,
        cancel: Option<&CancellationToken>,
    ) -> Option<ExtractedParameters> {
        let system = build_signature_instructions(descriptor);
        let mut user = String::new();
        for example in load_trainset(definition, descriptor, self.config.fewshot_k) {
            user.push_str(&example);
            user.push('\n');
        }
        user.push_str(&format!("Command: {command_text}\nOutput:"));

        let request = ChatRequest::prompt(self.model.clone(), system, user);
        let response = match self.provider.send(&request, cancel).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, command = %descriptor.qualified_name, "parameter extraction LLM call failed");
                return None;
            }
        };

        let json = parse_json_object(&response.content)?;
        let mut record = default_record(descriptor);
        for spec in &descriptor.parameters {
            if let Some(value) = json.get(&spec.name) {
                if let Some(coerced) = coerce::coerce_json(spec, value) {
                    record.set(&spec.name, coerced);
                }
            }
        }
        debug!(command = %descriptor.qualified_name, "LLM extraction complete");
        Some(record)
    }
}

/// Record with every field at its declared default or kind sentinel.
pub fn default_record(descriptor: &CommandDescriptor) -> ExtractedParameters {
    let mut record = ExtractedParameters::default();
    for spec in &descriptor.parameters {
        record.set(&spec.name, spec.initial_value());
    }
    record
}

fn strip_command_name(command_text: &str, command_name: &str) -> String {
    let trimmed = command_text.trim();
    let lowered = trimmed.to_lowercase();
    let name_lower = command_name.to_lowercase();
    if lowered.starts_with(&name_lower) {
        trimmed[command_name.len()..].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Error-state continuation: treat the utterance as additional field values
/// zipped onto the sentinel-valued fields in declared order.
fn carry_over(
    descriptor: &CommandDescriptor,
    stored: &ExtractedParameters,
    command_text: &str,
) -> ExtractedParameters {
    let mut record = stored.clone();
    // Keep any schema fields the stored record is missing.
    for spec in &descriptor.parameters {
        if record.get(&spec.name).is_none() {
            record.set(&spec.name, spec.initial_value());
        }
    }

    let fields_to_fill: Vec<String> = descriptor
        .parameters
        .iter()
        .filter(|spec| {
            record
                .get(&spec.name)
                .map(|v| v.is_sentinel())
                .unwrap_or(true)
        })
        .map(|spec| spec.name.clone())
        .collect();
    if fields_to_fill.is_empty() {
        return record;
    }

    let assign = |record: &mut ExtractedParameters, field: &str, raw: &str| {
        if let Some(spec) = descriptor.field(field) {
            if let Some(value) = coerce::coerce_str(spec, raw) {
                record.set(field, value);
            }
        }
    };

    let text = command_text.trim();
    if text.contains(',') {
        // Empty segments count toward the part total, so a malformed
        // double-comma answer falls into the mismatch branch.
        let parts: Vec<&str> = text.split(',').map(str::trim).collect();
        if parts.len() == fields_to_fill.len() {
            for (field, part) in fields_to_fill.iter().zip(parts.iter()) {
                assign(&mut record, field, part);
            }
        } else if let Some(first) = parts.first() {
            // Count mismatch: only the first sentinel field gets a value.
            assign(&mut record, &fields_to_fill[0], first);
        }
    } else if !text.is_empty() {
        assign(&mut record, &fields_to_fill[0], text);
    }

    record
}

/// Agentic-mode extraction of `<field>value</field>` tags. Returns `None`
/// when no tag matches, so the LLM path can take over.
fn extract_from_xml(descriptor: &CommandDescriptor, command_text: &str) -> Option<ExtractedParameters> {
    let mut record = default_record(descriptor);
    let mut matched_any = false;
    for spec in &descriptor.parameters {
        let pattern = format!(
            r"(?s)<{name}>(.+?)</{name}>",
            name = regex::escape(&spec.name)
        );
        let re = Regex::new(&pattern).ok()?;
        if let Some(captures) = re.captures(command_text) {
            let raw = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if let Some(value) = coerce::coerce_str(spec, raw) {
                record.set(&spec.name, value);
            }
            matched_any = true;
        }
    }
    matched_any.then_some(record)
}

/// Enum membership check. Returns `None` when the value already is a
/// canonical member; `Some((Some(spelling), _))` to canonicalize;
/// `Some((None, suggestions))` on a miss.
fn check_enum(spec: &FieldSpec, value: &ParamValue) -> Option<(Option<String>, Vec<String>)> {
    let text = value.display();
    if spec.enum_values.iter().any(|v| *v == text) {
        return None;
    }
    let lowered = text.to_lowercase();
    if let Some(canonical) = spec.enum_values.iter().find(|v| v.to_lowercase() == lowered) {
        return Some((Some(canonical.clone()), Vec::new()));
    }
    let suggestions = fuzzy::find_close_matches(
        &text,
        spec.enum_values.iter().map(String::as_str),
        3,
        0.8,
    );
    Some((None, suggestions))
}

/// Fuzzy lookup against a command's database keys: a lenient best match
/// silently corrects the spelling; otherwise up to top-3 suggestions.
fn db_fuzzy_match(value: &str, key_values: &[String]) -> (bool, Option<String>, Vec<String>) {
    if value.is_empty() || key_values.is_empty() {
        return (false, None, Vec::new());
    }
    if let Some((best, _)) =
        fuzzy::find_best_match(value, key_values.iter().map(String::as_str), 0.7)
    {
        return (true, Some(best), Vec::new());
    }
    let lowered = value.to_lowercase();
    if let Some(exact) = key_values.iter().find(|k| k.to_lowercase() == lowered) {
        return (true, Some(exact.clone()), Vec::new());
    }
    let suggestions =
        fuzzy::find_close_matches(value, key_values.iter().map(String::as_str), 3, 0.8);
    (false, None, suggestions)
}

/// "Extracted parameters so far" snapshot: non-sentinel fields only, with
/// title-cased display names.
fn format_parameters_for_display(record: &ExtractedParameters) -> String {
    let mut lines = Vec::new();
    for (name, value) in &record.fields {
        if value.is_sentinel() {
            continue;
        }
        let display_name = name
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(format!("{display_name}: {}", value.display()));
    }
    lines.join("\n")
}

/// Instructions generated from the field schema: one identification step per
/// field, with type, enum values, examples, required flag, and defaults.
fn build_signature_instructions(descriptor: &CommandDescriptor) -> String {
    let mut steps = vec!["Step 0: Read the user's command.".to_string()];
    let mut field_lines = Vec::new();

    for (i, spec) in descriptor.parameters.iter().enumerate() {
        let mut info = spec.description.clone();
        if !spec.enum_values.is_empty() {
            let values: Vec<String> = spec.enum_values.iter().map(|v| format!("'{v}'")).collect();
            info.push_str(&format!(". Valid values: {}", values.join(", ")));
        }
        if !spec.examples.is_empty() {
            let samples: Vec<String> = spec.examples.iter().map(|v| format!("'{v}'")).collect();
            info.push_str(&format!(". Examples: {}", samples.join(", ")));
        }
        info.push_str(if spec.required {
            ". This field is Required."
        } else {
            ". This field is Optional."
        });
        if let Some(default) = &spec.default {
            info.push_str(&format!(" Default value: '{}'.", default.display()));
        }
        steps.push(format!(
            "Step {}: Identify the {} ({}).",
            i + 1,
            spec.name,
            info
        ));
        field_lines.push(format!("\"{}\"", spec.name));
    }

    steps.push(format!(
        "Step {}: Check for any missing details.",
        descriptor.parameters.len() + 1
    ));
    steps.push("Return the default value for the parameters for which a default value is specified.".to_string());
    steps.push("Return null for any parameter value which is missing in the command.".to_string());

    format!(
        "Extract structured parameters from a user command using step-by-step reasoning. \
         Today's date is {today}.\n\n{steps}\n\nRespond with a single JSON object with keys {fields}.",
        today = chrono::Utc::now().format("%Y-%m-%d"),
        steps = steps.join("\n"),
        fields = field_lines.join(", "),
    )
}

/// Load up to `k` labeled few-shot examples from
/// `___command_info/<command>_param_labeled.json`.
fn load_trainset(
    definition: &WorkflowDefinition,
    descriptor: &CommandDescriptor,
    k: usize,
) -> Vec<String> {
    let path = definition.trainset_path(&descriptor.qualified_name);
    let Ok(text) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) else {
        warn!(path = %path.display(), "failed to parse trainset file");
        return Vec::new();
    };
    let Some(examples) = parsed.get("valid_examples").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut rendered = Vec::new();
    for example in examples.iter().take(k) {
        let Some(fields) = example.get("fields").and_then(|v| v.as_object()) else {
            continue;
        };
        let Some(command) = fields.get("command").and_then(|v| v.as_str()) else {
            continue;
        };
        let mut outputs = serde_json::Map::new();
        for (key, value) in fields {
            if key != "command" {
                outputs.insert(key.clone(), value.clone());
            }
        }
        rendered.push(format!(
            "Command: {command}\nOutput: {}",
            serde_json::Value::Object(outputs)
        ));
    }
    rendered
}

/// Extract the first JSON object from an LLM response, tolerating code
/// fences and prose around it.
fn parse_json_object(content: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    let trimmed = content.trim();
    let candidate = if let Some(start) = trimmed.find('{') {
        let end = trimmed.rfind('}')?;
        &trimmed[start..=end]
    } else {
        return None;
    };
    match serde_json::from_str::<serde_json::Value>(candidate) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastworkflow_llm::DeterministicProvider;
    use fastworkflow_session::Workflow;
    use std::io::Write;
    use std::path::Path;

    fn write(path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    fn definition(dir: &Path) -> WorkflowDefinition {
        write(
            &dir.join("_commands/cancel_pending_order.json"),
            r##"{"parameters": [
                {"name": "order_id", "type": "string", "required": true,
                 "pattern": "#W\\d+", "examples": ["#W0000001"]},
                {"name": "reason", "type": "enum", "required": true,
                 "enum": ["no longer needed", "ordered by mistake"]}
            ], "plain_utterances": ["cancel my order"]}"##,
        );
        write(
            &dir.join("_commands/add_two_numbers.json"),
            r#"{"parameters": [
                {"name": "first_num", "type": "float", "required": true},
                {"name": "second_num", "type": "float", "required": true}
            ], "plain_utterances": ["add two numbers"]}"#,
        );
        WorkflowDefinition::load(dir).unwrap()
    }

    fn extractor() -> ParameterExtractor {
        ParameterExtractor::new(
            Arc::new(DeterministicProvider::new()),
            "test-model",
            NluConfig::default(),
        )
    }

    fn extractor_with(responses: Vec<String>) -> ParameterExtractor {
        ParameterExtractor::new(
            Arc::new(DeterministicProvider::with_responses(responses)),
            "test-model",
            NluConfig::default(),
        )
    }

    #[tokio::test]
    async fn xml_extraction_with_coercion() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let descriptor = def.command("add_two_numbers").unwrap();
        let registry = WorkflowRegistry::new();
        let mut wf = Workflow::new(dir.path(), None);

        let out = extractor()
            .extract(
                &registry,
                &def,
                descriptor,
                &mut wf,
                "<first_num>5</first_num> <second_num>3</second_num>",
                None,
                true,
                None,
            )
            .await;
        assert!(out.parameters_are_valid);
        assert_eq!(out.parameters.get("first_num"), Some(&ParamValue::Float(5.0)));
        assert_eq!(out.parameters.get("second_num"), Some(&ParamValue::Float(3.0)));
    }

    #[tokio::test]
    async fn llm_extraction_parses_json_response() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let descriptor = def.command("cancel_pending_order").unwrap();
        let registry = WorkflowRegistry::new();
        let mut wf = Workflow::new(dir.path(), None);

        let ext = extractor_with(vec![
            r##"{"order_id": "#W0000001", "reason": "ordered by mistake"}"##.to_string(),
        ]);
        let out = ext
            .extract(
                &registry,
                &def,
                descriptor,
                &mut wf,
                "cancel my order #W0000001 because I ordered it by mistake",
                None,
                false,
                None,
            )
            .await;
        assert!(out.parameters_are_valid);
        assert_eq!(
            out.parameters.get("order_id"),
            Some(&ParamValue::Str("#W0000001".into()))
        );
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let descriptor = def.command("cancel_pending_order").unwrap();
        let registry = WorkflowRegistry::new();
        let mut wf = Workflow::new(dir.path(), None);

        // Empty canned response → no JSON → defaults → required fields missing.
        let out = extractor()
            .extract(
                &registry,
                &def,
                descriptor,
                &mut wf,
                "cancel my order",
                None,
                false,
                None,
            )
            .await;
        assert!(!out.parameters_are_valid);
        assert_eq!(out.missing_invalid_fields, vec!["order_id", "reason"]);
        let message = out.error_message.unwrap();
        assert!(message.contains("Missing required information"));
        assert!(message.contains("separated by commas"));
        assert!(message.contains("abort"));
    }

    #[tokio::test]
    async fn carry_over_fills_sentinel_fields_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let descriptor = def.command("cancel_pending_order").unwrap();
        let registry = WorkflowRegistry::new();
        let mut wf = Workflow::new(dir.path(), None);

        let mut prior = default_record(descriptor);
        prior.set("order_id", ParamValue::Str("#W0000001".into()));
        // reason is still the sentinel.

        let out = extractor()
            .extract(
                &registry,
                &def,
                descriptor,
                &mut wf,
                "ordered by mistake",
                Some(prior),
                false,
                None,
            )
            .await;
        assert!(out.parameters_are_valid);
        assert_eq!(
            out.parameters.get("reason"),
            Some(&ParamValue::Str("ordered by mistake".into()))
        );
        // Previously-extracted value is retained.
        assert_eq!(
            out.parameters.get("order_id"),
            Some(&ParamValue::Str("#W0000001".into()))
        );
    }

    #[tokio::test]
    async fn carry_over_zips_comma_separated_values() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let descriptor = def.command("add_two_numbers").unwrap();
        let registry = WorkflowRegistry::new();
        let mut wf = Workflow::new(dir.path(), None);

        let prior = default_record(descriptor);
        let out = extractor()
            .extract(&registry, &def, descriptor, &mut wf, "5, 3", Some(prior), false, None)
            .await;
        assert!(out.parameters_are_valid);
        assert_eq!(out.parameters.get("first_num"), Some(&ParamValue::Float(5.0)));
        assert_eq!(out.parameters.get("second_num"), Some(&ParamValue::Float(3.0)));
    }

    #[tokio::test]
    async fn carry_over_counts_empty_segments_in_the_part_total() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let descriptor = def.command("add_two_numbers").unwrap();
        let registry = WorkflowRegistry::new();
        let mut wf = Workflow::new(dir.path(), None);

        // "5,,3" is three parts against two sentinel fields: the mismatch
        // branch assigns only the first sentinel field.
        let prior = default_record(descriptor);
        let out = extractor()
            .extract(&registry, &def, descriptor, &mut wf, "5,,3", Some(prior), false, None)
            .await;
        assert!(!out.parameters_are_valid);
        assert_eq!(out.parameters.get("first_num"), Some(&ParamValue::Float(5.0)));
        assert_eq!(out.missing_invalid_fields, vec!["second_num"]);
    }

    #[tokio::test]
    async fn pattern_violation_reports_format_suggestion() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let descriptor = def.command("cancel_pending_order").unwrap();
        let registry = WorkflowRegistry::new();
        let mut wf = Workflow::new(dir.path(), None);

        let ext = extractor_with(vec![
            r#"{"order_id": "W1", "reason": "no longer needed"}"#.to_string(),
        ]);
        let out = ext
            .extract(
                &registry,
                &def,
                descriptor,
                &mut wf,
                "cancel order W1",
                None,
                false,
                None,
            )
            .await;
        assert!(!out.parameters_are_valid);
        assert!(out.missing_invalid_fields.contains(&"order_id".to_string()));
        let message = out.error_message.unwrap();
        assert!(message.contains("Invalid information"));
        assert!(message.contains("#W\\d+"));
        // The invalid field is written back as the sentinel, never kept.
        assert!(out.parameters.get("order_id").unwrap().is_sentinel());
    }

    #[tokio::test]
    async fn enum_canonicalizes_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let descriptor = def.command("cancel_pending_order").unwrap();
        let registry = WorkflowRegistry::new();
        let mut wf = Workflow::new(dir.path(), None);

        let ext = extractor_with(vec![
            r##"{"order_id": "#W0000001", "reason": "Ordered By Mistake"}"##.to_string(),
        ]);
        let out = ext
            .extract(&registry, &def, descriptor, &mut wf, "cancel", None, false, None)
            .await;
        assert!(out.parameters_are_valid);
        assert_eq!(
            out.parameters.get("reason"),
            Some(&ParamValue::Str("ordered by mistake".into()))
        );
    }

    #[tokio::test]
    async fn enum_miss_emits_did_you_mean_suggestions() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let descriptor = def.command("cancel_pending_order").unwrap();
        let registry = WorkflowRegistry::new();
        let mut wf = Workflow::new(dir.path(), None);

        let ext = extractor_with(vec![
            r##"{"order_id": "#W0000001", "reason": "ordered by mistakes"}"##.to_string(),
        ]);
        let out = ext
            .extract(&registry, &def, descriptor, &mut wf, "cancel", None, false, None)
            .await;
        assert!(!out.parameters_are_valid);
        let suggestions = out.suggestions.get("reason").unwrap();
        assert_eq!(suggestions[0], "ordered by mistake");
        assert!(out.error_message.unwrap().contains("Did you mean"));
    }

    struct ProductLookup;

    impl fastworkflow_registry::ParamExtractionHooks for ProductLookup {
        fn db_lookup(
            &self,
            _workflow: &dyn WorkflowContext,
            _command_name: &str,
            _field: &str,
        ) -> Vec<String> {
            vec![
                "Wireless Keyboard".to_string(),
                "Wired Keyboard".to_string(),
                "Gaming Mouse".to_string(),
            ]
        }
    }

    fn lookup_definition(dir: &Path) -> WorkflowDefinition {
        write(
            &dir.join("_commands/get_product_details.json"),
            r#"{"parameters": [
                {"name": "product_name", "type": "string", "required": true, "db_lookup": true}
            ], "plain_utterances": ["get product details"]}"#,
        );
        WorkflowDefinition::load(dir).unwrap()
    }

    #[tokio::test]
    async fn db_lookup_corrects_to_canonical_spelling() {
        let dir = tempfile::tempdir().unwrap();
        let def = lookup_definition(dir.path());
        let descriptor = def.command("get_product_details").unwrap();
        let registry = WorkflowRegistry::new();
        registry
            .handlers()
            .register_param_hooks("get_product_details", Arc::new(ProductLookup));
        let mut wf = Workflow::new(dir.path(), None);

        let ext = extractor_with(vec![
            r#"{"product_name": "wireless keybord"}"#.to_string(),
        ]);
        let out = ext
            .extract(&registry, &def, descriptor, &mut wf, "details", None, false, None)
            .await;
        assert!(out.parameters_are_valid);
        assert_eq!(
            out.parameters.get("product_name"),
            Some(&ParamValue::Str("Wireless Keyboard".into()))
        );
    }

    struct CatalogLookup;

    impl fastworkflow_registry::ParamExtractionHooks for CatalogLookup {
        fn db_lookup(
            &self,
            _workflow: &dyn WorkflowContext,
            _command_name: &str,
            _field: &str,
        ) -> Vec<String> {
            vec!["Ergonomic Mechanical Keyboard".to_string()]
        }
    }

    #[tokio::test]
    async fn db_lookup_miss_offers_top_suggestions() {
        let dir = tempfile::tempdir().unwrap();
        let def = lookup_definition(dir.path());
        let descriptor = def.command("get_product_details").unwrap();
        let registry = WorkflowRegistry::new();
        registry
            .handlers()
            .register_param_hooks("get_product_details", Arc::new(CatalogLookup));
        let mut wf = Workflow::new(dir.path(), None);

        // "keyboard" is too far from the single catalog entry for silent
        // correction, but close enough to suggest.
        let ext = extractor_with(vec![r#"{"product_name": "keyboard"}"#.to_string()]);
        let out = ext
            .extract(&registry, &def, descriptor, &mut wf, "details", None, false, None)
            .await;
        assert!(!out.parameters_are_valid);
        let suggestions = out.suggestions.get("product_name").unwrap();
        assert_eq!(suggestions[0], "Ergonomic Mechanical Keyboard");
        assert!(out.error_message.unwrap().contains("Did you mean"));
    }

    #[tokio::test]
    async fn commandless_descriptor_is_trivially_valid() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("_commands/noop.json"),
            r#"{"plain_utterances": ["noop"]}"#,
        );
        let def = WorkflowDefinition::load(dir.path()).unwrap();
        let descriptor = def.command("noop").unwrap();
        let registry = WorkflowRegistry::new();
        let mut wf = Workflow::new(dir.path(), None);

        let out = extractor()
            .extract(&registry, &def, descriptor, &mut wf, "noop", None, false, None)
            .await;
        assert!(out.parameters_are_valid);
    }

    #[test]
    fn json_parsing_tolerates_code_fences() {
        let content = "```json\n{\"a\": 1}\n```";
        let map = parse_json_object(content).unwrap();
        assert_eq!(map.get("a").unwrap().as_i64(), Some(1));
        assert!(parse_json_object("no json here").is_none());
    }

    #[test]
    fn signature_instructions_name_enums_and_examples() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let descriptor = def.command("cancel_pending_order").unwrap();
        let instructions = build_signature_instructions(descriptor);
        assert!(instructions.contains("'no longer needed'"));
        assert!(instructions.contains("'#W0000001'"));
        assert!(instructions.contains("This field is Required."));
    }
}
