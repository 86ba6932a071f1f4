use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use fastworkflow_core::types::{
    context_keys, CommandOutput, CommandResponse, ExtractedParameters, NluPipelineStage,
    TraceEvent, TraceKind, TraceSink,
};
use fastworkflow_registry::{builtins, WorkflowContext, WorkflowDefinition, WorkflowRegistry};
use fastworkflow_session::Workflow;

use crate::cache::UtteranceCache;
use crate::classifier::IntentClassifier;
use crate::extractor::ParameterExtractor;

/// Outcome of one pipeline entry. Exactly one per turn.
#[derive(Debug)]
pub enum TurnOutcome {
    /// A command resolved and validated; the runtime dispatches it against
    /// the current command context.
    ResolvedCommand {
        command_name: String,
        command_text: String,
        parameters: ExtractedParameters,
    },
    /// The turn completed inside the pipeline: a built-in command, a
    /// clarification prompt, or a validation error.
    Output(CommandOutput),
}

/// The four-stage NLU state machine (C3): intent detection → ambiguity
/// clarification → misunderstanding clarification → parameter extraction.
pub struct NluPipeline {
    classifier: IntentClassifier,
    extractor: ParameterExtractor,
}

impl NluPipeline {
    pub fn new(classifier: IntentClassifier, extractor: ParameterExtractor) -> Self {
        Self { classifier, extractor }
    }

    /// Drive one utterance through the state machine.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(utterance, stage = %workflow.pipeline_stage()))]
    pub async fn process_turn(
        &self,
        registry: &WorkflowRegistry,
        definition: &WorkflowDefinition,
        cache: &UtteranceCache,
        workflow: &mut Workflow,
        utterance: &str,
        agentic: bool,
        tracer: &dyn TraceSink,
        cancel: Option<&CancellationToken>,
    ) -> TurnOutcome {
        let stage = workflow.pipeline_stage();
        tracer.emit(TraceEvent::new(
            TraceKind::StageEntered,
            json!({ "stage": stage.to_string(), "utterance": utterance }),
        ));

        // Preserve the original parameter-bearing utterance: overwrite only
        // if no value is set, so clarification turns keep the first text.
        workflow.preserve_command_text(utterance);

        if stage == NluPipelineStage::ParameterExtraction {
            return self
                .continue_parameter_extraction(
                    registry, definition, cache, workflow, utterance, agentic, tracer, cancel,
                )
                .await;
        }

        let context_name = workflow.current_command_context_name();
        let mut prediction = self
            .classifier
            .predict(definition, cache, &context_name, utterance, stage, agentic, cancel)
            .await;

        // Parent-chain walk: re-run intent detection against each ancestor
        // and accept the first non-null result.
        if prediction.command_name.is_none()
            && prediction.ambiguous_candidates.is_empty()
            && stage == NluPipelineStage::IntentDetection
        {
            for ancestor in definition.context_chain(&context_name).into_iter().skip(1) {
                debug!(ancestor, "walking parent chain for intent detection");
                prediction = self
                    .classifier
                    .predict(definition, cache, &ancestor, utterance, stage, agentic, cancel)
                    .await;
                if prediction.command_name.is_some() || !prediction.ambiguous_candidates.is_empty() {
                    break;
                }
            }
        }

        if !prediction.ambiguous_candidates.is_empty() {
            tracer.emit(TraceEvent::new(
                TraceKind::IntentCandidates,
                json!({ "candidates": prediction.ambiguous_candidates }),
            ));
            workflow.set_pipeline_stage(NluPipelineStage::IntentAmbiguityClarification);
            let message = prediction
                .error_message
                .unwrap_or_else(|| "The command is ambiguous.".to_string());
            let mut response = CommandResponse::failure(message);
            response
                .artifacts
                .insert("error_kind".into(), json!("intent_ambiguity"));
            response
                .artifacts
                .insert("candidates".into(), json!(prediction.ambiguous_candidates));
            return TurnOutcome::Output(CommandOutput::single(response));
        }

        let Some(command_name) = prediction.command_name.clone() else {
            // No candidate at any context in the parent chain.
            workflow.set_pipeline_stage(NluPipelineStage::IntentMisunderstandingClarification);
            tracer.emit(TraceEvent::new(
                TraceKind::StageEntered,
                json!({ "stage": NluPipelineStage::IntentMisunderstandingClarification.to_string() }),
            ));
            let message = misunderstanding_message(definition, &context_name);
            let mut response = CommandResponse::failure(message);
            response
                .artifacts
                .insert("error_kind".into(), json!("intent_misunderstanding"));
            return TurnOutcome::Output(CommandOutput::single(response));
        };

        tracer.emit(TraceEvent::new(
            TraceKind::IntentResolved,
            json!({ "command_name": command_name, "is_builtin": prediction.is_builtin_command }),
        ));

        if prediction.is_builtin_command {
            return self.execute_builtin(registry, definition, workflow, &command_name, utterance, stage);
        }

        // A clarification resolved a real command: seed the cache with the
        // original preserved utterance, not the clarification utterance.
        if stage != NluPipelineStage::IntentDetection {
            let original = workflow.command_text().unwrap_or_else(|| utterance.to_string());
            if let Some(embedding) = self.classifier.embed(&original, cancel).await {
                if let Err(e) = cache.store_utterance(&original, &command_name, &embedding) {
                    warn!(error = %e, "failed to seed utterance cache");
                }
            }
        }

        workflow.set_context_value(context_keys::COMMAND_NAME, json!(command_name));
        workflow.set_pipeline_stage(NluPipelineStage::ParameterExtraction);

        // During clarification flows the preserved original text (not the
        // clarification utterance) is what parameter extraction receives.
        let extraction_text = if stage == NluPipelineStage::IntentDetection {
            prediction.remainder.clone()
        } else {
            workflow.command_text().unwrap_or_else(|| prediction.remainder.clone())
        };

        self.run_extraction(
            registry,
            definition,
            workflow,
            &command_name,
            &extraction_text,
            None,
            agentic,
            tracer,
            cancel,
        )
        .await
    }

    /// Error-state continuation: the new utterance carries field values for
    /// the stored partial record, unless it is a correction verb.
    #[allow(clippy::too_many_arguments)]
    async fn continue_parameter_extraction(
        &self,
        registry: &WorkflowRegistry,
        definition: &WorkflowDefinition,
        cache: &UtteranceCache,
        workflow: &mut Workflow,
        utterance: &str,
        agentic: bool,
        tracer: &dyn TraceSink,
        cancel: Option<&CancellationToken>,
    ) -> TurnOutcome {
        let stage = NluPipelineStage::ParameterExtraction;
        if let Some(verb) = self.classifier.match_correction_verb(definition, utterance, stage) {
            return self.execute_builtin(registry, definition, workflow, &verb, utterance, stage);
        }

        let Some(command_name) = workflow
            .context_value(context_keys::COMMAND_NAME)
            .and_then(|v| v.as_str().map(String::from))
        else {
            // Inconsistent state: no command in flight. Reset and reclassify.
            warn!("parameter-extraction stage without a command name, resetting");
            workflow.end_command_processing();
            return Box::pin(self.process_turn(
                registry, definition, cache, workflow, utterance, agentic, tracer, cancel,
            ))
            .await;
        };

        let prior = workflow.stored_parameters();
        self.run_extraction(
            registry,
            definition,
            workflow,
            &command_name,
            utterance,
            prior,
            agentic,
            tracer,
            cancel,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_extraction(
        &self,
        registry: &WorkflowRegistry,
        definition: &WorkflowDefinition,
        workflow: &mut Workflow,
        command_name: &str,
        extraction_text: &str,
        prior: Option<ExtractedParameters>,
        agentic: bool,
        tracer: &dyn TraceSink,
        cancel: Option<&CancellationToken>,
    ) -> TurnOutcome {
        let Some(descriptor) = definition.command(command_name) else {
            workflow.end_command_processing();
            return TurnOutcome::Output(CommandOutput::single(CommandResponse::failure(format!(
                "Command not found: {command_name}"
            ))));
        };

        let output = self
            .extractor
            .extract(
                registry,
                definition,
                descriptor,
                workflow,
                extraction_text,
                prior,
                agentic,
                cancel,
            )
            .await;

        tracer.emit(TraceEvent::new(
            TraceKind::ParametersExtracted,
            json!({
                "command_name": command_name,
                "parameters": output.parameters.to_json_map(),
            }),
        ));
        tracer.emit(TraceEvent::new(
            TraceKind::ValidationResult,
            json!({
                "valid": output.parameters_are_valid,
                "missing_invalid_fields": output.missing_invalid_fields,
            }),
        ));

        if !output.parameters_are_valid {
            workflow.store_parameters(&output.parameters);
            workflow.set_pipeline_stage(NluPipelineStage::ParameterExtraction);
            let mut response = CommandResponse::failure(
                output
                    .error_message
                    .unwrap_or_else(|| "Parameter extraction failed.".to_string()),
            );
            response
                .artifacts
                .insert("error_kind".into(), json!("parameter_validation"));
            if !output.suggestions.is_empty() {
                response
                    .artifacts
                    .insert("suggestions".to_string(), json!(output.suggestions));
            }
            return TurnOutcome::Output(
                CommandOutput::single(response).with_command(command_name),
            );
        }

        workflow.clear_stored_parameters();
        TurnOutcome::ResolvedCommand {
            command_name: command_name.to_string(),
            command_text: extraction_text.to_string(),
            parameters: output.parameters,
        }
    }

    /// Built-in error-correction and intent-detection commands execute
    /// inside the pipeline; they mutate pipeline state directly.
    fn execute_builtin(
        &self,
        registry: &WorkflowRegistry,
        definition: &WorkflowDefinition,
        workflow: &mut Workflow,
        command_name: &str,
        utterance: &str,
        stage: NluPipelineStage,
    ) -> TurnOutcome {
        match command_name {
            builtins::ABORT => {
                workflow.end_command_processing();
                let mut response = CommandResponse::text("command aborted\n");
                response.artifacts.insert("command".into(), json!(utterance));
                response.artifacts.insert("command_name".into(), json!("abort"));
                TurnOutcome::Output(CommandOutput::single(response).with_command(command_name))
            }
            builtins::YOU_MISUNDERSTOOD => {
                workflow.clear_stored_parameters();
                workflow.set_pipeline_stage(NluPipelineStage::IntentMisunderstandingClarification);
                let context_name = workflow.current_command_context_name();
                let message = misunderstanding_message(definition, &context_name);
                TurnOutcome::Output(
                    CommandOutput::single(CommandResponse::text(message)).with_command(command_name),
                )
            }
            builtins::WHAT_CAN_I_DO => {
                let context_name = workflow.current_command_context_name();
                let message = definition.command_display_text(&context_name);
                // During clarification the stage stays put; a plain
                // intent-detection turn completes normally.
                if stage == NluPipelineStage::IntentDetection {
                    workflow.end_command_processing();
                }
                TurnOutcome::Output(
                    CommandOutput::single(CommandResponse::text(message)).with_command(command_name),
                )
            }
            builtins::GO_UP => {
                let response = if workflow.is_current_command_context_root() {
                    CommandResponse::text("Already at the top-level 'global' context.")
                } else {
                    let current = workflow.current_command_context();
                    let parent = current
                        .as_ref()
                        .and_then(|obj| workflow.get_parent(registry, obj));
                    workflow.set_current_command_context(parent);
                    CommandResponse::text(format!(
                        "Context is now '{}'",
                        workflow.current_command_context_displayname(registry)
                    ))
                };
                workflow.end_command_processing();
                TurnOutcome::Output(CommandOutput::single(response).with_command(command_name))
            }
            builtins::RESET_CONTEXT => {
                let root = workflow.root_command_context();
                workflow.set_current_command_context(root);
                workflow.end_command_processing();
                TurnOutcome::Output(
                    CommandOutput::single(CommandResponse::text(format!(
                        "Context is now '{}'",
                        workflow.current_command_context_displayname(registry)
                    )))
                    .with_command(command_name),
                )
            }
            other => {
                warn!(command = other, "unknown builtin");
                workflow.end_command_processing();
                TurnOutcome::Output(CommandOutput::single(CommandResponse::failure(format!(
                    "Command not found: {other}"
                ))))
            }
        }
    }
}

/// Misunderstanding-clarification listing: every valid command in the
/// current context, with the abort escape hatch.
fn misunderstanding_message(definition: &WorkflowDefinition, context_name: &str) -> String {
    let mut names: Vec<String> = definition
        .get_command_names(context_name)
        .into_iter()
        .filter(|name| !name.starts_with("ErrorCorrection/"))
        .map(|name| fastworkflow_registry::split_qualified(&name).1.to_string())
        .collect();
    names.sort();
    names.dedup();
    format!(
        "Please enter the correct command from the list below:\n{}\n\nor type 'abort' to cancel",
        names.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastworkflow_core::config::NluConfig;
    use fastworkflow_core::types::{NullTraceSink, ParamValue};
    use fastworkflow_llm::{DeterministicProvider, IntentModel, LexicalIntentModel};
    use std::io::Write;
    use std::path::Path;
    use std::sync::Arc;

    fn write(path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    fn seed_workflow(dir: &Path) {
        write(
            &dir.join("_commands/add_two_numbers.json"),
            r#"{"parameters": [
                {"name": "first_num", "type": "float", "required": true},
                {"name": "second_num", "type": "float", "required": true}
            ], "plain_utterances": ["add two numbers"]}"#,
        );
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
            &dir.join("_commands/User/set_current_user.json"),
            r#"{"parameters": [
                {"name": "user_name", "type": "string", "required": true}
            ], "plain_utterances": ["set the current user"]}"#,
        );
        write(
            &dir.join("_commands/User/set_user_status.json"),
            r#"{"plain_utterances": ["set the user status"]}"#,
        );
    }

    struct Fixture {
        registry: WorkflowRegistry,
        definition: Arc<WorkflowDefinition>,
        cache: UtteranceCache,
        pipeline: NluPipeline,
        workflow: Workflow,
    }

    struct UserContext;

    impl fastworkflow_registry::CommandContext for UserContext {
        fn context_name(&self) -> &str {
            "User"
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn fixture(dir: &Path, canned: Vec<String>) -> Fixture {
        seed_workflow(dir);
        let registry = WorkflowRegistry::new();
        let definition = registry.load(dir).unwrap();
        let cache = UtteranceCache::open_in_memory().unwrap();
        let model: Arc<dyn IntentModel> = Arc::new(
            LexicalIntentModel::new()
                .with_examples("User/set_current_user", &["set the current user"])
                .with_examples("User/set_user_status", &["set the user status"]),
        );
        let classifier = IntentClassifier::new(model.clone(), model, NluConfig::default());
        let extractor = ParameterExtractor::new(
            Arc::new(DeterministicProvider::with_responses(canned)),
            "test-model",
            NluConfig::default(),
        );
        let workflow = Workflow::new(dir, None);
        Fixture {
            registry,
            definition,
            cache,
            pipeline: NluPipeline::new(classifier, extractor),
            workflow,
        }
    }

    async fn turn(f: &mut Fixture, utterance: &str) -> TurnOutcome {
        f.pipeline
            .process_turn(
                &f.registry,
                &f.definition,
                &f.cache,
                &mut f.workflow,
                utterance,
                false,
                &NullTraceSink,
                None,
            )
            .await
    }

    #[tokio::test]
    async fn clean_path_prefix_resolution_and_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(
            dir.path(),
            vec![r#"{"first_num": 5, "second_num": 3}"#.to_string()],
        );

        let outcome = turn(&mut f, "add_two_numbers first_num=5 second_num=3").await;
        match outcome {
            TurnOutcome::ResolvedCommand {
                command_name,
                parameters,
                ..
            } => {
                assert_eq!(command_name, "add_two_numbers");
                assert_eq!(parameters.get("first_num"), Some(&ParamValue::Float(5.0)));
            }
            other => panic!("expected resolved command, got {other:?}"),
        }
        // Validation passed → no stored parameters remain.
        assert!(f.workflow.stored_parameters().is_none());
    }

    #[tokio::test]
    async fn parameter_repair_across_turns() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(
            dir.path(),
            vec![r##"{"order_id": "#W0000001", "reason": null}"##.to_string()],
        );

        // Turn 1: reason missing → error state.
        let outcome = turn(&mut f, "cancel_pending_order my order #W0000001").await;
        match outcome {
            TurnOutcome::Output(output) => {
                assert!(!output.success());
                let text = &output.command_responses[0].response;
                assert!(text.contains("reason"));
            }
            other => panic!("expected error output, got {other:?}"),
        }
        assert_eq!(
            f.workflow.pipeline_stage(),
            NluPipelineStage::ParameterExtraction
        );
        assert!(f.workflow.stored_parameters().is_some());

        // Turn 2: the bare value merges into the stored partial.
        let outcome = turn(&mut f, "ordered by mistake").await;
        match outcome {
            TurnOutcome::ResolvedCommand { parameters, .. } => {
                assert_eq!(
                    parameters.get("order_id"),
                    Some(&ParamValue::Str("#W0000001".into()))
                );
                assert_eq!(
                    parameters.get("reason"),
                    Some(&ParamValue::Str("ordered by mistake".into()))
                );
            }
            other => panic!("expected resolved command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ambiguity_preserves_original_command_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(
            dir.path(),
            vec![r#"{"user_name": "unsh"}"#.to_string()],
        );
        f.workflow
            .set_current_command_context(Some(Arc::new(UserContext)));

        // Both User commands score within the ambiguity gap.
        let outcome = turn(&mut f, "set the user to unsh").await;
        match outcome {
            TurnOutcome::Output(output) => {
                assert!(!output.success());
                assert!(output.command_responses[0].response.contains("ambiguous"));
            }
            other => panic!("expected ambiguity output, got {other:?}"),
        }
        assert_eq!(
            f.workflow.pipeline_stage(),
            NluPipelineStage::IntentAmbiguityClarification
        );
        assert_eq!(
            f.workflow.command_text().as_deref(),
            Some("set the user to unsh")
        );

        // Turn 2: picking a candidate feeds the preserved original to
        // extraction, and seeds the utterance cache.
        let outcome = turn(&mut f, "set_current_user").await;
        match outcome {
            TurnOutcome::ResolvedCommand {
                command_name,
                command_text,
                ..
            } => {
                assert_eq!(command_name, "User/set_current_user");
                assert_eq!(command_text, "set the user to unsh");
            }
            other => panic!("expected resolved command, got {other:?}"),
        }
        assert_eq!(f.cache.entry_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn misunderstanding_then_abort_resets_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(dir.path(), vec![]);

        // "you misunderstood" from a parameter-error state.
        f.workflow
            .set_pipeline_stage(NluPipelineStage::ParameterExtraction);
        f.workflow
            .set_context_value(context_keys::COMMAND_NAME, json!("cancel_pending_order"));
        let mut stored = ExtractedParameters::default();
        stored.set("order_id", ParamValue::NotFound);
        f.workflow.store_parameters(&stored);

        let outcome = turn(&mut f, "you misunderstood").await;
        match outcome {
            TurnOutcome::Output(output) => {
                let text = &output.command_responses[0].response;
                assert!(text.contains("Please enter the correct command"));
                assert!(text.contains("cancel_pending_order"));
            }
            other => panic!("expected listing, got {other:?}"),
        }
        assert_eq!(
            f.workflow.pipeline_stage(),
            NluPipelineStage::IntentMisunderstandingClarification
        );
        assert!(f.workflow.stored_parameters().is_none());

        // "abort" returns to intent detection with clean state.
        let outcome = turn(&mut f, "abort").await;
        match outcome {
            TurnOutcome::Output(output) => {
                assert!(output.command_aborted());
            }
            other => panic!("expected abort output, got {other:?}"),
        }
        assert_eq!(f.workflow.pipeline_stage(), NluPipelineStage::IntentDetection);
        assert!(f.workflow.command_text().is_none());
    }

    #[tokio::test]
    async fn gibberish_enters_misunderstanding_clarification() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(dir.path(), vec![]);

        let outcome = turn(&mut f, "qwerty asdf zxcv").await;
        match outcome {
            TurnOutcome::Output(output) => {
                assert!(!output.success());
                assert!(output.command_responses[0]
                    .response
                    .contains("Please enter the correct command"));
            }
            other => panic!("expected misunderstanding output, got {other:?}"),
        }
        assert_eq!(
            f.workflow.pipeline_stage(),
            NluPipelineStage::IntentMisunderstandingClarification
        );
    }

    #[tokio::test]
    async fn what_can_i_do_lists_commands_and_completes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(dir.path(), vec![]);

        let outcome = turn(&mut f, "what can i do").await;
        match outcome {
            TurnOutcome::Output(output) => {
                assert!(output.success());
                let text = &output.command_responses[0].response;
                assert!(text.contains("add_two_numbers(first_num, second_num)"));
            }
            other => panic!("expected listing, got {other:?}"),
        }
        // A plain intent-detection turn leaves no residue.
        assert!(f.workflow.command_text().is_none());
        assert_eq!(f.workflow.pipeline_stage(), NluPipelineStage::IntentDetection);
    }

    struct TodoNode {
        name: &'static str,
        display: &'static str,
        parent: Option<Arc<dyn fastworkflow_registry::CommandContext>>,
    }

    impl fastworkflow_registry::CommandContext for TodoNode {
        fn context_name(&self) -> &str {
            self.name
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    struct TodoNodeClass;

    impl fastworkflow_registry::ContextClass for TodoNodeClass {
        fn get_parent(
            &self,
            obj: &Arc<dyn fastworkflow_registry::CommandContext>,
        ) -> Option<Arc<dyn fastworkflow_registry::CommandContext>> {
            obj.as_any()
                .downcast_ref::<TodoNode>()
                .and_then(|n| n.parent.clone())
        }

        fn get_displayname(
            &self,
            obj: &Arc<dyn fastworkflow_registry::CommandContext>,
        ) -> Option<String> {
            obj.as_any()
                .downcast_ref::<TodoNode>()
                .map(|n| n.display.to_string())
        }
    }

    #[tokio::test]
    async fn go_up_moves_focus_to_the_parent_context() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(dir.path(), vec![]);
        f.registry
            .handlers()
            .register_context_class("TodoList", Arc::new(TodoNodeClass));
        f.registry
            .handlers()
            .register_context_class("TodoListManager", Arc::new(TodoNodeClass));

        let manager: Arc<dyn fastworkflow_registry::CommandContext> = Arc::new(TodoNode {
            name: "TodoListManager",
            display: "Manager",
            parent: None,
        });
        f.workflow.set_root_command_context(manager.clone()).unwrap();
        let groceries: Arc<dyn fastworkflow_registry::CommandContext> = Arc::new(TodoNode {
            name: "TodoList",
            display: "Groceries",
            parent: Some(manager),
        });
        f.workflow.set_current_command_context(Some(groceries));

        let outcome = turn(&mut f, "go up").await;
        match outcome {
            TurnOutcome::Output(output) => {
                assert!(output.success());
                assert!(output.command_responses[0].response.contains("Manager"));
            }
            other => panic!("expected navigation output, got {other:?}"),
        }
        assert_eq!(f.workflow.current_command_context_name(), "TodoListManager");

        // Already at the root.
        let outcome = turn(&mut f, "go up").await;
        match outcome {
            TurnOutcome::Output(output) => {
                assert!(output.command_responses[0]
                    .response
                    .contains("Already at the top-level"));
            }
            other => panic!("expected output, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn what_can_i_do_stays_in_ambiguity_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fixture(dir.path(), vec![]);
        f.cache
            .store_suggested_commands(
                &["User/set_current_user".into(), "User/set_user_status".into()],
                1,
            )
            .unwrap();
        f.workflow
            .set_pipeline_stage(NluPipelineStage::IntentAmbiguityClarification);
        f.workflow.preserve_command_text("set the user to unsh");

        let outcome = turn(&mut f, "what can i do").await;
        assert!(matches!(outcome, TurnOutcome::Output(_)));
        assert_eq!(
            f.workflow.pipeline_stage(),
            NluPipelineStage::IntentAmbiguityClarification
        );
        // The preserved command survives the listing turn.
        assert_eq!(
            f.workflow.command_text().as_deref(),
            Some("set the user to unsh")
        );
    }
}
