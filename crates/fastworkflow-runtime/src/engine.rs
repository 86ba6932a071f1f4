use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use fastworkflow_core::config::{FastworkflowConfig, DEFAULT_QUEUE_CAPACITY};
use fastworkflow_core::error::{FastworkflowError, Result};
use fastworkflow_core::types::{
    Action, CommandOutput, CommandResponse, ConversationTurn, ExtractedParameters, TraceEvent,
    TraceKind, TraceSink,
};
use fastworkflow_llm::{
    DeterministicProvider, IntentModel, LexicalIntentModel, LlmProvider, OpenAiCompatProvider,
};
use fastworkflow_llm::intent::HttpIntentModel;
use fastworkflow_nlu::{
    coerce, IntentClassifier, NluPipeline, ParameterExtractor, TurnOutcome, UtteranceCache,
};
use fastworkflow_registry::{WorkflowContext, WorkflowDefinition, WorkflowRegistry};
use fastworkflow_session::{Workflow, WorkflowStore};
use fastworkflow_store::{generate_topic_and_summary, ConversationStore, ConversationSummary};

use crate::agent;
use crate::traces::TraceCollector;

/// How the session wants live trace events delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    #[default]
    Ndjson,
    Sse,
}

/// Final result of one invocation: the command output plus the full ordered
/// trace buffer.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationResult {
    pub command_output: CommandOutput,
    pub traces: Vec<TraceEvent>,
}

/// Lookup key for `activate_conversation`.
#[derive(Debug, Clone)]
pub enum ConversationRef {
    Id(i64),
    Topic(String),
}

/// State guarded by the per-user single-flight lock.
struct RuntimeInner {
    workflow: Workflow,
    history: Vec<ConversationTurn>,
    conversation_id: Option<i64>,
}

/// Per-user runtime: conversation store shard, single-flight lock, and the
/// user-message / command-output queues (bounded, one consumer each).
pub struct SessionRuntime {
    user_id: String,
    store: ConversationStore,
    inner: tokio::sync::Mutex<RuntimeInner>,
    stream_format: std::sync::Mutex<StreamFormat>,
    user_message_tx: mpsc::Sender<String>,
    user_message_rx: tokio::sync::Mutex<mpsc::Receiver<String>>,
    command_output_tx: mpsc::Sender<CommandOutput>,
    command_output_rx: tokio::sync::Mutex<mpsc::Receiver<CommandOutput>>,
}

impl SessionRuntime {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn stream_format(&self) -> StreamFormat {
        *self.stream_format.lock().unwrap()
    }

    /// Enqueue a user utterance for a pipeline waiting inside interactive
    /// clarification. Blocks when the queue is full.
    pub async fn push_user_message(&self, message: String) -> Result<()> {
        self.user_message_tx
            .send(message)
            .await
            .map_err(|_| FastworkflowError::Internal("user message queue closed".into()))
    }

    /// Drain one pending command output (clarification requests emitted
    /// mid-turn). `None` when the queue is empty.
    pub async fn try_recv_command_output(&self) -> Option<CommandOutput> {
        self.command_output_rx.lock().await.try_recv().ok()
    }
}

/// The process-wide engine: registry + definition + pipeline + per-user
/// session runtimes. One instance per workflow directory.
pub struct Engine {
    config: FastworkflowConfig,
    registry: Arc<WorkflowRegistry>,
    definition: Arc<WorkflowDefinition>,
    cache: UtteranceCache,
    pipeline: NluPipeline,
    extractor: ParameterExtractor,
    workflow_store: WorkflowStore,
    store_provider: Arc<dyn LlmProvider>,
    store_model: String,
    agent_provider: Arc<dyn LlmProvider>,
    agent_model: String,
    sessions: DashMap<String, Arc<SessionRuntime>>,
    workflow_dir: PathBuf,
}

impl Engine {
    /// Build the engine for one workflow directory. Fatal on any workflow
    /// definition defect.
    pub fn new(
        config: FastworkflowConfig,
        workflow_dir: &Path,
        registry: Arc<WorkflowRegistry>,
    ) -> Result<Self> {
        let definition = registry.load(workflow_dir)?;
        let cache = UtteranceCache::open(&definition.convo_info_dir())?;

        let (small, large): (Arc<dyn IntentModel>, Arc<dyn IntentModel>) =
            match &config.llm.intent {
                Some(endpoint) => (
                    Arc::new(HttpIntentModel::new(
                        endpoint.small_model.clone(),
                        endpoint.base_url.clone(),
                        endpoint.api_key.clone(),
                        endpoint.timeout_seconds,
                    )),
                    Arc::new(HttpIntentModel::new(
                        endpoint.large_model.clone(),
                        endpoint.base_url.clone(),
                        endpoint.api_key.clone(),
                        endpoint.timeout_seconds,
                    )),
                ),
                None => {
                    // No inference server configured: lexical fallback seeded
                    // with the registered utterances.
                    let model = Arc::new(lexical_model_from(&definition));
                    (model.clone(), model)
                }
            };
        let classifier = IntentClassifier::new(small, large, config.nlu.clone());

        let (param_provider, param_model) = chat_provider(
            "param-extraction",
            config.llm.param_extraction.as_ref(),
        );
        let extractor =
            ParameterExtractor::new(param_provider, param_model, config.nlu.clone());
        let pipeline_extractor = extractor.clone();

        let (store_provider, store_model) = chat_provider(
            "conversation-store",
            config.llm.conversation_store.as_ref(),
        );
        let (agent_provider, agent_model) = chat_provider("agent", config.llm.agent.as_ref());

        let workflow_store = WorkflowStore::open(Path::new(&config.storage.workflow_db_path))
            .map_err(db_err)?;

        info!(workflow = %workflow_dir.display(), "engine initialized");
        Ok(Self {
            pipeline: NluPipeline::new(classifier, pipeline_extractor),
            config,
            registry,
            definition,
            cache,
            extractor,
            workflow_store,
            store_provider,
            store_model,
            agent_provider,
            agent_model,
            sessions: DashMap::new(),
            workflow_dir: workflow_dir.to_path_buf(),
        })
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub fn definition(&self) -> &Arc<WorkflowDefinition> {
        &self.definition
    }

    pub fn workflow_dir(&self) -> &Path {
        &self.workflow_dir
    }

    /// Open (or reopen) the session for a user. Reuses the persisted
    /// workflow row so context survives restarts; reopening only updates the
    /// stream format.
    #[instrument(skip(self))]
    pub fn initialize_session(&self, user_id: &str, stream_format: StreamFormat) -> Result<()> {
        if let Some(runtime) = self.sessions.get(user_id) {
            *runtime.stream_format.lock().unwrap() = stream_format;
            return Ok(());
        }

        let store = ConversationStore::open(
            Path::new(&self.config.storage.conversations_dir),
            user_id,
        )
        .map_err(db_err)?;

        let workflow_id = format!("wf_{user_id}");
        let mut workflow = match self.workflow_store.get(&workflow_id).map_err(db_err)? {
            Some(existing) => existing,
            None => Workflow::with_id(workflow_id, &self.workflow_dir, None),
        };
        self.workflow_store.flush(&mut workflow).map_err(db_err)?;

        let (user_message_tx, user_message_rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        let (command_output_tx, command_output_rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        let runtime = Arc::new(SessionRuntime {
            user_id: user_id.to_string(),
            store,
            inner: tokio::sync::Mutex::new(RuntimeInner {
                workflow,
                history: Vec::new(),
                conversation_id: None,
            }),
            stream_format: std::sync::Mutex::new(stream_format),
            user_message_tx,
            user_message_rx: tokio::sync::Mutex::new(user_message_rx),
            command_output_tx,
            command_output_rx: tokio::sync::Mutex::new(command_output_rx),
        });
        self.sessions.insert(user_id.to_string(), runtime);
        info!(user_id, "session initialized");
        Ok(())
    }

    pub fn session(&self, user_id: &str) -> Result<Arc<SessionRuntime>> {
        self.sessions
            .get(user_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| FastworkflowError::SessionNotFound {
                user_id: user_id.to_string(),
            })
    }

    /// Deterministic (no agent) turn.
    pub async fn invoke_assistant(
        &self,
        user_id: &str,
        user_query: &str,
        timeout_seconds: u64,
    ) -> Result<InvocationResult> {
        self.run_invocation(user_id, user_query, timeout_seconds, false, None)
            .await
    }

    /// Agentic turn: regex-tagged extraction plus the bounded intent
    /// clarification loop. `live` mirrors trace events to a stream channel.
    pub async fn invoke_agent(
        &self,
        user_id: &str,
        user_query: &str,
        timeout_seconds: u64,
        live: Option<mpsc::Sender<TraceEvent>>,
    ) -> Result<InvocationResult> {
        self.run_invocation(user_id, user_query, timeout_seconds, true, live)
            .await
    }

    /// One serialized invocation for a user: lock, turn, dispatch, history
    /// append, incremental persist. Timeouts restore the pre-turn transient
    /// state and yield a `success=false` response.
    async fn run_invocation(
        &self,
        user_id: &str,
        user_query: &str,
        timeout_seconds: u64,
        agentic: bool,
        live: Option<mpsc::Sender<TraceEvent>>,
    ) -> Result<InvocationResult> {
        let runtime = self.session(user_id)?;
        let deadline = Duration::from_secs(timeout_seconds.max(1));
        let started = Instant::now();
        let collector = TraceCollector::new(live);

        // Lock acquisition counts against the deadline: requests for the
        // same user queue and execute in arrival order.
        let mut inner = match tokio::time::timeout(deadline, runtime.inner.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                collector.emit(TraceEvent::new(
                    TraceKind::Timeout,
                    json!({ "timeout_seconds": timeout_seconds, "phase": "queued" }),
                ));
                return Ok(timeout_result(collector, timeout_seconds));
            }
        };

        let snapshot = inner.workflow.context().clone();
        let cancel = CancellationToken::new();
        let remaining = deadline.saturating_sub(started.elapsed());
        let turn = self.run_turn(&mut inner, &runtime, user_query, agentic, &collector, &cancel);

        let output = match tokio::time::timeout(remaining, turn).await {
            Ok(output) => output,
            Err(_) => {
                // The turn future is dropped at its current suspension
                // point; in-flight LLM calls observe the cancelled token.
                cancel.cancel();
                inner.workflow.restore_context(snapshot);
                let _ = self.workflow_store.flush(&mut inner.workflow);
                collector.emit(TraceEvent::new(
                    TraceKind::Timeout,
                    json!({ "timeout_seconds": timeout_seconds, "phase": "processing" }),
                ));
                return Ok(timeout_result(collector, timeout_seconds));
            }
        };

        self.workflow_store
            .flush(&mut inner.workflow)
            .map_err(db_err)?;

        let turn_record = ConversationTurn {
            summary: turn_summary(user_query, &output),
            traces: collector.events(),
            feedback: None,
        };
        inner.history.push(turn_record);
        self.persist_history(&runtime, &mut inner)?;

        Ok(InvocationResult {
            command_output: output,
            traces: collector.into_events(),
        })
    }

    /// Drive the pipeline for one utterance, including the agentic
    /// clarification retries, then dispatch.
    async fn run_turn(
        &self,
        inner: &mut RuntimeInner,
        runtime: &Arc<SessionRuntime>,
        user_query: &str,
        agentic: bool,
        collector: &TraceCollector,
        cancel: &CancellationToken,
    ) -> CommandOutput {
        let mut utterance = user_query.to_string();
        let mut attempts = 0usize;

        loop {
            let outcome = self
                .pipeline
                .process_turn(
                    &self.registry,
                    &self.definition,
                    &self.cache,
                    &mut inner.workflow,
                    &utterance,
                    agentic,
                    collector,
                    Some(cancel),
                )
                .await;

            match outcome {
                TurnOutcome::Output(output) => {
                    let kind = agent::error_kind(&output).map(String::from);
                    let is_intent_error = matches!(
                        kind.as_deref(),
                        Some("intent_ambiguity") | Some("intent_misunderstanding")
                    );
                    if agentic && !output.success() && is_intent_error {
                        if attempts < agent::MAX_CLARIFY_ATTEMPTS {
                            attempts += 1;
                            let original = inner
                                .workflow
                                .command_text()
                                .unwrap_or_else(|| utterance.clone());
                            let error_message = output
                                .command_responses
                                .first()
                                .map(|r| r.response.clone())
                                .unwrap_or_default();
                            let candidates = agent::error_candidates(&output);
                            if let Some(clarified) = agent::clarify_intent(
                                &self.agent_provider,
                                &self.agent_model,
                                &self.definition,
                                &original,
                                &error_message,
                                &candidates,
                                Some(cancel),
                            )
                            .await
                            {
                                debug!(attempt = attempts, "retrying with clarified command");
                                utterance = clarified;
                                continue;
                            }
                            // Last resort: ask through the session queues.
                            if let Some(answer) = agent::ask_user(
                                &runtime.command_output_tx,
                                &runtime.user_message_rx,
                                output.clone(),
                                Duration::from_millis(250),
                            )
                            .await
                            {
                                utterance = answer;
                                continue;
                            }
                        }
                    }
                    collector.emit(TraceEvent::new(
                        TraceKind::Response,
                        json!({ "success": output.success() }),
                    ));
                    return output;
                }
                TurnOutcome::ResolvedCommand {
                    command_name,
                    command_text,
                    parameters,
                } => {
                    collector.emit(TraceEvent::new(
                        TraceKind::Dispatch,
                        json!({
                            "command_name": command_name,
                            "parameters": parameters.to_json_map(),
                        }),
                    ));
                    let output = self.dispatch(
                        &mut inner.workflow,
                        &command_name,
                        &command_text,
                        &parameters,
                    );
                    inner.workflow.end_command_processing();
                    collector.emit(TraceEvent::new(
                        TraceKind::Response,
                        json!({ "success": output.success() }),
                    ));
                    return output;
                }
            }
        }
    }

    fn dispatch(
        &self,
        workflow: &mut Workflow,
        command_name: &str,
        command_text: &str,
        parameters: &ExtractedParameters,
    ) -> CommandOutput {
        let Some(generator) = self.registry.response_generator(command_name) else {
            warn!(command_name, "no response generator registered");
            return CommandOutput::single(CommandResponse::failure(format!(
                "No response generator registered for '{command_name}'"
            )))
            .with_command(command_name);
        };
        match generator.respond(workflow, command_text, parameters) {
            Ok(mut output) => {
                if output.command_name.is_none() {
                    output.command_name = Some(command_name.to_string());
                }
                output
            }
            Err(e) => {
                warn!(command_name, error = %e, "response generator failed");
                CommandOutput::single(CommandResponse::failure(e.to_string()))
                    .with_command(command_name)
            }
        }
    }

    /// Bypass-NLU dispatch of a structured action. Parameters are validated
    /// against the schema; fully-specified actions skip C3/C4/C5 entirely.
    pub async fn perform_action(
        &self,
        user_id: &str,
        action: &Action,
        timeout_seconds: u64,
    ) -> Result<InvocationResult> {
        let runtime = self.session(user_id)?;
        let deadline = Duration::from_secs(timeout_seconds.max(1));
        let collector = TraceCollector::new(None);

        let mut inner = match tokio::time::timeout(deadline, runtime.inner.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                return Ok(timeout_result(collector, timeout_seconds));
            }
        };

        let Some(command_name) = self.resolve_action_command(&inner.workflow, action) else {
            return Err(FastworkflowError::CommandNotFound {
                name: action.command_name.clone(),
            });
        };
        let Some(descriptor) = self.definition.command(&command_name) else {
            return Err(FastworkflowError::CommandNotFound { name: command_name });
        };

        let mut record = ExtractedParameters::default();
        for spec in &descriptor.parameters {
            let value = action
                .parameters
                .get(&spec.name)
                .and_then(|v| coerce::coerce_json(spec, v))
                .unwrap_or_else(|| spec.initial_value());
            record.set(&spec.name, value);
        }
        let validated =
            self.extractor
                .validate_record(&self.registry, descriptor, &mut inner.workflow, record);

        collector.emit(TraceEvent::new(
            TraceKind::ValidationResult,
            json!({
                "valid": validated.parameters_are_valid,
                "missing_invalid_fields": validated.missing_invalid_fields,
            }),
        ));

        let output = if validated.parameters_are_valid {
            collector.emit(TraceEvent::new(
                TraceKind::Dispatch,
                json!({ "command_name": command_name, "bypass": true }),
            ));
            self.dispatch(
                &mut inner.workflow,
                &command_name,
                &action.command_text,
                &validated.parameters,
            )
        } else {
            CommandOutput::single(CommandResponse::failure(
                validated
                    .error_message
                    .unwrap_or_else(|| "Invalid action parameters.".to_string()),
            ))
            .with_command(&command_name)
        };
        collector.emit(TraceEvent::new(
            TraceKind::Response,
            json!({ "success": output.success() }),
        ));

        self.workflow_store
            .flush(&mut inner.workflow)
            .map_err(db_err)?;
        let turn_record = ConversationTurn {
            summary: turn_summary(&format!("[action] {command_name}"), &output),
            traces: collector.events(),
            feedback: None,
        };
        inner.history.push(turn_record);
        self.persist_history(&runtime, &mut inner)?;

        Ok(InvocationResult {
            command_output: output,
            traces: collector.into_events(),
        })
    }

    fn resolve_action_command(&self, workflow: &Workflow, action: &Action) -> Option<String> {
        if let Some(context) = &action.context {
            let qualified = fastworkflow_registry::qualify(context, &action.command_name);
            if self.definition.command(&qualified).is_some() {
                return Some(qualified);
            }
        }
        if self.definition.command(&action.command_name).is_some() {
            return Some(action.command_name.clone());
        }
        let current = workflow.current_command_context_name();
        let qualified = fastworkflow_registry::qualify(&current, &action.command_name);
        if self.definition.command(&qualified).is_some() {
            return Some(qualified);
        }
        self.definition
            .commands()
            .find(|c| c.name == action.command_name && !c.is_builtin)
            .map(|c| c.qualified_name.clone())
    }

    /// Rotate the conversation: flush in-memory turns under a generated
    /// topic/summary, reserve the next id, and reset the history.
    pub async fn new_conversation(&self, user_id: &str) -> Result<i64> {
        let runtime = self.session(user_id)?;
        let mut inner = runtime.inner.lock().await;

        if let Some(current_id) = inner.conversation_id {
            if !inner.history.is_empty() {
                runtime
                    .store
                    .save_turns(current_id, &inner.history)
                    .map_err(db_err)?;
                let (topic, summary) = generate_topic_and_summary(
                    &self.store_provider,
                    &self.store_model,
                    &inner.history,
                )
                .await;
                runtime
                    .store
                    .update_topic_summary(current_id, &topic, &summary)
                    .map_err(db_err)?;
            }
        }

        let next = runtime.store.reserve_next_id().map_err(db_err)?;
        inner.conversation_id = Some(next);
        inner.history.clear();
        info!(user_id, conversation_id = next, "conversation rotated");
        Ok(next)
    }

    pub fn list_conversations(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>> {
        let runtime = self.session(user_id)?;
        runtime.store.list(limit).map_err(db_err)
    }

    /// Overwrite the last turn's feedback; last-write-wins, persisted on the
    /// next incremental save (done here immediately).
    pub async fn post_feedback(&self, user_id: &str, feedback: serde_json::Value) -> Result<()> {
        let runtime = self.session(user_id)?;
        let mut inner = runtime.inner.lock().await;
        let Some(last) = inner.history.last_mut() else {
            return Err(FastworkflowError::Internal(
                "no turn to attach feedback to".into(),
            ));
        };
        last.feedback = Some(feedback);
        self.persist_history(&runtime, &mut inner)
    }

    /// Load a persisted conversation's turns into memory and continue it.
    pub async fn activate_conversation(
        &self,
        user_id: &str,
        conversation: ConversationRef,
    ) -> Result<i64> {
        let runtime = self.session(user_id)?;
        let mut inner = runtime.inner.lock().await;

        let (id, record) = match conversation {
            ConversationRef::Id(id) => {
                let record = runtime
                    .store
                    .get(id)
                    .map_err(db_err)?
                    .ok_or_else(|| FastworkflowError::ConversationNotFound(id.to_string()))?;
                (id, record)
            }
            ConversationRef::Topic(topic) => runtime
                .store
                .get_by_topic(&topic)
                .map_err(db_err)?
                .ok_or(FastworkflowError::ConversationNotFound(topic))?,
        };

        inner.history = record.turns;
        inner.conversation_id = Some(id);
        info!(user_id, conversation_id = id, "conversation activated");
        Ok(id)
    }

    /// Dump every user's persisted conversations to a JSONL file in
    /// `output_folder`. Covers all users with a store shard on disk, active
    /// or not.
    pub fn dump_all_conversations(&self, output_folder: &Path) -> Result<PathBuf> {
        use std::io::Write;

        std::fs::create_dir_all(output_folder)?;
        let out_path = output_folder.join("all_conversations.jsonl");
        let mut file = std::fs::File::create(&out_path)?;

        let conversations_dir = Path::new(&self.config.storage.conversations_dir);
        if conversations_dir.is_dir() {
            for entry in std::fs::read_dir(conversations_dir)?.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("db") {
                    continue;
                }
                let Some(user_id) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let store =
                    ConversationStore::open(conversations_dir, user_id).map_err(db_err)?;
                for value in store.dump_all().map_err(db_err)? {
                    writeln!(file, "{value}")?;
                }
            }
        }
        info!(path = %out_path.display(), "conversations dumped");
        Ok(out_path)
    }

    /// Flush every open session's workflow. Called on graceful shutdown.
    pub async fn shutdown(&self) {
        for entry in self.sessions.iter() {
            let runtime = entry.value().clone();
            let mut inner = runtime.inner.lock().await;
            if let Err(e) = self.workflow_store.flush(&mut inner.workflow) {
                warn!(user_id = %runtime.user_id, error = %e, "workflow flush failed at shutdown");
            }
        }
    }

    fn persist_history(
        &self,
        runtime: &Arc<SessionRuntime>,
        inner: &mut RuntimeInner,
    ) -> Result<()> {
        let conversation_id = match inner.conversation_id {
            Some(id) => id,
            None => {
                let id = runtime.store.reserve_next_id().map_err(db_err)?;
                inner.conversation_id = Some(id);
                id
            }
        };
        runtime
            .store
            .save_turns(conversation_id, &inner.history)
            .map_err(db_err)
    }
}

fn chat_provider(
    role: &str,
    endpoint: Option<&fastworkflow_core::config::LlmEndpoint>,
) -> (Arc<dyn LlmProvider>, String) {
    match endpoint {
        Some(e) => (
            Arc::new(OpenAiCompatProvider::new(
                role.to_string(),
                e.base_url.clone(),
                e.api_key.clone(),
                e.timeout_seconds,
            )) as Arc<dyn LlmProvider>,
            e.model.clone(),
        ),
        None => (
            Arc::new(DeterministicProvider::new()) as Arc<dyn LlmProvider>,
            "deterministic".to_string(),
        ),
    }
}

fn lexical_model_from(definition: &WorkflowDefinition) -> LexicalIntentModel {
    let mut model = LexicalIntentModel::new();
    for descriptor in definition.commands() {
        let examples: Vec<&str> = descriptor
            .plain_utterances
            .iter()
            .map(String::as_str)
            .collect();
        if !examples.is_empty() {
            model = model.with_examples(descriptor.qualified_name.clone(), &examples);
        }
    }
    model
}

fn timeout_result(collector: TraceCollector, timeout_seconds: u64) -> InvocationResult {
    let output = CommandOutput::single(CommandResponse::failure(format!(
        "Request timed out after {timeout_seconds} seconds. State is preserved; you can retry."
    )));
    InvocationResult {
        command_output: output,
        traces: collector.into_events(),
    }
}

fn turn_summary(user_query: &str, output: &CommandOutput) -> String {
    let response = output
        .command_responses
        .first()
        .map(|r| r.response.replace('\n', " "))
        .unwrap_or_default();
    let response: String = response.chars().take(200).collect();
    format!("user: {user_query} | assistant: {response}")
}

fn db_err<E: std::fmt::Display>(e: E) -> FastworkflowError {
    FastworkflowError::Database(e.to_string())
}
