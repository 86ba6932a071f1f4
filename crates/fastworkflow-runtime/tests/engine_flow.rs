//! End-to-end engine flows: utterance → intent → parameters → dispatch,
//! conversation lifecycle, and the per-user single-flight guarantee.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use fastworkflow_core::config::FastworkflowConfig;
use fastworkflow_core::error::{FastworkflowError, Result};
use fastworkflow_core::types::{
    Action, CommandOutput, CommandResponse, ExtractedParameters, ParamValue,
};
use fastworkflow_registry::{ResponseGenerator, WorkflowContext, WorkflowRegistry};
use fastworkflow_runtime::{Engine, StreamFormat};

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
        &dir.join("_commands/slow_echo.json"),
        r#"{"plain_utterances": ["slow echo"]}"#,
    );
}

struct AddTwoNumbers;

impl ResponseGenerator for AddTwoNumbers {
    fn respond(
        &self,
        _workflow: &mut dyn WorkflowContext,
        _command_text: &str,
        parameters: &ExtractedParameters,
    ) -> Result<CommandOutput> {
        let first = match parameters.get("first_num") {
            Some(ParamValue::Float(v)) => *v,
            _ => return Err(FastworkflowError::Internal("missing first_num".into())),
        };
        let second = match parameters.get("second_num") {
            Some(ParamValue::Float(v)) => *v,
            _ => return Err(FastworkflowError::Internal("missing second_num".into())),
        };
        let sum = first + second;
        let mut response = CommandResponse::text(format!("The sum is {sum}"));
        response
            .artifacts
            .insert("sum_of_two_numbers".into(), json!(sum));
        Ok(CommandOutput::single(response))
    }
}

struct SlowEcho {
    active: Arc<AtomicUsize>,
    overlapped: Arc<AtomicUsize>,
}

impl ResponseGenerator for SlowEcho {
    fn respond(
        &self,
        _workflow: &mut dyn WorkflowContext,
        command_text: &str,
        _parameters: &ExtractedParameters,
    ) -> Result<CommandOutput> {
        let previously_active = self.active.fetch_add(1, Ordering::SeqCst);
        if previously_active > 0 {
            self.overlapped.fetch_add(1, Ordering::SeqCst);
        }
        std::thread::sleep(std::time::Duration::from_millis(40));
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(CommandOutput::single(CommandResponse::text(command_text)))
    }
}

struct TestHarness {
    engine: Engine,
    _workflow_dir: tempfile::TempDir,
    _state_dir: tempfile::TempDir,
}

fn harness() -> TestHarness {
    let workflow_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    seed_workflow(workflow_dir.path());

    let mut config = FastworkflowConfig::default();
    config.storage.conversations_dir = state_dir
        .path()
        .join("conversations")
        .display()
        .to_string();
    config.storage.workflow_db_path = state_dir
        .path()
        .join("sessions.db")
        .display()
        .to_string();

    let registry = Arc::new(WorkflowRegistry::new());
    registry
        .handlers()
        .register_response_generator("add_two_numbers", Arc::new(AddTwoNumbers));

    let engine = Engine::new(config, workflow_dir.path(), registry).unwrap();
    TestHarness {
        engine,
        _workflow_dir: workflow_dir,
        _state_dir: state_dir,
    }
}

#[tokio::test]
async fn clean_path_command_prefix_to_dispatch() {
    let h = harness();
    h.engine
        .initialize_session("alice", StreamFormat::Ndjson)
        .unwrap();

    let result = h
        .engine
        .invoke_agent(
            "alice",
            "add_two_numbers <first_num>5</first_num> <second_num>3</second_num>",
            30,
            None,
        )
        .await
        .unwrap();

    assert!(result.command_output.success());
    assert_eq!(
        result.command_output.command_responses[0].artifacts["sum_of_two_numbers"],
        json!(8.0)
    );
    // Traces were collected in happened-before order ending with the
    // response event.
    assert!(!result.traces.is_empty());
    let kinds: Vec<String> = result
        .traces
        .iter()
        .map(|t| format!("{:?}", t.kind))
        .collect();
    assert_eq!(kinds.last().map(String::as_str), Some("Response"));
}

#[tokio::test]
async fn invoking_without_a_session_is_an_error() {
    let h = harness();
    let err = h
        .engine
        .invoke_assistant("ghost", "add_two_numbers", 5)
        .await
        .unwrap_err();
    assert!(matches!(err, FastworkflowError::SessionNotFound { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_flight_serializes_concurrent_requests() {
    let workflow_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    seed_workflow(workflow_dir.path());

    let mut config = FastworkflowConfig::default();
    config.storage.conversations_dir =
        state_dir.path().join("conversations").display().to_string();
    config.storage.workflow_db_path = state_dir.path().join("sessions.db").display().to_string();

    let active = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(WorkflowRegistry::new());
    registry.handlers().register_response_generator(
        "slow_echo",
        Arc::new(SlowEcho {
            active: active.clone(),
            overlapped: overlapped.clone(),
        }),
    );

    let engine = Arc::new(Engine::new(config, workflow_dir.path(), registry).unwrap());
    engine.initialize_session("bob", StreamFormat::Ndjson).unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .invoke_assistant("bob", &format!("slow_echo run {i}"), 30)
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.command_output.success());
    }
    // Exactly one invocation executed at any instant.
    assert_eq!(overlapped.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn conversation_rotation_and_listing() {
    let h = harness();
    h.engine
        .initialize_session("alice", StreamFormat::Ndjson)
        .unwrap();

    for i in 0..3 {
        let result = h
            .engine
            .invoke_agent(
                "alice",
                &format!("add_two_numbers <first_num>{i}</first_num> <second_num>1</second_num>"),
                30,
                None,
            )
            .await
            .unwrap();
        assert!(result.command_output.success());
    }

    let rotated_to = h.engine.new_conversation("alice").await.unwrap();
    assert_eq!(rotated_to, 2); // id 1 was reserved by the first turn

    let listed = h.engine.list_conversations("alice", 10).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].conversation_id, 1);
    // Topic/summary were generated (fallback path without an LLM endpoint).
    assert!(!listed[0].topic.is_empty());
}

#[tokio::test]
async fn feedback_overwrites_last_turn() {
    let h = harness();
    h.engine
        .initialize_session("alice", StreamFormat::Ndjson)
        .unwrap();

    h.engine
        .invoke_agent(
            "alice",
            "add_two_numbers <first_num>1</first_num> <second_num>2</second_num>",
            30,
            None,
        )
        .await
        .unwrap();

    h.engine
        .post_feedback("alice", json!({"binary_or_numeric_score": 0}))
        .await
        .unwrap();
    // Last write wins.
    h.engine
        .post_feedback("alice", json!({"binary_or_numeric_score": 1, "nl_feedback": "great"}))
        .await
        .unwrap();

    // Feedback reached the persisted turn log.
    let out_dir = tempfile::tempdir().unwrap();
    let path = h.engine.dump_all_conversations(out_dir.path()).unwrap();
    let content = std::fs::read_to_string(path).unwrap();
    assert!(content.contains(r#""binary_or_numeric_score":1"#));
    assert!(content.contains("great"));
    assert!(!content.contains(r#""binary_or_numeric_score":0"#));
}

#[tokio::test]
async fn activate_conversation_resumes_history() {
    let h = harness();
    h.engine
        .initialize_session("alice", StreamFormat::Ndjson)
        .unwrap();

    h.engine
        .invoke_agent(
            "alice",
            "add_two_numbers <first_num>1</first_num> <second_num>2</second_num>",
            30,
            None,
        )
        .await
        .unwrap();
    let old_id = 1;
    h.engine.new_conversation("alice").await.unwrap();

    let resumed = h
        .engine
        .activate_conversation(
            "alice",
            fastworkflow_runtime::engine::ConversationRef::Id(old_id),
        )
        .await
        .unwrap();
    assert_eq!(resumed, old_id);

    let err = h
        .engine
        .activate_conversation(
            "alice",
            fastworkflow_runtime::engine::ConversationRef::Id(999),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FastworkflowError::ConversationNotFound(_)));
}

#[tokio::test]
async fn perform_action_bypasses_nlu_and_matches_invoke() {
    let h = harness();
    h.engine
        .initialize_session("alice", StreamFormat::Ndjson)
        .unwrap();

    let action = Action {
        context: None,
        command_name: "add_two_numbers".to_string(),
        command_text: String::new(),
        parameters: [
            ("first_num".to_string(), json!(5.0)),
            ("second_num".to_string(), json!(3.0)),
        ]
        .into_iter()
        .collect(),
    };
    let by_action = h.engine.perform_action("alice", &action, 30).await.unwrap();

    let by_utterance = h
        .engine
        .invoke_agent(
            "alice",
            "add_two_numbers <first_num>5</first_num> <second_num>3</second_num>",
            30,
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        by_action.command_output.command_responses[0].artifacts["sum_of_two_numbers"],
        by_utterance.command_output.command_responses[0].artifacts["sum_of_two_numbers"],
    );
}

#[tokio::test]
async fn perform_action_with_missing_required_parameter_fails_validation() {
    let h = harness();
    h.engine
        .initialize_session("alice", StreamFormat::Ndjson)
        .unwrap();

    let action = Action {
        context: None,
        command_name: "add_two_numbers".to_string(),
        command_text: String::new(),
        parameters: [("first_num".to_string(), json!(5.0))].into_iter().collect(),
    };
    let result = h.engine.perform_action("alice", &action, 30).await.unwrap();
    assert!(!result.command_output.success());
    assert!(result.command_output.command_responses[0]
        .response
        .contains("second_num"));
}

#[tokio::test]
async fn dump_all_conversations_writes_jsonl() {
    let h = harness();
    h.engine
        .initialize_session("alice", StreamFormat::Ndjson)
        .unwrap();
    h.engine
        .invoke_agent(
            "alice",
            "add_two_numbers <first_num>1</first_num> <second_num>2</second_num>",
            30,
            None,
        )
        .await
        .unwrap();

    let out_dir = tempfile::tempdir().unwrap();
    let path = h.engine.dump_all_conversations(out_dir.path()).unwrap();
    let content = std::fs::read_to_string(path).unwrap();
    assert!(content.lines().count() >= 1);
    let first: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(first["user_id"], "alice");
}
