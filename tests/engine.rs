//! Execution engine behaviour: gating, input gathering, error policies and
//! the execution deadline.

mod common;

use common::*;
use serde_json::json;
use std::time::Duration;
use stepline::{
    runtime::{
        context::{ExecutionRequest, NodeStatus, TriggerMode},
        handlers::mock::{MockBehaviour, MockHandler},
        EngineError, ExecutionStatus,
    },
    workflow::{ConditionOperator, ErrorHandling, NodeType, WorkflowNode},
};

fn manual(input: serde_json::Value) -> ExecutionRequest {
    ExecutionRequest::new(TriggerMode::Manual).with_input(input)
}

#[tokio::test]
async fn linear_chain_passes_outputs_downstream() {
    let (engine, mock) = engine_with(
        MockHandler::new()
            .returning("a", json!({ "step": "a" }))
            .returning("b", json!({ "step": "b" })),
    );
    let wf = workflow(
        "linear",
        vec![code("a"), code("b"), code("c")],
        vec![edge("a", "b"), edge("b", "c")],
    );

    let result = engine.execute(&wf, manual(json!({ "seed": true }))).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(mock.call_order(), vec!["a", "b", "c"]);
    assert_eq!(mock.last_input("a"), Some(json!({ "seed": true })));
    assert_eq!(mock.last_input("b"), Some(json!({ "step": "a" })));
    assert_eq!(mock.last_input("c"), Some(json!({ "step": "b" })));
    assert_eq!(result.output, Some(json!({ "step": "b" })));
    assert!(result.error.is_none());
}

#[tokio::test]
async fn start_mid_end_scenario() {
    let (engine, _mock) = engine_with(MockHandler::new());
    let wf = workflow(
        "scenario",
        vec![code("Start"), code("Mid"), code("End")],
        vec![edge("Start", "Mid"), edge("Mid", "End")],
    );

    let result = engine.execute(&wf, manual(json!({ "x": 1 }))).await;

    assert!(result.is_success());
    assert_eq!(result.result_for("Start").and_then(|r| r.data.clone()), Some(json!({ "x": 1 })));
    let mid = result.result_for("Mid").and_then(|r| r.data.clone());
    assert_eq!(result.output, mid);
    assert_eq!(result.results.len(), 3);
}

#[tokio::test]
async fn multiple_inbound_edges_merge_in_declaration_order() {
    let (engine, mock) = engine_with(
        MockHandler::new()
            .returning("left", json!({ "shared": "left", "l": 1 }))
            .returning("right", json!({ "shared": "right", "r": 2 }))
            .returning("scalar", json!(42)),
    );
    let wf = workflow(
        "merge",
        vec![code("left"), code("right"), code("scalar"), code("join")],
        vec![edge("left", "join"), edge("right", "join"), edge("scalar", "join")],
    );

    let result = engine.execute(&wf, ExecutionRequest::default()).await;

    assert!(result.is_success());
    assert_eq!(
        mock.last_input("join"),
        Some(json!({ "shared": "right", "l": 1, "r": 2, "scalar": 42 }))
    );
}

#[tokio::test]
async fn diamond_join_runs_once_after_both_branches() {
    let (engine, mock) = engine_with(MockHandler::new());
    let wf = workflow(
        "diamond",
        vec![code("a"), code("b"), code("c"), code("d")],
        vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
    );

    let result = engine.execute(&wf, manual(json!({ "v": 1 }))).await;

    assert!(result.is_success());
    assert_eq!(mock.call_order(), vec!["a", "b", "c", "d"]);
    assert_eq!(mock.call_count("d"), 1);
}

#[tokio::test]
async fn trigger_nodes_start_even_with_inbound_edges() {
    let (engine, mock) = engine_with(MockHandler::new());
    let wf = workflow(
        "triggers",
        vec![
            WorkflowNode::new("hook", NodeType::WebhookTrigger),
            code("work"),
            WorkflowNode::new("manual", NodeType::ManualTrigger),
        ],
        vec![edge("hook", "work"), edge("work", "manual")],
    );

    let result = engine.execute(&wf, manual(json!({ "seed": 1 }))).await;

    assert!(result.is_success());
    assert_eq!(mock.last_input("work"), Some(json!({ "seed": 1 })));
    assert_eq!(result.result_for("manual").map(|r| r.status), Some(NodeStatus::Success));
}

#[tokio::test]
async fn missing_input_starts_from_empty_object() {
    let (engine, mock) = engine_with(MockHandler::new());
    let wf = workflow("empty", vec![code("only")], vec![]);

    let result = engine.execute(&wf, ExecutionRequest::default()).await;

    assert!(result.is_success());
    assert_eq!(mock.last_input("only"), Some(json!({})));
}

#[tokio::test]
async fn stop_policy_aborts_at_failing_node() {
    let (engine, mock) = engine_with(MockHandler::new().failing("mid", "boom"));
    let wf = workflow(
        "stop",
        vec![code("start"), code("mid"), code("end")],
        vec![edge("start", "mid"), edge("mid", "end")],
    );

    let result = engine.execute(&wf, manual(json!({}))).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.output.is_none());
    assert_eq!(result.results.len(), 2);
    let mid = result.result_for("mid").unwrap();
    assert_eq!(mid.status, NodeStatus::Error);
    assert_eq!(mid.error.as_deref(), Some("boom"));
    assert!(result.error.as_deref().unwrap().contains("mid"));
    assert_eq!(mock.call_count("end"), 0);
}

#[tokio::test]
async fn continue_policy_keeps_traversing_with_absent_output() {
    let (engine, mock) = engine_with(MockHandler::new().failing("mid", "boom"));
    let wf = with_policy(
        workflow(
            "continue",
            vec![code("start"), code("mid"), code("end")],
            vec![edge("start", "mid"), edge("mid", "end")],
        ),
        ErrorHandling::Continue,
        0,
        None,
    );

    let result = engine.execute(&wf, manual(json!({ "x": 1 }))).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.result_for("mid").map(|r| r.status), Some(NodeStatus::Error));
    assert_eq!(result.result_for("end").map(|r| r.status), Some(NodeStatus::Success));
    assert_eq!(mock.last_input("end"), Some(serde_json::Value::Null));
}

#[tokio::test]
async fn retry_policy_recovers_from_transient_failures() {
    let (engine, mock) = engine_with(MockHandler::new().on(
        "flaky",
        MockBehaviour::FailTimes {
            times: 2,
            then: json!({ "ok": true }),
        },
    ));
    let wf = with_policy(
        workflow("retry", vec![code("flaky")], vec![]),
        ErrorHandling::Retry,
        2,
        None,
    );

    let result = engine.execute(&wf, ExecutionRequest::default()).await;

    assert!(result.is_success());
    assert_eq!(mock.call_count("flaky"), 3);
    assert_eq!(result.output, Some(json!({ "ok": true })));
    assert_eq!(result.results.len(), 1);
}

#[tokio::test]
async fn retry_policy_gives_up_after_max_retries() {
    let (engine, mock) = engine_with(MockHandler::new().failing("bad", "still broken"));
    let wf = with_policy(
        workflow("retry-exhausted", vec![code("bad"), code("after")], vec![edge("bad", "after")]),
        ErrorHandling::Retry,
        2,
        None,
    );

    let result = engine.execute(&wf, ExecutionRequest::default()).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(mock.call_count("bad"), 3);
    assert_eq!(mock.call_count("after"), 0);
    assert_eq!(result.result_for("bad").and_then(|r| r.error.clone()).as_deref(), Some("still broken"));
}

#[tokio::test]
async fn deadline_cancels_slow_node() {
    let (engine, mock) = engine_with(MockHandler::new().on("slow", MockBehaviour::Sleep(Duration::from_secs(5))));
    let wf = with_policy(
        workflow("timeout", vec![code("slow"), code("after")], vec![edge("slow", "after")]),
        ErrorHandling::Stop,
        0,
        Some(50),
    );

    let started = std::time::Instant::now();
    let result = engine.execute(&wf, ExecutionRequest::default()).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.error.as_deref().unwrap().contains("timeout"));
    assert_eq!(result.result_for("slow").map(|r| r.status), Some(NodeStatus::Error));
    assert_eq!(mock.call_count("after"), 0);
}

#[tokio::test]
async fn deadline_fails_run_even_under_continue_policy() {
    let (engine, mock) = engine_with(MockHandler::new().on("slow", MockBehaviour::Sleep(Duration::from_secs(5))));
    let wf = with_policy(
        workflow("timeout-continue", vec![code("slow"), code("after")], vec![edge("slow", "after")]),
        ErrorHandling::Continue,
        0,
        Some(50),
    );

    let result = engine.execute(&wf, ExecutionRequest::default()).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(mock.call_count("after"), 0);
}

#[tokio::test]
async fn failed_edge_condition_skips_target() {
    let (engine, mock) = engine_with(MockHandler::new().returning("score", json!({ "result": { "score": 30 } })));
    let wf = workflow(
        "conditional",
        vec![code("score"), code("pass"), code("fail")],
        vec![
            edge("score", "pass").when("result.score", ConditionOperator::Gte, json!(50)),
            edge("score", "fail").when("result.score", ConditionOperator::Lt, json!(50)),
        ],
    );

    let result = engine.execute(&wf, ExecutionRequest::default()).await;

    assert!(result.is_success());
    assert_eq!(mock.call_order(), vec!["score", "fail"]);
    assert_eq!(result.result_for("pass").map(|r| r.status), Some(NodeStatus::Skipped));
    // "fail" is the last sink in declaration order
    assert_eq!(result.output, Some(json!({ "result": { "score": 30 } })));
}

#[tokio::test]
async fn condition_node_flags_its_input() {
    let (engine, _mock) = engine_with(MockHandler::new());
    let wf = workflow(
        "condition-node",
        vec![
            WorkflowNode::new("start", NodeType::ManualTrigger),
            WorkflowNode::new("check", NodeType::Condition)
                .with_config("field", json!("amount"))
                .with_config("operator", json!("gt"))
                .with_config("value", json!(10)),
            code("approve"),
        ],
        vec![
            edge("start", "check"),
            edge("check", "approve").when("passed", ConditionOperator::Eq, json!(true)),
        ],
    );

    let result = engine.execute(&wf, manual(json!({ "amount": 25 }))).await;

    assert!(result.is_success());
    assert_eq!(result.output, Some(json!({ "amount": 25, "passed": true })));
}

#[tokio::test]
async fn cycle_is_rejected_before_any_handler_runs() {
    let (engine, mock) = engine_with(MockHandler::new());
    let wf = workflow(
        "cycle",
        vec![code("start"), code("a"), code("b")],
        vec![edge("start", "a"), edge("a", "b"), edge("b", "a")],
    );

    let result = engine.execute(&wf, ExecutionRequest::default()).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.results.is_empty());
    assert!(mock.calls().is_empty());
    assert!(result.error.as_deref().unwrap().contains("cycle"));
}

#[tokio::test]
async fn missing_handler_aborts_even_under_continue() {
    let (engine, _mock) = engine_with(MockHandler::new());
    let wf = with_policy(
        workflow(
            "no-handler",
            vec![code("start"), WorkflowNode::new("mail", NodeType::SendEmail), code("end")],
            vec![edge("start", "mail"), edge("mail", "end")],
        ),
        ErrorHandling::Continue,
        0,
        None,
    );

    let result = engine.execute(&wf, ExecutionRequest::default()).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.result_for("mail").map(|r| r.status), Some(NodeStatus::Error));
    assert!(result.result_for("end").is_none());
    assert!(result.error.as_deref().unwrap().contains("no handler"));
}

#[tokio::test]
async fn unknown_registered_workflow_is_an_error() {
    let (engine, _mock) = engine_with(MockHandler::new());

    let err = engine
        .execute_registered("does-not-exist", ExecutionRequest::default())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::WorkflowNotFound(id) if id == "does-not-exist"));
}

#[tokio::test]
async fn registered_workflow_executes_by_id() {
    let (engine, mock) = engine_with(MockHandler::new());
    engine.register_workflow(workflow("registered", vec![code("a")], vec![]));

    let result = engine
        .execute_registered("registered", manual(json!({ "k": "v" })))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(mock.last_input("a"), Some(json!({ "k": "v" })));
}

#[tokio::test]
async fn handlers_see_trigger_context() {
    let (engine, _mock) = engine_with(MockHandler::new());
    let wf = workflow("context", vec![probe("probe")], vec![]);
    let request = ExecutionRequest::new(TriggerMode::Webhook)
        .with_user("user-7")
        .with_variable("method", json!("POST"));

    let result = engine.execute(&wf, request).await;
    let output = result.output.unwrap();

    assert_eq!(output["mode"], "webhook");
    assert_eq!(output["userId"], "user-7");
    assert_eq!(output["variables"]["method"], "POST");
    assert_eq!(output["executionId"], result.execution_id.to_string());
}

#[tokio::test]
async fn builtin_set_and_wait_nodes() {
    let (engine, _mock) = engine_with(MockHandler::new());
    let wf = workflow(
        "builtins",
        vec![
            WorkflowNode::new("start", NodeType::ManualTrigger),
            WorkflowNode::new("set", NodeType::Set).with_config("values", json!({ "status": "ready" })),
            WorkflowNode::new("wait", NodeType::Wait).with_config("durationMs", json!(5)),
        ],
        vec![edge("start", "set"), edge("set", "wait")],
    );

    let result = engine.execute(&wf, manual(json!({ "id": 9 }))).await;

    assert!(result.is_success());
    assert_eq!(result.output, Some(json!({ "id": 9, "status": "ready" })));
}
