/// Built-in node handlers
///
/// Handlers for the trigger and logic node types that ship with the runtime.
/// Integration nodes (HTTP, email, chat, code) live outside this crate.

use crate::{
    runtime::{condition, context::ExecutionContext, handlers::NodeHandler},
    workflow::{ConditionOperator, EdgeCondition, WorkflowNode},
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// Returns its input unchanged
///
/// Used for triggers (the input is the seeded trigger payload), `merge`
/// (inputs were already merged by the engine) and `noOp`.
#[derive(Debug, Default)]
pub struct PassThroughHandler;

#[async_trait]
impl NodeHandler for PassThroughHandler {
    async fn execute(&self, _node: &WorkflowNode, input: Value, _ctx: &ExecutionContext) -> Result<Value> {
        Ok(input)
    }
}

/// Shallow-merges `config.values` into the input object
///
/// Expected config: { "values": { "status": "approved" } }
/// A non-object input is wrapped as { "input": <value> } first.
#[derive(Debug, Default)]
pub struct SetHandler;

#[async_trait]
impl NodeHandler for SetHandler {
    async fn execute(&self, node: &WorkflowNode, input: Value, _ctx: &ExecutionContext) -> Result<Value> {
        let values = node
            .config
            .get("values")
            .and_then(|v| v.as_object())
            .ok_or_else(|| anyhow::anyhow!("Set node '{}' missing 'values' object", node.id))?;

        let mut output = match input {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        for (key, value) in values {
            output.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(output))
    }
}

/// Evaluates `config {field, operator, value}` against the input
///
/// Emits the input object with an added boolean `passed`, so downstream edges
/// can branch with `{ "field": "passed", "operator": "eq", "value": true }`.
#[derive(Debug, Default)]
pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    async fn execute(&self, node: &WorkflowNode, input: Value, _ctx: &ExecutionContext) -> Result<Value> {
        let field = node
            .config
            .get("field")
            .and_then(|f| f.as_str())
            .ok_or_else(|| anyhow::anyhow!("Condition node '{}' missing 'field' parameter", node.id))?;
        let operator: ConditionOperator = match node.config.get("operator") {
            Some(op) => serde_json::from_value(op.clone())?,
            None => ConditionOperator::Eq,
        };
        let gate = EdgeCondition {
            field: field.to_string(),
            operator,
            value: node.config.get("value").cloned().unwrap_or(Value::Null),
        };

        let passed = condition::evaluate(&gate, Some(&input));
        tracing::debug!("🔀 Condition node '{}' evaluated to {}", node.id, passed);

        let mut output = match input {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        output.insert("passed".to_string(), Value::Bool(passed));
        Ok(Value::Object(output))
    }
}

/// Sleeps for `config.durationMs` before passing the input on
#[derive(Debug, Default)]
pub struct WaitHandler;

#[async_trait]
impl NodeHandler for WaitHandler {
    async fn execute(&self, node: &WorkflowNode, input: Value, _ctx: &ExecutionContext) -> Result<Value> {
        let duration_ms = node
            .config
            .get("durationMs")
            .and_then(|d| d.as_u64())
            .unwrap_or(0);
        tracing::debug!("⏳ Wait node '{}' sleeping {}ms", node.id, duration_ms);
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        Ok(input)
    }
}
