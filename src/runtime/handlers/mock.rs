/// `MockHandler`: a scripted test double for `NodeHandler`.
///
/// Register it for a node type and script behaviour per node id. Every call
/// is recorded so tests can assert execution order and gathered inputs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::runtime::{context::ExecutionContext, handlers::NodeHandler};
use crate::workflow::WorkflowNode;

/// Behaviour scripted for one node id.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return the input unchanged (default for unscripted nodes).
    PassThrough,
    /// Return a specific JSON value.
    Return(Value),
    /// Always fail with the given message.
    Fail(String),
    /// Fail `times` times, then return the value.
    FailTimes { times: usize, then: Value },
    /// Sleep, then return the input.
    Sleep(Duration),
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub node_id: String,
    pub input: Value,
}

/// A handler that replays scripted behaviour and records every call.
#[derive(Debug, Default)]
pub struct MockHandler {
    behaviours: HashMap<String, MockBehaviour>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the behaviour of a node id.
    pub fn on(mut self, node_id: impl Into<String>, behaviour: MockBehaviour) -> Self {
        self.behaviours.insert(node_id.into(), behaviour);
        self
    }

    /// Shorthand for `on(node_id, MockBehaviour::Return(value))`.
    pub fn returning(self, node_id: impl Into<String>, value: Value) -> Self {
        self.on(node_id, MockBehaviour::Return(value))
    }

    /// Shorthand for `on(node_id, MockBehaviour::Fail(msg))`.
    pub fn failing(self, node_id: impl Into<String>, msg: impl Into<String>) -> Self {
        self.on(node_id, MockBehaviour::Fail(msg.into()))
    }

    /// All calls in invocation order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Node ids in invocation order.
    pub fn call_order(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.node_id).collect()
    }

    /// Number of times a node was invoked.
    pub fn call_count(&self, node_id: &str) -> usize {
        self.calls().iter().filter(|c| c.node_id == node_id).count()
    }

    /// Input seen by the most recent call for a node.
    pub fn last_input(&self, node_id: &str) -> Option<Value> {
        self.calls()
            .into_iter()
            .rev()
            .find(|c| c.node_id == node_id)
            .map(|c| c.input)
    }
}

#[async_trait]
impl NodeHandler for MockHandler {
    async fn execute(
        &self,
        node: &WorkflowNode,
        input: Value,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<Value> {
        let previous_calls = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = calls.iter().filter(|c| c.node_id == node.id).count();
            calls.push(MockCall {
                node_id: node.id.clone(),
                input: input.clone(),
            });
            previous
        };

        match self.behaviours.get(&node.id).unwrap_or(&MockBehaviour::PassThrough) {
            MockBehaviour::PassThrough => Ok(input),
            MockBehaviour::Return(value) => Ok(value.clone()),
            MockBehaviour::Fail(msg) => Err(anyhow::anyhow!("{}", msg)),
            MockBehaviour::FailTimes { times, then } => {
                if previous_calls < *times {
                    Err(anyhow::anyhow!("transient failure #{} in '{}'", previous_calls + 1, node.id))
                } else {
                    Ok(then.clone())
                }
            }
            MockBehaviour::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(input)
            }
        }
    }
}
