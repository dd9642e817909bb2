/// Runtime execution context and result envelopes
///
/// One `ExecutionContext` is created per execution and dropped when it
/// finishes. Handlers only ever see it through a shared reference: they can
/// read upstream outputs, variables and credentials but cannot rewrite what
/// other nodes produced.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::Mutex;
use uuid::Uuid;

/// How an execution was started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    #[default]
    Manual,
    Webhook,
    Schedule,
    Retry,
    Subworkflow,
}

impl std::fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Webhook => write!(f, "webhook"),
            Self::Schedule => write!(f, "schedule"),
            Self::Retry => write!(f, "retry"),
            Self::Subworkflow => write!(f, "subworkflow"),
        }
    }
}

/// Everything a trigger supplies to start one execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// External input; seeds every start node when present
    pub input: Option<Value>,
    pub user_id: Option<String>,
    pub mode: TriggerMode,
    /// Pre-allocated id (queued jobs); a fresh v4 id is generated otherwise
    pub execution_id: Option<Uuid>,
    /// Trigger-provided variables (e.g. webhook headers and query)
    pub variables: HashMap<String, Value>,
}

impl ExecutionRequest {
    pub fn new(mode: TriggerMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_execution_id(mut self, execution_id: Uuid) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }
}

/// Resolves credential references to secret material
///
/// Implemented by the credential store outside this crate. The engine calls
/// it at most once per credential id per execution.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, credential_id: &str) -> anyhow::Result<Value>;
}

/// Per-execution state, owned exclusively by one engine run
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub mode: TriggerMode,
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Original execution input
    pub input: Option<Value>,
    pub variables: HashMap<String, Value>,
    node_outputs: HashMap<String, Value>,
    executed_nodes: HashSet<String>,
    credentials: Mutex<HashMap<String, Value>>,
    credential_resolver: Option<Arc<dyn CredentialResolver>>,
}

impl ExecutionContext {
    pub(crate) fn new(
        workflow_id: &str,
        request: ExecutionRequest,
        credential_resolver: Option<Arc<dyn CredentialResolver>>,
    ) -> Self {
        Self {
            execution_id: request.execution_id.unwrap_or_else(Uuid::new_v4),
            workflow_id: workflow_id.to_string(),
            mode: request.mode,
            user_id: request.user_id,
            started_at: Utc::now(),
            input: request.input,
            variables: request.variables,
            node_outputs: HashMap::new(),
            executed_nodes: HashSet::new(),
            credentials: Mutex::new(HashMap::new()),
            credential_resolver,
        }
    }

    /// Output recorded for a node, if it has produced one
    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.node_outputs.get(node_id)
    }

    /// All recorded outputs keyed by node id
    pub fn node_outputs(&self) -> &HashMap<String, Value> {
        &self.node_outputs
    }

    pub fn is_executed(&self, node_id: &str) -> bool {
        self.executed_nodes.contains(node_id)
    }

    /// Resolve a credential, caching it for the rest of this execution
    pub async fn credential(&self, credential_id: &str) -> anyhow::Result<Value> {
        let mut cache = self.credentials.lock().await;
        if let Some(value) = cache.get(credential_id) {
            return Ok(value.clone());
        }

        let resolver = self
            .credential_resolver
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No credential resolver configured for '{}'", credential_id))?;
        let value = resolver.resolve(credential_id).await?;
        cache.insert(credential_id.to_string(), value.clone());
        Ok(value)
    }

    /// Seed a start node's output before traversal begins
    pub(crate) fn seed_output(&mut self, node_id: &str, value: Value) {
        self.node_outputs.insert(node_id.to_string(), value);
    }

    pub(crate) fn record_output(&mut self, node_id: &str, value: Value) {
        self.node_outputs.insert(node_id.to_string(), value);
    }

    /// Returns false when the node had already been marked
    pub(crate) fn mark_executed(&mut self, node_id: &str) -> bool {
        self.executed_nodes.insert(node_id.to_string())
    }

    /// Input handed to nodes with no inbound edges
    pub(crate) fn original_input(&self) -> Value {
        self.input.clone().unwrap_or_else(|| json!({}))
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("execution_id", &self.execution_id)
            .field("workflow_id", &self.workflow_id)
            .field("mode", &self.mode)
            .field("executed_nodes", &self.executed_nodes)
            .finish_non_exhaustive()
    }
}

/// Outcome of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Success,
    Error,
    Skipped,
}

/// Immutable record appended to the execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Overall outcome of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// Execution result envelope returned to callers and stored by the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub results: Vec<NodeExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// First recorded result for a node
    pub fn result_for(&self, node_id: &str) -> Option<&NodeExecutionResult> {
        self.results.iter().find(|r| r.node_id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialResolver for CountingResolver {
        async fn resolve(&self, credential_id: &str) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "token": format!("secret-{}", credential_id) }))
        }
    }

    #[tokio::test]
    async fn credentials_are_resolved_once_per_execution() {
        let resolver = Arc::new(CountingResolver { calls: AtomicUsize::new(0) });
        let ctx = ExecutionContext::new(
            "wf",
            ExecutionRequest::new(TriggerMode::Manual),
            Some(resolver.clone() as Arc<dyn CredentialResolver>),
        );

        let first = ctx.credential("slack").await.unwrap();
        let second = ctx.credential("slack").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first["token"], "secret-slack");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_resolver_is_an_error() {
        let ctx = ExecutionContext::new("wf", ExecutionRequest::default(), None);
        assert!(ctx.credential("db").await.is_err());
    }

    #[test]
    fn requested_execution_id_is_kept() {
        let id = Uuid::new_v4();
        let ctx = ExecutionContext::new(
            "wf",
            ExecutionRequest::new(TriggerMode::Retry).with_execution_id(id),
            None,
        );
        assert_eq!(ctx.execution_id, id);
        assert_eq!(ctx.mode, TriggerMode::Retry);
        assert_eq!(ctx.original_input(), json!({}));
    }

    #[test]
    fn trigger_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_value(TriggerMode::Subworkflow).unwrap(), json!("subworkflow"));
        assert_eq!(TriggerMode::Schedule.to_string(), "schedule");
    }
}
