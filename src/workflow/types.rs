/// Core workflow type definitions
///
/// Defines the graph a user composes: workflow definitions, typed nodes, and
/// edges optionally gated by a condition. These types travel as camelCase JSON
/// between the persistence layer, the HTTP API and the queue backend.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A complete workflow definition containing nodes and their connections
///
/// Owned by the caller (persistence layer) and registered into the
/// `WorkflowRegistry`. The engine only ever reads it; a definition is never
/// mutated while an execution holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Unique workflow identifier (e.g., "wf-grading")
    pub id: String,
    /// Human-readable workflow name
    #[serde(default)]
    pub name: String,
    /// Nodes in declaration order. Order matters for traversal and for
    /// picking the final output.
    pub nodes: Vec<WorkflowNode>,
    /// Edges in declaration order. Order decides merge precedence.
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    /// Optional execution settings (error policy, retries, timeout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<WorkflowSettings>,
}

impl WorkflowDefinition {
    /// Look up a node by id
    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Edges whose target is `node_id`, in declaration order
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Edges whose source is `node_id`, in declaration order
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Effective settings, falling back to the defaults when none are set
    pub fn effective_settings(&self) -> WorkflowSettings {
        self.settings.clone().unwrap_or_default()
    }
}

/// Per-workflow execution settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
    /// What to do when a node handler fails
    #[serde(default)]
    pub error_handling: ErrorHandling,
    /// Extra handler attempts when `error_handling` is `retry`
    #[serde(default)]
    pub max_retries: u32,
    /// Wall-clock budget for the whole execution, in milliseconds
    #[serde(default, rename = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Node failure policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandling {
    /// Abort the execution on the first failing node
    #[default]
    Stop,
    /// Record the failure and keep traversing with the absent output
    Continue,
    /// Re-invoke the handler up to `max_retries` times, then abort
    Retry,
}

/// A single node in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    /// Unique node identifier within the workflow (e.g., "n1", "webhook-start")
    pub id: String,
    /// The type tag which selects the handler
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Display name shown in the editor
    #[serde(default)]
    pub name: String,
    /// Node-specific configuration as a free-form JSON map
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Optional reference to a credential resolved lazily at execution time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,
}

impl WorkflowNode {
    /// Convenience constructor used by tests and programmatic builders
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            node_type,
            config: Map::new(),
            credential_id: None,
        }
    }

    /// Builder-style config setter
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// Closed set of node types understood by the runtime
///
/// Triggers start an execution, logic nodes ship with the runtime, and
/// integration nodes (HTTP, email, chat, code) are provided by external
/// collaborators that register a handler at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    /// Started by an explicit API call
    ManualTrigger,
    /// Started by an inbound HTTP request
    WebhookTrigger,
    /// Started by the cron scheduler
    ScheduleTrigger,
    /// Merge `config.values` into the input object
    Set,
    /// Pass through the merged output of every inbound edge
    Merge,
    /// Evaluate `config {field, operator, value}` and flag the result
    Condition,
    /// Sleep for `config.durationMs` before passing the input on
    Wait,
    /// Pass the input through unchanged
    NoOp,
    /// Outbound HTTP call (external handler)
    HttpRequest,
    /// Outbound email (external handler)
    SendEmail,
    /// Outbound chat message (external handler)
    ChatMessage,
    /// User script run in an external sandbox (external handler)
    Code,
}

impl NodeType {
    /// Trigger types always start an execution, even with inbound edges
    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            NodeType::ManualTrigger | NodeType::WebhookTrigger | NodeType::ScheduleTrigger
        )
    }
}

/// Connection between two nodes in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEdge {
    /// Edge identifier
    #[serde(default)]
    pub id: String,
    /// Source node ID
    pub source: String,
    /// Target node ID
    pub target: String,
    /// Optional gate evaluated against the source node's output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<EdgeCondition>,
}

impl WorkflowEdge {
    /// Unconditional edge with an id derived from its endpoints
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}->{}", source, target),
            source,
            target,
            condition: None,
        }
    }

    /// Attach a condition to this edge
    pub fn when(mut self, field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        self.condition = Some(EdgeCondition {
            field: field.into(),
            operator,
            value,
        });
        self
    }
}

/// Gate on an edge: `field` is a dot path into the source node's output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

/// Comparison operators supported by edge and condition-node gates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Regex,
    /// Any operator the runtime does not know; always passes
    #[serde(other)]
    Unknown,
}
