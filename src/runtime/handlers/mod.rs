/// Node handler registry: the dispatch surface between the engine and the
/// code that actually performs each step.
///
/// Registration happens once at startup; the registry is then frozen behind an
/// `Arc` and shared read-only by every concurrent execution.

pub mod builtin;
pub mod mock;

use async_trait::async_trait;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

use crate::runtime::context::ExecutionContext;
use crate::workflow::{NodeType, WorkflowNode};

/// The contract every node type's implementation fulfils.
///
/// `input` is the gathered output of the node's upstream edges. The context is
/// borrowed immutably: a handler may read other nodes' outputs but never
/// rewrite them.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(
        &self,
        node: &WorkflowNode,
        input: Value,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<Value>;
}

/// Maps node types to handler implementations.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeType, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the runtime's built-in trigger and logic handlers.
    ///
    /// Integration types (`httpRequest`, `sendEmail`, `chatMessage`, `code`)
    /// are left for the embedding application to register.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let passthrough: Arc<dyn NodeHandler> = Arc::new(builtin::PassThroughHandler);
        registry.register(NodeType::ManualTrigger, Arc::clone(&passthrough));
        registry.register(NodeType::WebhookTrigger, Arc::clone(&passthrough));
        registry.register(NodeType::ScheduleTrigger, Arc::clone(&passthrough));
        registry.register(NodeType::Merge, Arc::clone(&passthrough));
        registry.register(NodeType::NoOp, passthrough);
        registry.register(NodeType::Set, Arc::new(builtin::SetHandler));
        registry.register(NodeType::Condition, Arc::new(builtin::ConditionHandler));
        registry.register(NodeType::Wait, Arc::new(builtin::WaitHandler));
        registry
    }

    /// Register (or replace) the handler for a node type.
    pub fn register(&mut self, node_type: NodeType, handler: Arc<dyn NodeHandler>) -> &mut Self {
        if self.handlers.insert(node_type, handler).is_some() {
            tracing::debug!("🔁 Replaced handler for node type {:?}", node_type);
        }
        self
    }

    /// Resolve the handler for a node type.
    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&node_type).cloned()
    }

    pub fn contains(&self, node_type: NodeType) -> bool {
        self.handlers.contains_key(&node_type)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().map(|t| format!("{:?}", t)).collect();
        types.sort();
        f.debug_struct("HandlerRegistry").field("types", &types).finish()
    }
}
