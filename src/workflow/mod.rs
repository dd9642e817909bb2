/// Workflow Management Layer
///
/// This module holds the workflow graph model and the in-memory registry that
/// the engine, queue and scheduler resolve definitions from:
/// - Type definitions (WorkflowDefinition, WorkflowNode, WorkflowEdge)
/// - Lock-free hot-reload registry using ArcSwap

// Core workflow type definitions
pub mod types;

// Hot-reload registry using ArcSwap for zero-downtime updates
pub mod registry;

// Re-export commonly used types
pub use registry::WorkflowRegistry;
pub use types::{
    ConditionOperator, EdgeCondition, ErrorHandling, NodeType, WorkflowDefinition, WorkflowEdge,
    WorkflowNode, WorkflowSettings,
};
