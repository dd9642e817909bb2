/// Engine-level error types.

use std::time::Duration;
use thiserror::Error;

use crate::workflow::NodeType;

/// Errors produced by the execution engine (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// No node qualifies as an entry point.
    #[error("workflow has no start node")]
    NoStartNode,

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    UnknownNode { edge_id: String, node_id: String },

    /// A node can never satisfy its dependencies (cycle or starved branch).
    #[error("node '{node_id}' is part of a cycle or unreachable from any start node")]
    CycleOrUnreachableNode { node_id: String },

    // ------ Execution errors ------

    /// No handler registered for the node's type.
    #[error("no handler registered for node type {node_type:?} (node '{node_id}')")]
    HandlerNotFound { node_id: String, node_type: NodeType },

    /// A node handler returned an error and the error policy aborted the run.
    #[error("node '{node_id}' failed: {message}")]
    NodeFailed { node_id: String, message: String },

    /// The workflow's wall-clock budget ran out.
    #[error("execution exceeded timeout of {0:?}")]
    Timeout(Duration),

    /// The caller referenced a workflow id that is not registered.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),
}
