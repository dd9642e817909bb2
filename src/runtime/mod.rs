/// Runtime Execution Engine
///
/// This module provides the workflow execution and scheduling runtime:
/// - Graph validation and start-node selection with petgraph
/// - Dependency-gated node dispatch through the handler registry
/// - Edge conditions, error policies and the execution deadline
/// - Cron parsing and the background scheduler service

// Core execution engine
pub mod engine;

// Graph validation and start nodes
pub mod graph;

// Per-execution context and result envelopes
pub mod context;

// Edge condition evaluation
pub mod condition;

// Node handler trait, registry and built-ins
pub mod handlers;

// Engine error types
pub mod error;

// Five-field cron expressions
pub mod cron;

// Background cron scheduler service
pub mod scheduler;

// Re-export main types
pub use context::{ExecutionContext, ExecutionRequest, ExecutionResult, ExecutionStatus, TriggerMode};
pub use engine::ExecutionEngine;
pub use error::EngineError;
pub use handlers::{HandlerRegistry, NodeHandler};
pub use scheduler::{ScheduledJob, Scheduler, SchedulerError};
