/// Stepline: workflow automation runtime
///
/// This library provides the graph execution engine, the job queue (durable or
/// direct) and the cron scheduler behind a small axum HTTP surface.

// Core configuration and setup
pub mod config;

// Workflow management layer - workflow definitions and registry
pub mod workflow;

// Runtime execution engine - graph execution, handlers and scheduling
pub mod runtime;

// Job queue - durable SQLite backend or direct inline execution
pub mod queue;

// HTTP API layer - REST endpoints for workflows, webhooks, jobs and schedules
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use queue::{EnqueueOptions, EnqueueReceipt, JobQueue, QueueError};
pub use runtime::{ExecutionEngine, ExecutionRequest, ExecutionResult, HandlerRegistry, NodeHandler, Scheduler};
pub use server::{start_server, AppContext};
pub use workflow::{NodeType, WorkflowDefinition, WorkflowEdge, WorkflowNode};
