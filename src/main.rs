/// Stepline: workflow automation runtime
///
/// Main entry point for the Stepline server. Initializes configuration and starts
/// the HTTP server with workflow execution, queueing and scheduling.

use stepline::{
    config::Config,
    server::{init_tracing, start_server},
};

/// Application entry point
///
/// The server provides:
/// - Workflow registration and execution at /api/workflows/*
/// - Webhook execution at /webhook/{workflow_id}
/// - Job, queue and schedule management at /api/jobs/*, /api/queue/*, /api/schedules/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging first so configuration warnings are visible
    init_tracing();

    // Load configuration (STEPLINE_* environment variables over defaults)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
