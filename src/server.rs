/// Server setup and initialization
///
/// Wires together all components: workflow registry, handler registry,
/// execution engine, job queue, scheduler and HTTP routes. `AppContext`
/// owns them with an explicit start/shutdown lifecycle.

use crate::{
    api::{create_api_routes, AppState},
    config::Config,
    queue::JobQueue,
    runtime::{
        context::CredentialResolver, engine::ExecutionEngine, handlers::HandlerRegistry, scheduler::Scheduler,
    },
    workflow::WorkflowRegistry,
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Every long-lived runtime component, constructed once
pub struct AppContext {
    pub config: Config,
    pub engine: Arc<ExecutionEngine>,
    pub queue: JobQueue,
    pub scheduler: Arc<Scheduler>,
}

impl AppContext {
    /// Build all components; nothing fires until `start`
    ///
    /// The handler registry is frozen here and shared read-only afterwards.
    pub async fn init(
        config: Config,
        handlers: HandlerRegistry,
        credentials: Option<Arc<dyn CredentialResolver>>,
    ) -> Result<Self> {
        tracing::info!("📊 Initializing workflow registry");
        let workflows = Arc::new(WorkflowRegistry::new());

        tracing::info!("🚀 Initializing execution engine ({:?})", handlers);
        let mut engine = ExecutionEngine::new(Arc::new(handlers), workflows, config.engine.clone());
        if let Some(resolver) = credentials {
            engine = engine.with_credential_resolver(resolver);
        }
        let engine = Arc::new(engine);

        tracing::info!("📥 Initializing job queue");
        let queue = JobQueue::connect(&config.queue, Arc::clone(&engine)).await;

        tracing::info!("⏰ Initializing cron scheduler service");
        let scheduler = Arc::new(
            Scheduler::new(queue.clone(), &config.scheduler)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize cron scheduler: {}", e))?,
        );

        Ok(Self {
            config,
            engine,
            queue,
            scheduler,
        })
    }

    /// Start background services (cron timers)
    pub async fn start(&self) -> Result<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start cron scheduler: {}", e))?;
        Ok(())
    }

    /// Stop timers first so nothing new is enqueued, then drain the queue
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("⏹️ Shutting down runtime");
        if let Err(e) = self.scheduler.shutdown().await {
            tracing::warn!("⚠️ Cron scheduler shutdown failed: {}", e);
        }
        self.queue.shutdown().await;
        tracing::info!("✅ Runtime stopped");
        Ok(())
    }

    pub fn state(&self) -> AppState {
        AppState {
            queue: self.queue.clone(),
            scheduler: Arc::clone(&self.scheduler),
        }
    }

    /// HTTP router over this context
    pub fn router(&self) -> Router {
        create_app(self.state())
    }
}

/// Create the main Axum application with all routes
pub fn create_app(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        .merge(create_api_routes())
        .with_state(state)
}

/// Install the global tracing subscriber
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}

/// Start the HTTP server with the given configuration
///
/// Runs until Ctrl-C, then shuts the runtime down gracefully.
pub async fn start_server(config: Config) -> Result<()> {
    tracing::info!("Starting Stepline server...");

    let context = AppContext::init(config, HandlerRegistry::with_builtins(), None).await?;
    context.start().await?;
    let app = context.router();

    // Bind to the configured address
    let bind_addr = format!("{}:{}", context.config.server.host, context.config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{} (queue mode: {:?})", bind_addr, context.queue.mode());

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    context.shutdown().await
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
