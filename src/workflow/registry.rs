/// Hot-reload workflow registry using ArcSwap
///
/// Lock-free, atomic updates to the in-memory map of workflow definitions.
/// Every registration swaps the whole map pointer, so executions that already
/// loaded a definition keep their snapshot while new ones see the update.

use crate::workflow::types::WorkflowDefinition;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// Concurrent-read-safe workflow definition store
///
/// Shared by the execution engine, the job queue workers and the scheduler.
/// Reads never block; writes are copy-on-write through `ArcSwap::rcu`.
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    /// Key: workflow_id, Value: immutable definition snapshot
    workflows: ArcSwap<HashMap<String, Arc<WorkflowDefinition>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Register or replace a workflow definition
    ///
    /// Idempotent: re-registering under the same id replaces the prior
    /// definition. In-flight executions keep the snapshot they started with.
    pub fn register(&self, workflow: WorkflowDefinition) {
        let workflow_id = workflow.id.clone();
        let workflow = Arc::new(workflow);
        self.workflows.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(workflow_id.clone(), Arc::clone(&workflow));
            next
        });
        tracing::info!("📋 Registered workflow: {}", workflow_id);
    }

    /// Get a workflow by ID (lock-free read)
    pub fn get(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.load().get(workflow_id).cloned()
    }

    /// Remove a workflow; returns whether it was present
    pub fn remove(&self, workflow_id: &str) -> bool {
        let mut removed = false;
        self.workflows.rcu(|current| {
            let mut next = HashMap::clone(current);
            removed = next.remove(workflow_id).is_some();
            next
        });
        if removed {
            tracing::info!("🗑️ Removed workflow from registry: {}", workflow_id);
        }
        removed
    }

    /// All registered workflows, sorted by id for stable listings
    pub fn list(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut workflows: Vec<_> = self.workflows.load().values().cloned().collect();
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        workflows
    }

    pub fn len(&self) -> usize {
        self.workflows.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.load().is_empty()
    }
}
