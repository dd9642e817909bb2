/// Workflow graph analysis with petgraph
///
/// Runs before any handler is invoked: selects the start nodes and proves
/// that dependency gating can reach every node. A cycle (or a node that can
/// only be reached through one) is rejected up front instead of silently
/// starving during traversal.

use crate::runtime::error::EngineError;
use crate::workflow::WorkflowDefinition;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Start nodes of a validated workflow, in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub start_nodes: Vec<String>,
}

/// Start nodes: no inbound edge, or a trigger type
pub fn start_nodes(workflow: &WorkflowDefinition) -> Vec<String> {
    let targets: HashSet<&str> = workflow.edges.iter().map(|e| e.target.as_str()).collect();
    workflow
        .nodes
        .iter()
        .filter(|n| n.node_type.is_trigger() || !targets.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}

/// Validate the graph and produce the execution plan
///
/// # Errors
/// - [`EngineError::DuplicateNodeId`] if two nodes share an id.
/// - [`EngineError::UnknownNode`] if an edge references a missing node.
/// - [`EngineError::NoStartNode`] if nothing can start the execution.
/// - [`EngineError::CycleOrUnreachableNode`] if gating can never reach a node.
pub fn plan(workflow: &WorkflowDefinition) -> Result<ExecutionPlan, EngineError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index_by_id: HashMap<&str, NodeIndex> = HashMap::new();

    for node in &workflow.nodes {
        if index_by_id.contains_key(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
        index_by_id.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
    }

    for edge in &workflow.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !index_by_id.contains_key(endpoint.as_str()) {
                return Err(EngineError::UnknownNode {
                    edge_id: edge.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }

    let start_nodes = start_nodes(workflow);
    if start_nodes.is_empty() {
        return Err(EngineError::NoStartNode);
    }

    // Start nodes are seeded and never wait on their inbound edges, so those
    // edges do not take part in dependency gating.
    let starts: HashSet<&str> = start_nodes.iter().map(String::as_str).collect();
    for edge in &workflow.edges {
        if starts.contains(edge.target.as_str()) {
            continue;
        }
        graph.add_edge(
            index_by_id[edge.source.as_str()],
            index_by_id[edge.target.as_str()],
            (),
        );
    }

    toposort(&graph, None).map_err(|cycle| {
        let node_id = graph[cycle.node_id()].to_string();
        tracing::error!("❌ Workflow '{}' can never reach node '{}'", workflow.id, node_id);
        EngineError::CycleOrUnreachableNode { node_id }
    })?;

    Ok(ExecutionPlan { start_nodes })
}
