//! Hot-reload workflow registry and endpoint index
//!
//! ArcSwap keeps both the workflow map and the endpoint index lock-free:
//! every mutation clones the current map, applies the change, and swaps the
//! pointer, so concurrent executions and route lookups never block. The
//! endpoint index maps full request paths to workflow ids and is rebuilt on
//! every registry change, which keeps request-time resolution O(1) instead of
//! sweeping workflow documents per request.

use anyhow::Result;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::workflow::storage::WorkflowStore;
use crate::workflow::types::Workflow;
use crate::runtime::graph::FlowGraph;

/// Compiled workflow with routing metadata
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub workflow: Workflow,
    /// Endpoint paths this workflow answers on while active
    pub endpoint_paths: Vec<String>,
    /// Trigger node ids in document order
    pub trigger_node_ids: Vec<String>,
}

/// Lock-free registry of all stored workflows plus the active endpoint index
pub struct WorkflowRegistry {
    workflows: ArcSwap<HashMap<String, CompiledWorkflow>>,
    endpoints: ArcSwap<HashMap<String, String>>,
    store: WorkflowStore,
}

impl WorkflowRegistry {
    pub fn new(store: WorkflowStore) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            endpoints: ArcSwap::new(Arc::new(HashMap::new())),
            store,
        }
    }

    /// Populate the registry from storage at startup
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.store.load_all().await?;
        let mut compiled = HashMap::new();
        for (id, workflow) in stored {
            compiled.insert(id, compile(workflow));
        }
        let count = compiled.len();
        self.swap(compiled);
        tracing::info!("initialized workflow registry with {count} workflows");
        Ok(())
    }

    /// Hot-reload one workflow from storage after a create/update
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<()> {
        let workflow = self
            .store
            .get(workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("workflow not found: {workflow_id}"))?;

        let mut next = (**self.workflows.load()).clone();
        next.insert(workflow_id.to_string(), compile(workflow));
        self.swap(next);
        tracing::info!(workflow_id = %workflow_id, "hot-reloaded workflow");
        Ok(())
    }

    pub fn remove_workflow(&self, workflow_id: &str) {
        let mut next = (**self.workflows.load()).clone();
        if next.remove(workflow_id).is_some() {
            self.swap(next);
            tracing::info!(workflow_id = %workflow_id, "removed workflow from registry");
        }
    }

    /// Lock-free read of a compiled workflow
    pub fn get(&self, workflow_id: &str) -> Option<CompiledWorkflow> {
        self.workflows.load().get(workflow_id).cloned()
    }

    pub fn all_workflows(&self) -> Vec<Workflow> {
        self.workflows
            .load()
            .values()
            .map(|c| c.workflow.clone())
            .collect()
    }

    /// O(1) endpoint resolution: full request path to workflow id
    pub fn resolve_endpoint(&self, path: &str) -> Option<String> {
        self.endpoints.load().get(path).cloned()
    }

    /// Current endpoint index snapshot (path -> workflow id)
    pub fn endpoint_routes(&self) -> HashMap<String, String> {
        (**self.endpoints.load()).clone()
    }

    fn swap(&self, workflows: HashMap<String, CompiledWorkflow>) {
        let mut endpoints = HashMap::new();
        for compiled in workflows.values() {
            if compiled.workflow.is_routable() {
                for path in &compiled.endpoint_paths {
                    if let Some(previous) =
                        endpoints.insert(path.clone(), compiled.workflow.id.clone())
                    {
                        // The store-level uniqueness check should make this
                        // unreachable; keep the last writer and shout
                        tracing::warn!(
                            path = %path,
                            previous = %previous,
                            current = %compiled.workflow.id,
                            "duplicate endpoint path in registry"
                        );
                    }
                }
            }
        }
        self.endpoints.store(Arc::new(endpoints));
        self.workflows.store(Arc::new(workflows));
    }
}

/// Extract routing metadata and surface structural problems early
fn compile(workflow: Workflow) -> CompiledWorkflow {
    let endpoint_paths = workflow.endpoint_paths();
    let trigger_node_ids: Vec<String> =
        workflow.trigger_nodes().map(|n| n.id.clone()).collect();

    match FlowGraph::build(&workflow) {
        Ok(graph) => {
            let starts: Vec<&str> = trigger_node_ids.iter().map(String::as_str).collect();
            let unreachable = graph.unreachable_from(starts.iter().copied());
            let orphans: Vec<&String> = unreachable
                .iter()
                .filter(|id| !trigger_node_ids.contains(id))
                .collect();
            if !orphans.is_empty() {
                tracing::warn!(
                    workflow_id = %workflow.id,
                    ?orphans,
                    "workflow has nodes unreachable from any trigger"
                );
            }
        }
        Err(e) => {
            tracing::warn!(workflow_id = %workflow.id, error = %e, "workflow graph is invalid");
        }
    }

    CompiledWorkflow {
        workflow,
        endpoint_paths,
        trigger_node_ids,
    }
}
