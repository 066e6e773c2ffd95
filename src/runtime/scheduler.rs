//! Background cron scheduler for schedule triggers
//!
//! Trigger nodes with `triggerType = schedule` and a cron expression are
//! registered with tokio-cron-scheduler. Jobs are tracked per
//! workflow:node key so a workflow update swaps its schedules without
//! touching anyone else's, and a fired job re-checks the registry so deleted
//! workflows skip execution gracefully instead of forcing a scheduler
//! restart.

use anyhow::Result;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::runtime::engine::{FlowExecutor, RunRequest};
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::types::{Node, TriggerKind, Workflow, WorkflowStatus};

pub struct CronSchedulerService {
    scheduler: RwLock<JobScheduler>,
    /// workflow_id:node_id -> scheduler job uuid, for precise removal
    job_ids: RwLock<HashMap<String, Uuid>>,
    registry: Arc<WorkflowRegistry>,
    executor: Arc<FlowExecutor>,
}

impl CronSchedulerService {
    pub async fn new(
        registry: Arc<WorkflowRegistry>,
        executor: Arc<FlowExecutor>,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: RwLock::new(scheduler),
            job_ids: RwLock::new(HashMap::new()),
            registry,
            executor,
        })
    }

    /// Register schedules for all loaded workflows and start ticking
    pub async fn start(&self) -> Result<()> {
        let workflows = self.registry.all_workflows();
        let mut total = 0usize;
        for workflow in &workflows {
            total += self.sync_workflow_triggers(workflow).await?;
        }
        {
            let scheduler = self.scheduler.read().await;
            scheduler.start().await?;
        }
        tracing::info!(
            "cron scheduler started with {total} schedule triggers from {} workflows",
            workflows.len()
        );
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.job_ids.write().await.clear();
        let mut scheduler = self.scheduler.write().await;
        scheduler.shutdown().await?;
        tracing::info!("cron scheduler stopped");
        Ok(())
    }

    /// Hot-reload the schedule triggers of one workflow: removes stale jobs
    /// and (re)registers current ones. Returns how many triggers are live.
    pub async fn sync_workflow_triggers(&self, workflow: &Workflow) -> Result<usize> {
        self.remove_workflow_triggers(&workflow.id).await;

        if workflow.status != WorkflowStatus::Active {
            return Ok(0);
        }

        let schedule_nodes: Vec<&Node> = workflow
            .trigger_nodes()
            .filter(|n| {
                n.data.trigger_type == Some(TriggerKind::Schedule)
                    && !n.data.schedule.as_deref().unwrap_or("").is_empty()
            })
            .collect();

        for node in &schedule_nodes {
            self.add_cron_job(&workflow.id, node).await?;
        }
        Ok(schedule_nodes.len())
    }

    /// Remove every scheduled job belonging to a workflow
    pub async fn remove_workflow_triggers(&self, workflow_id: &str) {
        let mut job_ids = self.job_ids.write().await;
        let keys: Vec<String> = job_ids
            .keys()
            .filter(|key| key.starts_with(&format!("{workflow_id}:")))
            .cloned()
            .collect();

        for key in keys {
            if let Some(job_id) = job_ids.remove(&key) {
                let scheduler = self.scheduler.read().await;
                if let Err(e) = scheduler.remove(&job_id).await {
                    tracing::warn!(job = %key, error = %e, "failed to remove cron job");
                }
            }
        }
    }

    async fn add_cron_job(&self, workflow_id: &str, node: &Node) -> Result<()> {
        let schedule = node
            .data
            .schedule
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("schedule trigger '{}' has no cron expression", node.id))?;

        let key = format!("{workflow_id}:{}", node.id);
        let workflow_id_owned = workflow_id.to_string();
        let node_id = node.id.clone();
        let registry = Arc::clone(&self.registry);
        let executor = Arc::clone(&self.executor);

        let job = Job::new_async(schedule, move |_uuid, _lock| {
            let workflow_id = workflow_id_owned.clone();
            let node_id = node_id.clone();
            let registry = Arc::clone(&registry);
            let executor = Arc::clone(&executor);

            Box::pin(async move {
                // Deleted or deactivated workflows skip silently
                let Some(compiled) = registry.get(&workflow_id) else {
                    tracing::debug!(workflow_id = %workflow_id, "skipping cron fire for removed workflow");
                    return;
                };
                if compiled.workflow.status != WorkflowStatus::Active {
                    return;
                }

                let mut request = RunRequest::new(
                    workflow_id.clone(),
                    TriggerKind::Schedule,
                    json!({
                        "triggerType": "schedule",
                        "workflowId": workflow_id.clone(),
                        "nodeId": node_id.clone(),
                    }),
                );
                request.trigger_node_id = Some(node_id.clone());

                match executor.run(request, CancellationToken::new()).await {
                    Ok(execution) => {
                        tracing::info!(
                            workflow_id = %workflow_id,
                            execution_id = %execution.id,
                            status = execution.status.as_str(),
                            "schedule-triggered execution finished"
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            workflow_id = %workflow_id,
                            error = %e,
                            "schedule-triggered execution failed to start"
                        );
                    }
                }
            })
        })?;

        let job_id = {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?
        };
        self.job_ids.write().await.insert(key.clone(), job_id);
        tracing::info!(job = %key, schedule = %schedule, "registered cron trigger");
        Ok(())
    }
}
