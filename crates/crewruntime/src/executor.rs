use crate::runner::TaskRunner;
use crate::store::ExecutionStore;
use crewcore::{
    EngineError, ExecutionEvent, ExecutionMode, ExecutionStatus, NotificationBus, Result, Task,
    TaskExecution, TaskId, TaskRunStatus, Topic, WorkflowExecution, WorkflowId,
};
use chrono::Utc;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;

/// State machine driving a workflow execution: validates the request,
/// creates the pending record, and runs the detached unit of work that
/// dispatches tasks per the workflow's execution mode.
#[derive(Clone)]
pub struct WorkflowExecutor {
    store: Arc<dyn ExecutionStore>,
    bus: Arc<NotificationBus>,
    runner: TaskRunner,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        bus: Arc<NotificationBus>,
        runner: TaskRunner,
    ) -> Self {
        Self { store, bus, runner }
    }

    /// Synchronous half of `Execute`: validates the workflow and persists
    /// the pending record. The caller submits [`WorkflowExecutor::drive`]
    /// to the worker pool with the returned record.
    pub async fn begin(
        &self,
        workflow_id: WorkflowId,
        input: Option<serde_json::Value>,
    ) -> Result<(WorkflowExecution, ExecutionMode)> {
        let workflow = self
            .store
            .workflow(workflow_id)
            .await
            .ok_or_else(|| EngineError::not_found("workflow", workflow_id))?;

        if !workflow.active {
            return Err(EngineError::Validation("workflow is not active".to_string()));
        }
        match workflow.mode {
            ExecutionMode::Sequential | ExecutionMode::Concurrent => {}
            ExecutionMode::Conditional | ExecutionMode::Looped => {
                return Err(EngineError::Validation(format!(
                    "execution mode {:?} has no defined semantics",
                    workflow.mode
                )));
            }
        }

        let tasks = self.store.active_tasks(workflow_id).await;
        validate_dependencies(&tasks)?;

        let execution = self
            .store
            .create_execution(workflow_id, input)
            .await
            .ok_or_else(|| EngineError::not_found("workflow", workflow_id))?;

        tracing::info!(
            "Created execution {} for workflow {}",
            execution.id,
            workflow_id
        );
        Ok((execution, workflow.mode))
    }

    /// Detached unit of work. Orchestration errors are funneled into the
    /// execution's failure path; clean task failures stay on the task
    /// records and leave the workflow execution `Completed`.
    pub async fn drive(&self, execution: WorkflowExecution, mode: ExecutionMode) {
        let execution_id = execution.id;
        let workflow_id = execution.workflow_id;

        if !self.store.mark_execution_running(execution_id).await {
            // Cancelled (or otherwise settled) before dispatch.
            tracing::warn!("Execution {} no longer pending, not dispatching", execution_id);
            return;
        }

        self.bus.publish(
            Topic::Workflow(workflow_id),
            ExecutionEvent::WorkflowStarted {
                execution_id,
                workflow_id,
                timestamp: Utc::now(),
            },
        );
        tracing::info!("Starting workflow execution: {}", execution_id);

        let tasks = self.store.active_tasks(workflow_id).await;

        let outcome = if tasks.is_empty() {
            Ok(())
        } else {
            match mode {
                ExecutionMode::Sequential => self.run_sequential(&execution, &tasks).await,
                ExecutionMode::Concurrent => self.run_concurrent(&execution, &tasks).await,
                // Rejected in `begin`; nothing to dispatch.
                ExecutionMode::Conditional | ExecutionMode::Looped => {
                    Err(format!("execution mode {:?} has no defined semantics", mode))
                }
            }
        };

        let (status, error) = match outcome {
            Ok(()) => (ExecutionStatus::Completed, None),
            Err(message) => {
                tracing::error!("Execution {} failed: {}", execution_id, message);
                (ExecutionStatus::Failed, Some(message))
            }
        };

        // `finish_execution` refuses to overwrite a terminal status, so a
        // cancellation that raced us wins and no terminal event is emitted.
        if let Some(finished) = self
            .store
            .finish_execution(execution_id, status, None, error.clone())
            .await
        {
            tracing::info!(
                "Workflow execution {} finished: {:?}",
                execution_id,
                finished.status
            );
            self.bus.publish(
                Topic::Workflow(workflow_id),
                ExecutionEvent::workflow_terminal(execution_id, workflow_id, status, error),
            );
        }
    }

    /// One task at a time, in `order`. A failed task halts dispatch; tasks
    /// after it get no execution record. The loop also stops dispatching
    /// once it observes a cancelled execution.
    async fn run_sequential(
        &self,
        execution: &WorkflowExecution,
        tasks: &[Task],
    ) -> std::result::Result<(), String> {
        for task in tasks {
            match self.store.execution(execution.id).await {
                Some(current) if current.status == ExecutionStatus::Cancelled => {
                    tracing::info!("Execution {} cancelled, halting dispatch", execution.id);
                    return Ok(());
                }
                Some(_) => {}
                None => return Err(format!("execution {} disappeared", execution.id)),
            }

            let settled = self.runner.run_task(Some(execution.id), task, None).await;
            self.publish_task_event(task, &settled);

            if settled.status == TaskRunStatus::Failed {
                tracing::warn!(
                    "Task {} failed, halting sequential dispatch for {}",
                    task.id,
                    execution.id
                );
                break;
            }
        }
        Ok(())
    }

    /// All tasks at once; a join barrier waits for every task to settle.
    /// Individual failures never cancel siblings; only join errors (panics)
    /// fail the orchestration.
    async fn run_concurrent(
        &self,
        execution: &WorkflowExecution,
        tasks: &[Task],
    ) -> std::result::Result<(), String> {
        let mut running = JoinSet::new();
        for task in tasks {
            let runner = self.runner.clone();
            let task = task.clone();
            let execution_id = execution.id;
            running.spawn(async move {
                let settled = runner.run_task(Some(execution_id), &task, None).await;
                (task, settled)
            });
        }

        let mut orchestration_error = None;
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((task, settled)) => self.publish_task_event(&task, &settled),
                Err(e) => {
                    tracing::error!("Task join error in {}: {}", execution.id, e);
                    orchestration_error
                        .get_or_insert_with(|| format!("task dispatch failed: {}", e));
                }
            }
        }

        match orchestration_error {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }

    fn publish_task_event(&self, task: &Task, settled: &TaskExecution) {
        let event = if settled.status == TaskRunStatus::Failed {
            ExecutionEvent::TaskFailed {
                task_id: task.id,
                task_execution_id: settled.id,
                agent_id: task.agent_id,
                error: settled.error.clone().unwrap_or_default(),
                timestamp: Utc::now(),
            }
        } else {
            ExecutionEvent::TaskCompleted {
                task_id: task.id,
                task_execution_id: settled.id,
                agent_id: task.agent_id,
                status: settled.status,
                timestamp: Utc::now(),
            }
        };
        self.bus.publish(Topic::Agent(task.agent_id), event);
    }

    pub(crate) async fn retry(
        &self,
        task: &Task,
        failed: &TaskExecution,
    ) -> TaskExecution {
        self.runner
            .run_task(failed.workflow_execution_id, task, failed.input.clone())
            .await
    }

    pub(crate) fn runner(&self) -> &TaskRunner {
        &self.runner
    }
}

/// Rejects dangling dependency references and cycles before dispatch.
fn validate_dependencies(tasks: &[Task]) -> Result<()> {
    let mut graph = DiGraph::<TaskId, ()>::new();
    let mut index_of = HashMap::new();

    for task in tasks {
        let idx = graph.add_node(task.id);
        index_of.insert(task.id, idx);
    }
    for task in tasks {
        for dep in &task.dependencies {
            let dep_idx = index_of.get(dep).ok_or_else(|| {
                EngineError::Validation(format!(
                    "task {} depends on unknown task {}",
                    task.id, dep
                ))
            })?;
            graph.add_edge(*dep_idx, index_of[&task.id], ());
        }
    }

    if toposort(&graph, None).is_err() {
        return Err(EngineError::Validation(
            "cyclic task dependencies".to_string(),
        ));
    }
    Ok(())
}
