use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crewcore::{
    Agent, AgentId, ExecutionId, ExecutionStatus, Task, TaskExecution, TaskExecutionId, TaskId,
    TaskRunStatus, Workflow, WorkflowExecution, WorkflowId, WorkflowStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Filter for listing workflow executions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub workflow_id: Option<WorkflowId>,
    pub status: Option<ExecutionStatus>,
    pub since: Option<DateTime<Utc>>,
}

/// Single source of truth for definitions and execution history. Every
/// status mutation is one atomic record update; terminal statuses are never
/// overwritten by any method on this trait.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn put_agent(&self, agent: Agent);
    async fn agent(&self, id: AgentId) -> Option<Agent>;
    async fn list_agents(&self) -> Vec<Agent>;

    async fn put_workflow(&self, workflow: Workflow);
    async fn workflow(&self, id: WorkflowId) -> Option<Workflow>;
    async fn list_workflows(&self) -> Vec<Workflow>;
    async fn set_workflow_status(&self, id: WorkflowId, status: WorkflowStatus) -> bool;
    /// Removes the workflow, its tasks, and all execution history under it.
    async fn delete_workflow(&self, id: WorkflowId) -> bool;

    async fn put_task(&self, task: Task);
    async fn task(&self, id: TaskId) -> Option<Task>;
    /// Removes the task and its execution history.
    async fn delete_task(&self, id: TaskId) -> bool;
    /// Active tasks of a workflow, ordered by `order` ascending.
    async fn active_tasks(&self, workflow_id: WorkflowId) -> Vec<Task>;

    /// Inserts a pending execution and increments the workflow's
    /// `execution_count` under the same write lock. `None` if the workflow
    /// does not exist.
    async fn create_execution(
        &self,
        workflow_id: WorkflowId,
        input: Option<serde_json::Value>,
    ) -> Option<WorkflowExecution>;
    async fn execution(&self, id: ExecutionId) -> Option<WorkflowExecution>;
    async fn list_executions(&self, filter: ExecutionFilter) -> Vec<WorkflowExecution>;
    /// Pending -> Running. False if the record is missing or already past
    /// pending (e.g. cancelled before dispatch).
    async fn mark_execution_running(&self, id: ExecutionId) -> bool;
    /// Applies a terminal status and completion timestamp. Refuses to
    /// overwrite an existing terminal status and returns `None` in that
    /// case, so a cancelled execution stays cancelled.
    async fn finish_execution(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Option<WorkflowExecution>;
    /// Compare-and-set cancellation: false if missing or already terminal.
    async fn try_cancel(&self, id: ExecutionId) -> bool;

    async fn create_task_execution(&self, execution: TaskExecution);
    async fn task_execution(&self, id: TaskExecutionId) -> Option<TaskExecution>;
    /// History for one task, ordered by `started_at` ascending.
    async fn task_executions(&self, task_id: TaskId) -> Vec<TaskExecution>;
    /// Task executions belonging to one workflow execution.
    async fn task_executions_for(&self, execution_id: ExecutionId) -> Vec<TaskExecution>;
    /// Most recent failed execution of a task, if any.
    async fn latest_failed_task_execution(&self, task_id: TaskId) -> Option<TaskExecution>;
    /// Applies a terminal status, payloads, and completion timestamp to a
    /// running task execution. Refuses to overwrite a terminal status.
    async fn settle_task_execution(
        &self,
        id: TaskExecutionId,
        status: TaskRunStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
        tokens_used: u64,
    ) -> Option<TaskExecution>;
}

#[derive(Default)]
struct Inner {
    agents: HashMap<AgentId, Agent>,
    workflows: HashMap<WorkflowId, Workflow>,
    tasks: HashMap<TaskId, Task>,
    executions: HashMap<ExecutionId, WorkflowExecution>,
    task_executions: HashMap<TaskExecutionId, TaskExecution>,
}

/// In-memory store. A single `RwLock` over all tables keeps cross-table
/// updates (execution creation, cascade deletes) atomic.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn put_agent(&self, agent: Agent) {
        self.inner.write().await.agents.insert(agent.id, agent);
    }

    async fn agent(&self, id: AgentId) -> Option<Agent> {
        self.inner.read().await.agents.get(&id).cloned()
    }

    async fn list_agents(&self) -> Vec<Agent> {
        self.inner.read().await.agents.values().cloned().collect()
    }

    async fn put_workflow(&self, workflow: Workflow) {
        self.inner
            .write()
            .await
            .workflows
            .insert(workflow.id, workflow);
    }

    async fn workflow(&self, id: WorkflowId) -> Option<Workflow> {
        self.inner.read().await.workflows.get(&id).cloned()
    }

    async fn list_workflows(&self) -> Vec<Workflow> {
        self.inner.read().await.workflows.values().cloned().collect()
    }

    async fn set_workflow_status(&self, id: WorkflowId, status: WorkflowStatus) -> bool {
        let mut inner = self.inner.write().await;
        match inner.workflows.get_mut(&id) {
            Some(workflow) => {
                workflow.status = status;
                true
            }
            None => false,
        }
    }

    async fn delete_workflow(&self, id: WorkflowId) -> bool {
        let mut inner = self.inner.write().await;
        if inner.workflows.remove(&id).is_none() {
            return false;
        }
        let task_ids: Vec<TaskId> = inner
            .tasks
            .values()
            .filter(|t| t.workflow_id == id)
            .map(|t| t.id)
            .collect();
        for task_id in &task_ids {
            inner.tasks.remove(task_id);
        }
        inner
            .task_executions
            .retain(|_, te| !task_ids.contains(&te.task_id));
        inner.executions.retain(|_, e| e.workflow_id != id);
        true
    }

    async fn put_task(&self, task: Task) {
        self.inner.write().await.tasks.insert(task.id, task);
    }

    async fn task(&self, id: TaskId) -> Option<Task> {
        self.inner.read().await.tasks.get(&id).cloned()
    }

    async fn delete_task(&self, id: TaskId) -> bool {
        let mut inner = self.inner.write().await;
        if inner.tasks.remove(&id).is_none() {
            return false;
        }
        inner.task_executions.retain(|_, te| te.task_id != id);
        true
    }

    async fn active_tasks(&self, workflow_id: WorkflowId) -> Vec<Task> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.workflow_id == workflow_id && t.active)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.order);
        tasks
    }

    async fn create_execution(
        &self,
        workflow_id: WorkflowId,
        input: Option<serde_json::Value>,
    ) -> Option<WorkflowExecution> {
        let mut inner = self.inner.write().await;
        let workflow = inner.workflows.get_mut(&workflow_id)?;
        workflow.execution_count += 1;
        let execution = WorkflowExecution::pending(workflow_id, input);
        inner.executions.insert(execution.id, execution.clone());
        Some(execution)
    }

    async fn execution(&self, id: ExecutionId) -> Option<WorkflowExecution> {
        self.inner.read().await.executions.get(&id).cloned()
    }

    async fn list_executions(&self, filter: ExecutionFilter) -> Vec<WorkflowExecution> {
        let inner = self.inner.read().await;
        let mut executions: Vec<WorkflowExecution> = inner
            .executions
            .values()
            .filter(|e| filter.workflow_id.map_or(true, |id| e.workflow_id == id))
            .filter(|e| filter.status.map_or(true, |s| e.status == s))
            .filter(|e| filter.since.map_or(true, |t| e.started_at >= t))
            .cloned()
            .collect();
        executions.sort_by_key(|e| std::cmp::Reverse(e.started_at));
        executions
    }

    async fn mark_execution_running(&self, id: ExecutionId) -> bool {
        let mut inner = self.inner.write().await;
        match inner.executions.get_mut(&id) {
            Some(execution) if execution.status == ExecutionStatus::Pending => {
                execution.status = ExecutionStatus::Running;
                true
            }
            _ => false,
        }
    }

    async fn finish_execution(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Option<WorkflowExecution> {
        let mut inner = self.inner.write().await;
        let execution = inner.executions.get_mut(&id)?;
        if execution.status.is_terminal() {
            return None;
        }
        execution.status = status;
        execution.completed_at = Some(Utc::now());
        if output.is_some() {
            execution.output = output;
        }
        if error.is_some() {
            execution.error = error;
        }
        Some(execution.clone())
    }

    async fn try_cancel(&self, id: ExecutionId) -> bool {
        let mut inner = self.inner.write().await;
        match inner.executions.get_mut(&id) {
            Some(execution) if !execution.status.is_terminal() => {
                execution.status = ExecutionStatus::Cancelled;
                execution.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    async fn create_task_execution(&self, execution: TaskExecution) {
        self.inner
            .write()
            .await
            .task_executions
            .insert(execution.id, execution);
    }

    async fn task_execution(&self, id: TaskExecutionId) -> Option<TaskExecution> {
        self.inner.read().await.task_executions.get(&id).cloned()
    }

    async fn task_executions(&self, task_id: TaskId) -> Vec<TaskExecution> {
        let inner = self.inner.read().await;
        let mut executions: Vec<TaskExecution> = inner
            .task_executions
            .values()
            .filter(|te| te.task_id == task_id)
            .cloned()
            .collect();
        executions.sort_by_key(|te| te.started_at);
        executions
    }

    async fn task_executions_for(&self, execution_id: ExecutionId) -> Vec<TaskExecution> {
        let inner = self.inner.read().await;
        let mut executions: Vec<TaskExecution> = inner
            .task_executions
            .values()
            .filter(|te| te.workflow_execution_id == Some(execution_id))
            .cloned()
            .collect();
        executions.sort_by_key(|te| te.started_at);
        executions
    }

    async fn latest_failed_task_execution(&self, task_id: TaskId) -> Option<TaskExecution> {
        let inner = self.inner.read().await;
        inner
            .task_executions
            .values()
            .filter(|te| te.task_id == task_id && te.status == TaskRunStatus::Failed)
            .max_by_key(|te| te.started_at)
            .cloned()
    }

    async fn settle_task_execution(
        &self,
        id: TaskExecutionId,
        status: TaskRunStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
        tokens_used: u64,
    ) -> Option<TaskExecution> {
        let mut inner = self.inner.write().await;
        let execution = inner.task_executions.get_mut(&id)?;
        if execution.status.is_terminal() {
            return None;
        }
        execution.status = status;
        execution.completed_at = Some(Utc::now());
        execution.output = output;
        execution.error = error;
        execution.tokens_used = tokens_used;
        Some(execution.clone())
    }
}
