use crate::executor::WorkflowExecutor;
use crate::gateway::InferenceGateway;
use crate::registry::AgentRegistry;
use crate::reporting::{self, ExecutionLogEntry, ExecutionMetrics, ExecutionStats};
use crate::runner::TaskRunner;
use crate::store::{ExecutionFilter, ExecutionStore, MemoryStore};
use crewcore::{
    EngineError, ExecutionId, ExecutionStatus, NotificationBus, Result, Subscription,
    TaskExecution, TaskId, Topic, WorkflowExecution, WorkflowId, WorkflowStatus,
};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Configuration for the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on workflow executions driven at once; further requests
    /// queue behind the pool without blocking the caller.
    pub max_concurrent_executions: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 10,
        }
    }
}

/// Owns the store, bus, gateway, and worker pool, and exposes the engine's
/// operations. Constructed explicitly at process start and passed by
/// reference into callers; `shutdown` drains in-flight executions.
pub struct CrewRuntime {
    store: Arc<dyn ExecutionStore>,
    bus: Arc<NotificationBus>,
    executor: WorkflowExecutor,
    pool: Mutex<JoinSet<()>>,
    limiter: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl CrewRuntime {
    /// Runtime over a fresh in-memory store.
    pub fn new(gateway: Arc<dyn InferenceGateway>, config: RuntimeConfig) -> Self {
        Self::with_store(MemoryStore::shared(), gateway, config)
    }

    pub fn with_store(
        store: Arc<dyn ExecutionStore>,
        gateway: Arc<dyn InferenceGateway>,
        config: RuntimeConfig,
    ) -> Self {
        let bus = Arc::new(NotificationBus::new());
        let runner = TaskRunner::new(store.clone(), gateway);
        let executor = WorkflowExecutor::new(store.clone(), bus.clone(), runner);

        Self {
            store,
            bus,
            executor,
            pool: Mutex::new(JoinSet::new()),
            limiter: Arc::new(Semaphore::new(config.max_concurrent_executions.max(1))),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn agents(&self) -> AgentRegistry {
        AgentRegistry::new(self.store.clone())
    }

    /// Subscribe to live execution events for one topic. No replay: events
    /// published before the subscription are never delivered.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.bus.subscribe(topic)
    }

    /// Validates the workflow, persists a pending execution, and submits
    /// the detached unit of work to the worker pool. Returns the pending
    /// record immediately.
    pub async fn execute_workflow(
        &self,
        workflow_id: WorkflowId,
        input: Option<serde_json::Value>,
    ) -> Result<WorkflowExecution> {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::Validation(
                "runtime is shutting down".to_string(),
            ));
        }

        let (execution, mode) = self.executor.begin(workflow_id, input).await?;

        let executor = self.executor.clone();
        let limiter = self.limiter.clone();
        let record = execution.clone();

        let mut pool = self.pool.lock().await;
        // Reap finished work so the pool does not grow unbounded.
        while pool.try_join_next().is_some() {}
        pool.spawn(async move {
            let Ok(_permit) = limiter.acquire_owned().await else {
                return;
            };
            executor.drive(record, mode).await;
        });

        Ok(execution)
    }

    /// Standalone task execution with no parent workflow execution and no
    /// bus emission.
    pub async fn execute_task(
        &self,
        task_id: TaskId,
        input: Option<serde_json::Value>,
    ) -> Result<TaskExecution> {
        let task = self
            .store
            .task(task_id)
            .await
            .ok_or_else(|| EngineError::not_found("task", task_id))?;
        if !task.active {
            return Err(EngineError::Validation("task is not active".to_string()));
        }

        Ok(self.executor.runner().run_task(None, &task, input).await)
    }

    /// Creates and runs a fresh execution carrying the most recent failed
    /// execution's input and parent linkage. The failed record is never
    /// mutated.
    pub async fn retry_task(&self, task_id: TaskId) -> Result<TaskExecution> {
        let task = self
            .store
            .task(task_id)
            .await
            .ok_or_else(|| EngineError::not_found("task", task_id))?;
        let failed = self
            .store
            .latest_failed_task_execution(task_id)
            .await
            .ok_or_else(|| EngineError::not_found("failed task execution", task_id))?;

        tracing::info!("Retrying task {} after execution {}", task_id, failed.id);
        Ok(self.executor.retry(&task, &failed).await)
    }

    /// Status-only cooperative cancellation: false on missing or already
    /// terminal executions. In-flight tasks are not forcibly stopped.
    pub async fn cancel_execution(&self, execution_id: ExecutionId) -> bool {
        let cancelled = self.store.try_cancel(execution_id).await;
        if cancelled {
            tracing::info!("Cancelled execution: {}", execution_id);
        }
        cancelled
    }

    pub async fn execution_status(&self, execution_id: ExecutionId) -> Result<ExecutionStatus> {
        self.store
            .execution(execution_id)
            .await
            .map(|e| e.status)
            .ok_or_else(|| EngineError::not_found("execution", execution_id))
    }

    pub async fn execution(&self, execution_id: ExecutionId) -> Result<WorkflowExecution> {
        self.store
            .execution(execution_id)
            .await
            .ok_or_else(|| EngineError::not_found("execution", execution_id))
    }

    pub async fn list_executions(&self, filter: ExecutionFilter) -> Vec<WorkflowExecution> {
        self.store.list_executions(filter).await
    }

    pub async fn pause_workflow(&self, workflow_id: WorkflowId) -> bool {
        self.store
            .set_workflow_status(workflow_id, WorkflowStatus::Paused)
            .await
    }

    pub async fn resume_workflow(&self, workflow_id: WorkflowId) -> bool {
        self.store
            .set_workflow_status(workflow_id, WorkflowStatus::Active)
            .await
    }

    /// Execution log synthesized from execution and task timestamps.
    pub async fn execution_logs(&self, execution_id: ExecutionId) -> Result<Vec<ExecutionLogEntry>> {
        reporting::execution_logs(self.store.as_ref(), execution_id).await
    }

    pub async fn execution_metrics(&self, execution_id: ExecutionId) -> Result<ExecutionMetrics> {
        reporting::execution_metrics(self.store.as_ref(), execution_id).await
    }

    pub async fn execution_stats(
        &self,
        workflow_id: Option<WorkflowId>,
        days: i64,
    ) -> ExecutionStats {
        reporting::execution_stats(self.store.as_ref(), workflow_id, days).await
    }

    /// Stops accepting new executions and waits for in-flight ones to
    /// settle.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut pool = self.pool.lock().await;
        while let Some(result) = pool.join_next().await {
            if let Err(e) = result {
                tracing::error!("Execution worker panicked during shutdown: {}", e);
            }
        }
        tracing::info!("Runtime shut down");
    }
}
