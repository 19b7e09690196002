use async_trait::async_trait;
use crewcore::{
    Agent, EngineError, ExecutionMode, ExecutionStatus, GatewayError, Task, TaskRunStatus,
    TaskType, Topic, Workflow, WorkflowStatus,
};
use crewruntime::{
    CrewRuntime, ExecutionStore, GenerateRequest, Generation, InferenceGateway, RuntimeConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Duration};
use uuid::Uuid;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// Scripted gateway: fails calls whose prompt contains `fail_marker`, fails
/// the first `fail_first` calls, and optionally blocks each call on a gate
/// the test releases.
struct MockGateway {
    fail_marker: Option<String>,
    fail_first: AtomicUsize,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl MockGateway {
    fn ok() -> Self {
        Self {
            fail_marker: None,
            fail_first: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    fn fail_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::ok()
        }
    }

    fn fail_first(n: usize) -> Self {
        Self {
            fail_first: AtomicUsize::new(n),
            ..Self::ok()
        }
    }

    fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mock = Self {
            gate: Some(gate.clone()),
            ..Self::ok()
        };
        (mock, gate)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceGateway for MockGateway {
    async fn generate(&self, request: GenerateRequest) -> Result<Generation, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.map_err(|_| GatewayError::Transport(
                "gate closed".to_string(),
            ))?;
            // One release lets exactly one call through.
            permit.forget();
        }

        let scripted_failure = self
            .fail_marker
            .as_ref()
            .is_some_and(|marker| request.prompt.contains(marker));
        if scripted_failure
            || self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(GatewayError::Api {
                status: 500,
                message: "scripted failure".to_string(),
            });
        }

        Ok(Generation {
            text: "generated text".to_string(),
            tokens_used: 7,
            model: request.model.unwrap_or_default(),
            finish_reason: Some("stop".to_string()),
        })
    }
}

struct Fixture {
    runtime: CrewRuntime,
    agent: Agent,
    workflow: Workflow,
}

async fn fixture(gateway: Arc<dyn InferenceGateway>, mode: ExecutionMode) -> Fixture {
    init_tracing();
    let runtime = CrewRuntime::new(gateway, RuntimeConfig::default());

    let agent = Agent::new("tester", "Test Agent", "Do the task", "test-model");
    runtime.agents().register(agent.clone()).await;

    let mut workflow = Workflow::new("test-workflow", mode);
    workflow.status = WorkflowStatus::Active;
    runtime.store().put_workflow(workflow.clone()).await;

    Fixture {
        runtime,
        agent,
        workflow,
    }
}

async fn add_task(fx: &Fixture, name: &str, description: &str, order: i32) -> Task {
    let task = Task::new(fx.workflow.id, fx.agent.id, name, description).with_order(order);
    fx.runtime.store().put_task(task.clone()).await;
    task
}

async fn wait_terminal(runtime: &CrewRuntime, execution_id: Uuid) -> ExecutionStatus {
    timeout(Duration::from_secs(5), async {
        loop {
            let status = runtime.execution_status(execution_id).await.unwrap();
            if status.is_terminal() {
                return status;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("execution did not reach a terminal state")
}

#[tokio::test]
async fn sequential_failure_halts_dispatch() {
    let gateway = Arc::new(MockGateway::fail_on("break here"));
    let fx = fixture(gateway.clone(), ExecutionMode::Sequential).await;

    let first = add_task(&fx, "t1", "first task", 0).await;
    let second = add_task(&fx, "t2", "break here", 1).await;
    let third = add_task(&fx, "t3", "never dispatched", 2).await;

    let execution = fx.runtime.execute_workflow(fx.workflow.id, None).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Pending);

    // Task failure does not fail the workflow; the failure stays on the
    // task record.
    let status = wait_terminal(&fx.runtime, execution.id).await;
    assert_eq!(status, ExecutionStatus::Completed);

    let store = fx.runtime.store();
    let first_runs = store.task_executions(first.id).await;
    assert_eq!(first_runs.len(), 1);
    assert_eq!(first_runs[0].status, TaskRunStatus::Completed);
    assert_eq!(first_runs[0].tokens_used, 7);

    let second_runs = store.task_executions(second.id).await;
    assert_eq!(second_runs.len(), 1);
    assert_eq!(second_runs[0].status, TaskRunStatus::Failed);
    assert!(second_runs[0]
        .error
        .as_deref()
        .unwrap()
        .contains("scripted failure"));

    // No record at all for the task after the failure, not even skipped.
    assert!(store.task_executions(third.id).await.is_empty());
    assert_eq!(gateway.calls(), 2);
}

#[tokio::test]
async fn zero_tasks_completes_immediately() {
    let fx = fixture(Arc::new(MockGateway::ok()), ExecutionMode::Sequential).await;
    let mut events = fx.runtime.subscribe(Topic::Workflow(fx.workflow.id));

    let execution = fx.runtime.execute_workflow(fx.workflow.id, None).await.unwrap();
    let status = wait_terminal(&fx.runtime, execution.id).await;

    assert_eq!(status, ExecutionStatus::Completed);
    let record = fx.runtime.execution(execution.id).await.unwrap();
    assert!(record.completed_at.is_some());
    assert!(fx
        .runtime
        .store()
        .task_executions_for(execution.id)
        .await
        .is_empty());

    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(crewcore::ExecutionEvent::WorkflowCompleted { .. }) => break,
                Some(_) => continue,
                None => panic!("bus closed before completion event"),
            }
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn concurrent_mode_runs_every_task_despite_failures() {
    let gateway = Arc::new(MockGateway::fail_on("task two"));
    let fx = fixture(gateway.clone(), ExecutionMode::Concurrent).await;

    let t1 = add_task(&fx, "t1", "task one", 0).await;
    let t2 = add_task(&fx, "t2", "task two", 1).await;
    let t3 = add_task(&fx, "t3", "task three", 2).await;

    let execution = fx.runtime.execute_workflow(fx.workflow.id, None).await.unwrap();
    let status = wait_terminal(&fx.runtime, execution.id).await;
    assert_eq!(status, ExecutionStatus::Completed);

    let store = fx.runtime.store();
    let all = store.task_executions_for(execution.id).await;
    assert_eq!(all.len(), 3);

    let status_of = |task_id| {
        all.iter()
            .find(|te| te.task_id == task_id)
            .map(|te| te.status)
            .unwrap()
    };
    assert_eq!(status_of(t1.id), TaskRunStatus::Completed);
    assert_eq!(status_of(t2.id), TaskRunStatus::Failed);
    assert_eq!(status_of(t3.id), TaskRunStatus::Completed);
    assert_eq!(gateway.calls(), 3);
}

#[tokio::test]
async fn inactive_workflow_is_rejected_synchronously() {
    let fx = fixture(Arc::new(MockGateway::ok()), ExecutionMode::Sequential).await;
    let mut inactive = fx.workflow.clone();
    inactive.active = false;
    fx.runtime.store().put_workflow(inactive).await;

    let err = fx.runtime.execute_workflow(fx.workflow.id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    // No pending record was created for the rejected request.
    assert_eq!(
        fx.runtime
            .store()
            .workflow(fx.workflow.id)
            .await
            .unwrap()
            .execution_count,
        0
    );
}

#[tokio::test]
async fn undefined_modes_fail_validation() {
    for mode in [ExecutionMode::Conditional, ExecutionMode::Looped] {
        let fx = fixture(Arc::new(MockGateway::ok()), mode).await;
        let err = fx.runtime.execute_workflow(fx.workflow.id, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}

#[tokio::test]
async fn missing_workflow_is_not_found() {
    let fx = fixture(Arc::new(MockGateway::ok()), ExecutionMode::Sequential).await;
    let err = fx.runtime.execute_workflow(Uuid::new_v4(), None).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn execution_count_increments_per_request() {
    let fx = fixture(Arc::new(MockGateway::ok()), ExecutionMode::Sequential).await;

    let e1 = fx.runtime.execute_workflow(fx.workflow.id, None).await.unwrap();
    let e2 = fx.runtime.execute_workflow(fx.workflow.id, None).await.unwrap();
    wait_terminal(&fx.runtime, e1.id).await;
    wait_terminal(&fx.runtime, e2.id).await;

    assert_eq!(
        fx.runtime
            .store()
            .workflow(fx.workflow.id)
            .await
            .unwrap()
            .execution_count,
        2
    );
}

#[tokio::test]
async fn dangling_dependency_fails_validation() {
    let fx = fixture(Arc::new(MockGateway::ok()), ExecutionMode::Sequential).await;
    let task = Task::new(fx.workflow.id, fx.agent.id, "t", "d")
        .with_dependencies(vec![Uuid::new_v4()]);
    fx.runtime.store().put_task(task).await;

    let err = fx.runtime.execute_workflow(fx.workflow.id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn non_ai_tasks_complete_trivially() {
    let gateway = Arc::new(MockGateway::ok());
    let fx = fixture(gateway.clone(), ExecutionMode::Sequential).await;
    let task = Task::new(fx.workflow.id, fx.agent.id, "data", "move data")
        .with_type(TaskType::Data);
    fx.runtime.store().put_task(task.clone()).await;

    let settled = fx.runtime.execute_task(task.id, None).await.unwrap();
    assert_eq!(settled.status, TaskRunStatus::Completed);
    assert_eq!(
        settled.output,
        Some(serde_json::json!({"message": "task completed"}))
    );
    assert!(settled.completed_at.is_some());
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test]
async fn missing_agent_is_a_local_task_failure() {
    let fx = fixture(Arc::new(MockGateway::ok()), ExecutionMode::Sequential).await;
    let task = Task::new(fx.workflow.id, Uuid::new_v4(), "orphan", "no agent");
    fx.runtime.store().put_task(task.clone()).await;

    // Does not raise; the failure is absorbed into the record.
    let settled = fx.runtime.execute_task(task.id, None).await.unwrap();
    assert_eq!(settled.status, TaskRunStatus::Failed);
    assert!(settled.error.as_deref().unwrap().contains("not found"));
}

#[tokio::test]
async fn standalone_execution_has_no_parent() {
    let fx = fixture(Arc::new(MockGateway::ok()), ExecutionMode::Sequential).await;
    let task = add_task(&fx, "t", "standalone", 0).await;

    let settled = fx
        .runtime
        .execute_task(task.id, Some(serde_json::json!({"k": "v"})))
        .await
        .unwrap();
    assert_eq!(settled.status, TaskRunStatus::Completed);
    assert!(settled.workflow_execution_id.is_none());
    assert_eq!(settled.input, Some(serde_json::json!({"k": "v"})));
}

#[tokio::test]
async fn retry_without_failed_execution_is_not_found() {
    let fx = fixture(Arc::new(MockGateway::ok()), ExecutionMode::Sequential).await;
    let task = add_task(&fx, "t", "never failed", 0).await;

    let err = fx.runtime.retry_task(task.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn retry_creates_a_fresh_record_and_preserves_the_old() {
    let fx = fixture(Arc::new(MockGateway::fail_first(1)), ExecutionMode::Sequential).await;
    let task = add_task(&fx, "t", "flaky", 0).await;

    let failed = fx
        .runtime
        .execute_task(task.id, Some(serde_json::json!({"seed": 1})))
        .await
        .unwrap();
    assert_eq!(failed.status, TaskRunStatus::Failed);

    let retried = fx.runtime.retry_task(task.id).await.unwrap();
    assert_ne!(retried.id, failed.id);
    assert_eq!(retried.status, TaskRunStatus::Completed);
    assert_eq!(retried.input, failed.input);
    assert_eq!(retried.workflow_execution_id, failed.workflow_execution_id);

    // The failed record is history, never resurrected.
    let original = fx
        .runtime
        .store()
        .task_execution(failed.id)
        .await
        .unwrap();
    assert_eq!(original.status, TaskRunStatus::Failed);
    assert_eq!(fx.runtime.store().task_executions(task.id).await.len(), 2);
}

#[tokio::test]
async fn cancel_is_a_single_winner_cas() {
    let (mock, gate) = MockGateway::gated();
    let gateway = Arc::new(mock);
    let fx = fixture(gateway.clone(), ExecutionMode::Sequential).await;
    add_task(&fx, "t1", "gated task", 0).await;
    let second = add_task(&fx, "t2", "after cancel", 1).await;

    let execution = fx.runtime.execute_workflow(fx.workflow.id, None).await.unwrap();

    // Wait until the first task is inside the gateway call.
    timeout(Duration::from_secs(5), async {
        while gateway.calls() == 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert!(fx.runtime.cancel_execution(execution.id).await);
    assert!(!fx.runtime.cancel_execution(execution.id).await);
    assert_eq!(
        fx.runtime.execution_status(execution.id).await.unwrap(),
        ExecutionStatus::Cancelled
    );

    // Release the in-flight task; it settles and attaches to the cancelled
    // execution, which keeps its terminal status.
    gate.add_permits(1);
    sleep(Duration::from_millis(100)).await;

    assert_eq!(
        fx.runtime.execution_status(execution.id).await.unwrap(),
        ExecutionStatus::Cancelled
    );
    let attached = fx.runtime.store().task_executions_for(execution.id).await;
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].status, TaskRunStatus::Completed);
    // Dispatch stopped after observing the cancellation.
    assert!(fx.runtime.store().task_executions(second.id).await.is_empty());
}

#[tokio::test]
async fn cancel_of_settled_execution_is_a_noop() {
    let fx = fixture(Arc::new(MockGateway::ok()), ExecutionMode::Sequential).await;
    let execution = fx.runtime.execute_workflow(fx.workflow.id, None).await.unwrap();
    wait_terminal(&fx.runtime, execution.id).await;

    assert!(!fx.runtime.cancel_execution(execution.id).await);
    assert_eq!(
        fx.runtime.execution_status(execution.id).await.unwrap(),
        ExecutionStatus::Completed
    );
}

#[tokio::test]
async fn task_events_are_keyed_by_agent() {
    let gateway = Arc::new(MockGateway::fail_on("second"));
    let fx = fixture(gateway, ExecutionMode::Sequential).await;
    add_task(&fx, "t1", "first task", 0).await;
    add_task(&fx, "t2", "second task", 1).await;

    let mut events = fx.runtime.subscribe(Topic::Agent(fx.agent.id));
    let execution = fx.runtime.execute_workflow(fx.workflow.id, None).await.unwrap();
    wait_terminal(&fx.runtime, execution.id).await;

    match events.recv().await.unwrap() {
        crewcore::ExecutionEvent::TaskCompleted { agent_id, .. } => {
            assert_eq!(agent_id, fx.agent.id);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match events.recv().await.unwrap() {
        crewcore::ExecutionEvent::TaskFailed { agent_id, error, .. } => {
            assert_eq!(agent_id, fx.agent.id);
            assert!(error.contains("scripted failure"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn shutdown_drains_inflight_work_and_rejects_new_requests() {
    let fx = fixture(Arc::new(MockGateway::ok()), ExecutionMode::Sequential).await;
    add_task(&fx, "t", "quick", 0).await;

    let execution = fx.runtime.execute_workflow(fx.workflow.id, None).await.unwrap();
    fx.runtime.shutdown().await;

    assert!(fx
        .runtime
        .execution_status(execution.id)
        .await
        .unwrap()
        .is_terminal());
    let err = fx.runtime.execute_workflow(fx.workflow.id, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}
