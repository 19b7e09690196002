use crate::{TaskId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ExecutionId = Uuid;
pub type TaskExecutionId = Uuid;

/// Append-only record of one invocation of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl WorkflowExecution {
    pub fn pending(workflow_id: WorkflowId, input: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            input,
            output: None,
            error: None,
        }
    }

    /// Duration from start to completion, if the record is terminal.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Append-only record of one invocation of a task. `workflow_execution_id`
/// is `None` for standalone runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: TaskExecutionId,
    pub task_id: TaskId,
    pub workflow_execution_id: Option<ExecutionId>,
    pub status: TaskRunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub tokens_used: u64,
}

impl TaskExecution {
    pub fn running(
        task_id: TaskId,
        workflow_execution_id: Option<ExecutionId>,
        input: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            workflow_execution_id,
            status: TaskRunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            input,
            output: None,
            error: None,
            tokens_used: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskRunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}
