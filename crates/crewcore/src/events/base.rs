use crate::{AgentId, ExecutionId, ExecutionStatus, TaskExecutionId, TaskId, TaskRunStatus, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Events published during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    WorkflowStarted {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    WorkflowFailed {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: TaskId,
        task_execution_id: TaskExecutionId,
        agent_id: AgentId,
        status: TaskRunStatus,
        timestamp: DateTime<Utc>,
    },
    TaskFailed {
        task_id: TaskId,
        task_execution_id: TaskExecutionId,
        agent_id: AgentId,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn workflow_terminal(
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Self {
        match status {
            ExecutionStatus::Failed => Self::WorkflowFailed {
                execution_id,
                workflow_id,
                error: error.unwrap_or_default(),
                timestamp: Utc::now(),
            },
            _ => Self::WorkflowCompleted {
                execution_id,
                workflow_id,
                timestamp: Utc::now(),
            },
        }
    }
}

/// Subscription key for the notification bus. Observers follow either a
/// workflow's lifecycle or all task activity for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    Workflow(WorkflowId),
    Agent(AgentId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Workflow(id) => write!(f, "workflow:{}", id),
            Topic::Agent(id) => write!(f, "agent:{}", id),
        }
    }
}
