use crate::AgentId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type TaskId = Uuid;

/// A named, ordered or parallel collection of tasks with a declared
/// execution mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub mode: ExecutionMode,
    pub status: WorkflowStatus,
    pub active: bool,
    pub execution_count: u64,
}

impl Workflow {
    pub fn new(name: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            mode,
            status: WorkflowStatus::Draft,
            active: true,
            execution_count: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// How a workflow dispatches its tasks. Only `Sequential` and `Concurrent`
/// have execution semantics; the other variants are declared for
/// round-tripping definitions and are rejected at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Concurrent,
    Conditional,
    Looped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// A unit of work bound to one agent, executed as part of a workflow or
/// standalone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub workflow_id: WorkflowId,
    pub agent_id: AgentId,
    pub name: String,
    pub description: String,
    pub task_type: TaskType,
    pub priority: i32,
    pub order: i32,
    pub dependencies: Vec<TaskId>,
    pub input: Option<serde_json::Value>,
    pub active: bool,
}

impl Task {
    pub fn new(
        workflow_id: WorkflowId,
        agent_id: AgentId,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            agent_id,
            name: name.into(),
            description: description.into(),
            task_type: TaskType::Ai,
            priority: 0,
            order: 0,
            dependencies: Vec::new(),
            input: None,
            active: true,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<TaskId>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// Closed set of task kinds. Only `Ai` invokes the inference gateway; the
/// rest complete trivially with a marker output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[serde(rename = "ai_task")]
    Ai,
    #[serde(rename = "data_task")]
    Data,
    #[serde(rename = "api_task")]
    Api,
    #[serde(rename = "custom_task")]
    Custom,
}
