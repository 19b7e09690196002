//! Core abstractions for the crew engine
//!
//! This crate provides the domain types, error taxonomy, and execution
//! events that all other components depend on. It carries no engine logic.

mod agent;
mod error;
pub mod events;
mod execution;
mod workflow;

pub use agent::{Agent, AgentId, GenerationParams};
pub use error::{EngineError, GatewayError};
pub use execution::{
    ExecutionId, ExecutionStatus, TaskExecution, TaskExecutionId, TaskRunStatus,
    WorkflowExecution,
};
pub use workflow::{ExecutionMode, Task, TaskId, TaskType, Workflow, WorkflowId, WorkflowStatus};
pub use events::{ExecutionEvent, NotificationBus, Subscription, Topic};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
