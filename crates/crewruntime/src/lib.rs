//! Workflow execution runtime
//!
//! This crate provides the execution engine that drives workflows: the
//! execution store, agent registry, inference gateway, task runner, and the
//! workflow executor, all owned by a single explicitly constructed
//! [`CrewRuntime`].

mod executor;
mod gateway;
mod registry;
mod reporting;
mod runner;
mod runtime;
mod store;

pub use executor::WorkflowExecutor;
pub use gateway::{
    GatewayConfig, GenerateRequest, Generation, HttpGateway, InferenceGateway, StreamChunk,
};
pub use registry::AgentRegistry;
pub use reporting::{
    execution_logs, execution_metrics, execution_stats, DayCount, ErrorCount, ExecutionLogEntry,
    ExecutionMetrics, ExecutionStats, LogLevel, WorkflowUsage,
};
pub use runner::TaskRunner;
pub use runtime::{CrewRuntime, RuntimeConfig};
pub use store::{ExecutionFilter, ExecutionStore, MemoryStore};
