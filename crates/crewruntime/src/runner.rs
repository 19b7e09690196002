use crate::gateway::{GenerateRequest, InferenceGateway};
use crate::store::ExecutionStore;
use crewcore::{Agent, ExecutionId, Task, TaskExecution, TaskRunStatus, TaskType};
use std::sync::Arc;

/// Executes one task to a terminal `TaskExecution`. Task-local failures
/// (missing agent, gateway errors) are absorbed into the record and never
/// raised out of `run_task`.
#[derive(Clone)]
pub struct TaskRunner {
    store: Arc<dyn ExecutionStore>,
    gateway: Arc<dyn InferenceGateway>,
}

impl TaskRunner {
    pub fn new(store: Arc<dyn ExecutionStore>, gateway: Arc<dyn InferenceGateway>) -> Self {
        Self { store, gateway }
    }

    /// Runs a task, linked to a parent workflow execution when present.
    /// Input defaults to the task's stored input if none is supplied.
    pub async fn run_task(
        &self,
        parent: Option<ExecutionId>,
        task: &Task,
        input: Option<serde_json::Value>,
    ) -> TaskExecution {
        let input = input.or_else(|| task.input.clone());
        let execution = TaskExecution::running(task.id, parent, input.clone());
        let execution_id = execution.id;
        self.store.create_task_execution(execution.clone()).await;

        let settled = match task.task_type {
            TaskType::Ai => self.run_ai_task(execution_id, task, input.as_ref()).await,
            // No real work defined for the other task kinds.
            TaskType::Data | TaskType::Api | TaskType::Custom => {
                self.store
                    .settle_task_execution(
                        execution_id,
                        TaskRunStatus::Completed,
                        Some(serde_json::json!({"message": "task completed"})),
                        None,
                        0,
                    )
                    .await
            }
        };

        match settled {
            Some(settled) => settled,
            // The record reached a terminal state through another path;
            // report what the store holds.
            None => self
                .store
                .task_execution(execution_id)
                .await
                .unwrap_or(execution),
        }
    }

    async fn run_ai_task(
        &self,
        execution_id: crewcore::TaskExecutionId,
        task: &Task,
        input: Option<&serde_json::Value>,
    ) -> Option<TaskExecution> {
        let agent = match self.store.agent(task.agent_id).await {
            Some(agent) => agent,
            None => {
                tracing::error!("Agent {} not found for task {}", task.agent_id, task.id);
                return self
                    .fail(execution_id, format!("agent {} not found", task.agent_id))
                    .await;
            }
        };
        if !agent.active {
            return self
                .fail(execution_id, format!("agent {} is not active", agent.id))
                .await;
        }

        let prompt = build_prompt(&agent, task, input);
        let request = GenerateRequest {
            prompt,
            model: Some(agent.model.clone()),
            max_tokens: Some(agent.params.max_tokens),
            temperature: Some(agent.params.temperature),
            top_p: Some(agent.params.top_p),
        };

        match self.gateway.generate(request).await {
            Ok(generation) => {
                tracing::info!(
                    "Task {} completed ({} tokens)",
                    task.id,
                    generation.tokens_used
                );
                self.store
                    .settle_task_execution(
                        execution_id,
                        TaskRunStatus::Completed,
                        Some(serde_json::json!({
                            "response": generation.text,
                            "tokens_used": generation.tokens_used,
                        })),
                        None,
                        generation.tokens_used,
                    )
                    .await
            }
            Err(e) => {
                tracing::error!("Task {} failed: {}", task.id, e);
                self.fail(execution_id, e.to_string()).await
            }
        }
    }

    async fn fail(
        &self,
        execution_id: crewcore::TaskExecutionId,
        error: String,
    ) -> Option<TaskExecution> {
        self.store
            .settle_task_execution(execution_id, TaskRunStatus::Failed, None, Some(error), 0)
            .await
    }
}

/// Plain textual concatenation of the agent persona, the task description,
/// and the execution input.
fn build_prompt(agent: &Agent, task: &Task, input: Option<&serde_json::Value>) -> String {
    let input = input
        .map(|v| v.to_string())
        .unwrap_or_else(|| "null".to_string());
    format!(
        "Agent Role: {}\nAgent Goal: {}\nAgent Backstory: {}\n\nTask: {}\nInput Data: {}\n",
        agent.role, agent.goal, agent.backstory, task.description, input
    )
}
