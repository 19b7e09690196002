use crate::store::{ExecutionFilter, ExecutionStore};
use chrono::{DateTime, Duration, Utc};
use crewcore::{
    EngineError, ExecutionId, ExecutionStatus, Result, TaskRunStatus, WorkflowId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Error,
}

/// One entry of a query-time execution log, synthesized from execution and
/// task-execution timestamps and statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub execution_id: ExecutionId,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub total_tokens: u64,
    pub total_time_ms: i64,
    pub average_task_time_ms: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: usize,
    pub successful_executions: usize,
    pub failed_executions: usize,
    pub running_executions: usize,
    pub success_rate: f64,
    pub average_execution_time_ms: f64,
    pub total_tokens_used: u64,
    pub executions_by_day: Vec<DayCount>,
    pub top_workflows: Vec<WorkflowUsage>,
    pub error_breakdown: Vec<ErrorCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayCount {
    pub date: String,
    pub count: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowUsage {
    pub workflow_id: WorkflowId,
    pub count: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCount {
    pub error: String,
    pub count: usize,
}

/// Ordered log for one execution, derived at query time.
pub async fn execution_logs(
    store: &dyn ExecutionStore,
    execution_id: ExecutionId,
) -> Result<Vec<ExecutionLogEntry>> {
    let execution = store
        .execution(execution_id)
        .await
        .ok_or_else(|| EngineError::not_found("execution", execution_id))?;
    let task_executions = store.task_executions_for(execution_id).await;

    let mut logs = vec![ExecutionLogEntry {
        timestamp: execution.started_at,
        level: LogLevel::Info,
        message: "Workflow execution started".to_string(),
        details: serde_json::json!({
            "execution_id": execution.id,
            "workflow_id": execution.workflow_id,
        }),
    }];

    for te in &task_executions {
        logs.push(ExecutionLogEntry {
            timestamp: te.started_at,
            level: LogLevel::Info,
            message: format!("Task {} started", te.task_id),
            details: serde_json::json!({
                "task_execution_id": te.id,
                "task_id": te.task_id,
            }),
        });

        if let Some(completed_at) = te.completed_at {
            let level = if te.status == TaskRunStatus::Failed {
                LogLevel::Error
            } else {
                LogLevel::Info
            };
            let mut details = serde_json::json!({
                "task_execution_id": te.id,
                "task_id": te.task_id,
                "status": te.status,
                "tokens_used": te.tokens_used,
            });
            if let Some(error) = &te.error {
                details["error"] = serde_json::json!(error);
            }
            logs.push(ExecutionLogEntry {
                timestamp: completed_at,
                level,
                message: format!("Task {} {:?}", te.task_id, te.status).to_lowercase(),
                details,
            });
        }
    }

    if let Some(completed_at) = execution.completed_at {
        let level = if execution.status == ExecutionStatus::Failed {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        let mut details = serde_json::json!({
            "execution_id": execution.id,
            "workflow_id": execution.workflow_id,
            "status": execution.status,
        });
        if let Some(error) = &execution.error {
            details["error"] = serde_json::json!(error);
        }
        logs.push(ExecutionLogEntry {
            timestamp: completed_at,
            level,
            message: format!("Workflow execution {:?}", execution.status).to_lowercase(),
            details,
        });
    }

    logs.sort_by_key(|entry| entry.timestamp);
    Ok(logs)
}

/// Per-execution task and token totals.
pub async fn execution_metrics(
    store: &dyn ExecutionStore,
    execution_id: ExecutionId,
) -> Result<ExecutionMetrics> {
    let execution = store
        .execution(execution_id)
        .await
        .ok_or_else(|| EngineError::not_found("execution", execution_id))?;
    let task_executions = store.task_executions_for(execution_id).await;

    let total_tasks = task_executions.len();
    let completed_tasks = task_executions
        .iter()
        .filter(|te| te.status == TaskRunStatus::Completed)
        .count();
    let failed_tasks = task_executions
        .iter()
        .filter(|te| te.status == TaskRunStatus::Failed)
        .count();
    let total_tokens: u64 = task_executions.iter().map(|te| te.tokens_used).sum();
    let total_time_ms = execution.duration_ms().unwrap_or(0);

    Ok(ExecutionMetrics {
        execution_id,
        total_tasks,
        completed_tasks,
        failed_tasks,
        total_tokens,
        total_time_ms,
        average_task_time_ms: if total_tasks > 0 {
            total_time_ms as f64 / total_tasks as f64
        } else {
            0.0
        },
        success_rate: if total_tasks > 0 {
            completed_tasks as f64 / total_tasks as f64 * 100.0
        } else {
            0.0
        },
    })
}

/// Aggregate statistics over the last `days` days, optionally narrowed to
/// one workflow.
pub async fn execution_stats(
    store: &dyn ExecutionStore,
    workflow_id: Option<WorkflowId>,
    days: i64,
) -> ExecutionStats {
    let since = Utc::now() - Duration::days(days);
    let executions = store
        .list_executions(ExecutionFilter {
            workflow_id,
            status: None,
            since: Some(since),
        })
        .await;

    let total = executions.len();
    let successful = executions
        .iter()
        .filter(|e| e.status == ExecutionStatus::Completed)
        .count();
    let failed = executions
        .iter()
        .filter(|e| e.status == ExecutionStatus::Failed)
        .count();
    let running = executions
        .iter()
        .filter(|e| e.status == ExecutionStatus::Running)
        .count();

    let durations: Vec<i64> = executions
        .iter()
        .filter(|e| e.status == ExecutionStatus::Completed)
        .filter_map(|e| e.duration_ms())
        .collect();
    let average_execution_time_ms = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<i64>() as f64 / durations.len() as f64
    };

    let mut total_tokens_used = 0;
    for execution in &executions {
        total_tokens_used += store
            .task_executions_for(execution.id)
            .await
            .iter()
            .map(|te| te.tokens_used)
            .sum::<u64>();
    }

    let mut by_day: HashMap<String, DayCount> = HashMap::new();
    let mut by_workflow: HashMap<WorkflowId, WorkflowUsage> = HashMap::new();
    let mut by_error: HashMap<String, usize> = HashMap::new();

    for execution in &executions {
        let day = execution.started_at.date_naive().to_string();
        let entry = by_day.entry(day.clone()).or_insert_with(|| DayCount {
            date: day,
            count: 0,
            successful: 0,
            failed: 0,
        });
        entry.count += 1;

        let usage = by_workflow
            .entry(execution.workflow_id)
            .or_insert_with(|| WorkflowUsage {
                workflow_id: execution.workflow_id,
                count: 0,
                successful: 0,
                failed: 0,
            });
        usage.count += 1;

        match execution.status {
            ExecutionStatus::Completed => {
                entry.successful += 1;
                usage.successful += 1;
            }
            ExecutionStatus::Failed => {
                entry.failed += 1;
                usage.failed += 1;
                if let Some(error) = &execution.error {
                    *by_error.entry(error.clone()).or_default() += 1;
                }
            }
            _ => {}
        }
    }

    let mut executions_by_day: Vec<DayCount> = by_day.into_values().collect();
    executions_by_day.sort_by(|a, b| a.date.cmp(&b.date));

    let mut top_workflows: Vec<WorkflowUsage> = by_workflow.into_values().collect();
    top_workflows.sort_by_key(|usage| std::cmp::Reverse(usage.count));
    top_workflows.truncate(10);

    let mut error_breakdown: Vec<ErrorCount> = by_error
        .into_iter()
        .map(|(error, count)| ErrorCount { error, count })
        .collect();
    error_breakdown.sort_by_key(|e| std::cmp::Reverse(e.count));
    error_breakdown.truncate(10);

    ExecutionStats {
        total_executions: total,
        successful_executions: successful,
        failed_executions: failed,
        running_executions: running,
        success_rate: if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        },
        average_execution_time_ms,
        total_tokens_used,
        executions_by_day,
        top_workflows,
        error_breakdown,
    }
}
