use anyhow::Result;
use clap::{Parser, Subcommand};
use crewcore::{Agent, ExecutionEvent, ExecutionMode, Task, Topic, Workflow, WorkflowStatus};
use crewruntime::{CrewRuntime, ExecutionStore, GatewayConfig, HttpGateway, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "crew")]
#[command(about = "Crew Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a crew file against the configured gateway
    Run {
        /// Path to crew JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a crew file
    Validate {
        /// Path to crew JSON file
        file: PathBuf,
    },

    /// Create a new example crew file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "crew.json")]
        output: PathBuf,
    },
}

/// On-disk crew definition: agents, one workflow, and its tasks.
#[derive(Serialize, Deserialize)]
struct CrewFile {
    agents: Vec<Agent>,
    workflow: Workflow,
    tasks: Vec<Task>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            verbose,
        } => {
            let level = if verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::INFO
            };
            tracing_subscriber::fmt().with_max_level(level).init();

            run_crew(file, input).await?;
        }

        Commands::Validate { file } => {
            validate_crew(file)?;
        }

        Commands::Init { output } => {
            create_example_crew(output)?;
        }
    }

    Ok(())
}

async fn run_crew(file: PathBuf, input: Option<String>) -> Result<()> {
    println!("Loading crew from: {}", file.display());

    let crew: CrewFile = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
    println!("Workflow: {} ({:?} mode)", crew.workflow.name, crew.workflow.mode);
    println!("   Agents: {}", crew.agents.len());
    println!("   Tasks: {}", crew.tasks.len());
    println!();

    let input: Option<serde_json::Value> = match input {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };

    let gateway = Arc::new(HttpGateway::new(GatewayConfig::from_env()));
    let runtime = CrewRuntime::new(gateway, RuntimeConfig::default());

    let registry = runtime.agents();
    for agent in crew.agents {
        registry.register(agent).await;
    }
    let workflow_id = crew.workflow.id;
    runtime.store().put_workflow(crew.workflow).await;
    for task in crew.tasks {
        runtime.store().put_task(task).await;
    }

    // Stream events for this workflow while it runs.
    let mut events = runtime.subscribe(Topic::Workflow(workflow_id));
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ExecutionEvent::WorkflowStarted { execution_id, .. } => {
                    println!("Workflow started: {}", execution_id);
                }
                ExecutionEvent::WorkflowCompleted { execution_id, .. } => {
                    println!("Workflow completed: {}", execution_id);
                }
                ExecutionEvent::WorkflowFailed {
                    execution_id,
                    error,
                    ..
                } => {
                    println!("Workflow failed: {} ({})", execution_id, error);
                }
                other => {
                    println!("Event: {:?}", other);
                }
            }
        }
    });

    let execution = runtime.execute_workflow(workflow_id, input).await?;
    println!("Execution created: {}", execution.id);

    // Poll until the detached unit of work settles.
    loop {
        let status = runtime.execution_status(execution.id).await?;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
    }

    let final_record = runtime.execution(execution.id).await?;
    println!();
    println!("Execution summary:");
    println!("   Status: {:?}", final_record.status);
    if let Some(duration) = final_record.duration_ms() {
        println!("   Duration: {}ms", duration);
    }
    if let Some(error) = &final_record.error {
        println!("   Error: {}", error);
    }

    let metrics = runtime.execution_metrics(execution.id).await?;
    println!(
        "   Tasks: {} total, {} completed, {} failed",
        metrics.total_tasks, metrics.completed_tasks, metrics.failed_tasks
    );
    println!("   Tokens used: {}", metrics.total_tokens);

    println!();
    println!("Execution log:");
    for entry in runtime.execution_logs(execution.id).await? {
        println!(
            "   [{:?}] {} {}",
            entry.level,
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.message
        );
    }

    printer.abort();
    runtime.shutdown().await;
    Ok(())
}

fn validate_crew(file: PathBuf) -> Result<()> {
    println!("Validating crew: {}", file.display());

    let crew: CrewFile = serde_json::from_str(&std::fs::read_to_string(&file)?)?;

    for task in &crew.tasks {
        if task.workflow_id != crew.workflow.id {
            anyhow::bail!("task {} does not belong to workflow {}", task.id, crew.workflow.id);
        }
        if !crew.agents.iter().any(|a| a.id == task.agent_id) {
            anyhow::bail!("task {} references unknown agent {}", task.id, task.agent_id);
        }
    }

    println!("Crew is valid:");
    println!("   Workflow: {}", crew.workflow.name);
    println!("   Mode: {:?}", crew.workflow.mode);
    println!("   Agents: {}", crew.agents.len());
    println!("   Tasks: {}", crew.tasks.len());

    Ok(())
}

fn create_example_crew(output: PathBuf) -> Result<()> {
    let researcher = Agent::new(
        "researcher",
        "Research Analyst",
        "Gather accurate background information on the given subject",
        "llama-4-maverick-17b-128e-instruct",
    )
    .with_backstory("A meticulous analyst who cites sources and avoids speculation.");

    let writer = Agent::new(
        "writer",
        "Technical Writer",
        "Turn research notes into a clear, concise summary",
        "llama-4-maverick-17b-128e-instruct",
    )
    .with_backstory("An editor who values short sentences and plain language.");

    let mut workflow = Workflow::new("research-and-summarize", ExecutionMode::Sequential)
        .with_description("Research a subject, then summarize the findings");
    workflow.status = WorkflowStatus::Active;

    let research = Task::new(
        workflow.id,
        researcher.id,
        "research",
        "Collect the key facts about the subject in the input data",
    )
    .with_order(0);

    let summarize = Task::new(
        workflow.id,
        writer.id,
        "summarize",
        "Write a three-paragraph summary of the research findings",
    )
    .with_order(1)
    .with_dependencies(vec![research.id]);

    let crew = CrewFile {
        agents: vec![researcher, writer],
        workflow,
        tasks: vec![research, summarize],
    };

    std::fs::write(&output, serde_json::to_string_pretty(&crew)?)?;

    println!("Created example crew: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  crew run --file {} --input '{{\"subject\": \"Rust async runtimes\"}}'",
        output.display()
    );

    Ok(())
}
