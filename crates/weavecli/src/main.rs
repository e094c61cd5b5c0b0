// crates/weavecli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use weavecore::{
    CapabilityRef, Condition, ExecutionEvent, KindDocument, RunStatus, StepDocument, StepEvent,
    Value, WorkflowDocument,
};
use weaveruntime::{Orchestrator, OrchestratorConfig};

#[derive(Parser)]
#[command(name = "weave")]
#[command(about = "Weave workflow orchestrator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow document
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON
        #[arg(short, long)]
        input: Option<String>,

        /// Orchestrator configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow document
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available capabilities
    Capabilities,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            config,
            verbose,
        } => {
            let default_level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .init();

            run_workflow(file, input, config).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Capabilities => {
            list_capabilities();
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

fn load_document(file: &PathBuf) -> Result<WorkflowDocument> {
    WorkflowDocument::from_file(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))
}

async fn run_workflow(file: PathBuf, input: Option<String>, config: Option<PathBuf>) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let document = load_document(&file)?;
    let registry = weavesteps::standard_registry();
    let definition = registry.build(&document)?;

    println!("📋 Workflow: {}", definition.name);
    println!("   Steps: {}", definition.steps.len());
    println!();

    let input = match input {
        Some(raw) => {
            let json: serde_json::Value =
                serde_json::from_str(&raw).context("Input must be valid JSON")?;
            Value::from(json)
        }
        None => Value::Null,
    };

    let config = match config {
        Some(path) => OrchestratorConfig::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };

    let orchestrator = Orchestrator::with_config(config);
    orchestrator.validate(&definition)?;
    let workflow_id = definition.id.clone();
    orchestrator.register(definition).await?;

    // Subscribe to events for real-time output
    let mut events = orchestrator.subscribe();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    let result = orchestrator
        .execute(&workflow_id, input, HashMap::new())
        .await;
    let stats = orchestrator.stats();

    // Dropping the orchestrator closes the event stream once it is drained
    drop(orchestrator);
    let _ = event_task.await;

    let result = result?;

    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", result.run_id);
    println!("   Status: {:?}", result.status);
    println!("   Duration: {}ms", result.duration_ms);
    println!(
        "   Steps: {} completed, {} failed, {} skipped, {} cancelled",
        result.count(weavecore::StepStatus::Completed),
        result.count(weavecore::StepStatus::Failed),
        result.count(weavecore::StepStatus::Skipped),
        result.count(weavecore::StepStatus::Cancelled),
    );

    if let (Some(step), Some(error)) = (&result.failed_step, &result.error) {
        println!("   Failed at: {} ({})", step, error);
    }

    if let Some(output) = &result.output {
        println!();
        println!("📤 Output:");
        println!("{}", serde_json::to_string_pretty(output)?);
    }

    println!();
    println!("📈 Stats:");
    println!(
        "   p50 {:.1}ms  p95 {:.1}ms  p99 {:.1}ms  avg {:.1}ms",
        stats.p50_latency_ms, stats.p95_latency_ms, stats.p99_latency_ms, stats.avg_latency_ms
    );

    if result.status != RunStatus::Completed {
        anyhow::bail!("Workflow finished with status {:?}", result.status);
    }
    Ok(())
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::WorkflowStarted { workflow_id, .. } => {
            println!("▶️  Workflow {} started", workflow_id);
        }
        ExecutionEvent::StepStarted { step_id, kind, .. } => {
            println!("  ⚡ Starting step: {} ({})", step_id, kind);
        }
        ExecutionEvent::StepCompleted {
            step_id,
            duration_ms,
            ..
        } => {
            println!("  ✅ Step {} completed in {}ms", step_id, duration_ms);
        }
        ExecutionEvent::StepFailed { step_id, error, .. } => {
            println!("  ❌ Step {} failed: {}", step_id, error);
        }
        ExecutionEvent::StepSkipped { step_id, .. } => {
            println!("  ⏭️  Step {} skipped", step_id);
        }
        ExecutionEvent::StepEvent { step_id, event, .. } => match event {
            StepEvent::Info { message } => {
                println!("     ℹ️  [{}] {}", step_id, message);
            }
            StepEvent::Warning { message } => {
                println!("     ⚠️  [{}] {}", step_id, message);
            }
            StepEvent::Progress { percent, message } => {
                if let Some(msg) = message {
                    println!("     📊 [{}] {}% - {}", step_id, percent, msg);
                } else {
                    println!("     📊 [{}] {}%", step_id, percent);
                }
            }
        },
        ExecutionEvent::WorkflowCompleted { duration_ms, .. } => {
            println!("✨ Workflow completed successfully in {}ms", duration_ms);
        }
        ExecutionEvent::WorkflowFailed {
            error, duration_ms, ..
        } => {
            println!("💥 Workflow failed after {}ms: {}", duration_ms, error);
        }
        ExecutionEvent::WorkflowCancelled { .. } => {
            println!("🛑 Workflow cancelled");
        }
    }
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let document = load_document(&file)?;
    let definition = weavesteps::standard_registry().build(&document)?;
    Orchestrator::new().validate(&definition)?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", definition.name);
    println!("   Steps: {}", definition.steps.len());
    let terminal: Vec<&str> = definition
        .terminal_steps()
        .iter()
        .map(|s| s.id.as_str())
        .collect();
    println!("   Terminal steps: {}", terminal.join(", "));

    Ok(())
}

fn list_capabilities() {
    println!("📦 Available Capabilities:");
    println!();

    let registry = weavesteps::standard_registry();

    for name in registry.list_capabilities() {
        if let Some(metadata) = registry.get_metadata(&name) {
            println!("  • {} ({})", name, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", name);
        }
    }
}

fn example_document() -> WorkflowDocument {
    let fetch = StepDocument::new(
        "fetch",
        KindDocument::Call {
            capability: CapabilityRef::new("http.request").with_config("method", "GET"),
        },
    );

    let log = StepDocument::new(
        "log",
        KindDocument::Conditional {
            condition: Condition::less_than("value.status", 400.0),
            then: Box::new(StepDocument::new(
                "log_body",
                KindDocument::Transform {
                    capability: CapabilityRef::new("debug.log").with_config("label", "body"),
                },
            )),
            otherwise: None,
        },
    )
    .depends_on(["fetch"]);

    WorkflowDocument {
        id: "example-http".to_string(),
        name: Some("Example HTTP Workflow".to_string()),
        description: Some("Fetches data from an API and logs the result".to_string()),
        steps: vec![fetch, log],
        default_timeout_ms: Some(10_000),
        on_error: Default::default(),
        metadata: HashMap::new(),
    }
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let json = example_document().to_json_pretty()?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  weave run --file {} --input '{{\"url\": \"https://api.github.com/zen\"}}'",
        output.display()
    );

    Ok(())
}
