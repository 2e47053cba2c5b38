// crates/stepcli/src/main.rs

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stepcodegen::Compiler;
use stepcore::{repair_triggers, ExecutionEvent, Fields, Graph, Node, NodeStatus, TriggerType, Value};
use stepruntime::{load_graph, ActionRegistry, ExecutionRun, FlowRuntime, RuntimeConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stepflow")]
#[command(about = "Run, validate and compile step flow workflows", long_about = None)]
struct Cli {
    /// Runtime config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        file: PathBuf,

        /// Trigger payload as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Print the full run trace as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Check a workflow file for structural errors
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// Keep only the first trigger of a workflow file
    Repair {
        /// Path to workflow JSON file
        file: PathBuf,

        /// Where to write the repaired graph; defaults to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compile a workflow into a standalone TypeScript project
    Compile {
        /// Path to workflow JSON file
        file: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "compiled")]
        out: PathBuf,

        /// Package name for the generated manifest
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List available actions
    Actions,

    /// Create an example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    let registry = stepruntime::registry::init(stepplugins::register_all)?;

    match cli.command {
        Commands::Run { file, input, json } => {
            run_workflow(registry, config, &file, input, json).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(registry, config, &file)?;
        }

        Commands::Repair { file, output } => {
            repair_workflow(&file, output)?;
        }

        Commands::Compile { file, out, name } => {
            compile_workflow(&registry, &config, &file, &out, name)?;
        }

        Commands::Actions => {
            list_actions(&registry);
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn parse_payload(input: Option<String>) -> Result<Fields> {
    let Some(input) = input else {
        return Ok(Fields::new());
    };
    let json: serde_json::Value = serde_json::from_str(&input).context("Input is not valid JSON")?;
    match Value::from(json) {
        Value::Object(fields) => Ok(fields),
        other => Err(anyhow!("Input must be a JSON object, got {}", other.type_name())),
    }
}

async fn run_workflow(
    registry: Arc<ActionRegistry>,
    config: RuntimeConfig,
    file: &Path,
    input: Option<String>,
    json: bool,
) -> Result<()> {
    let graph = load_graph(file)?;
    let payload = parse_payload(input)?;
    let runtime = FlowRuntime::with_config(registry, config);

    if !json {
        println!("🚀 Loading workflow from: {}", file.display());
        println!("📋 Workflow: {}", graph.name.as_deref().unwrap_or("(unnamed)"));
        println!("   Nodes: {}", graph.nodes.len());
        println!("   Edges: {}", graph.edges.len());
        println!();
    }

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if json {
                if matches!(event, ExecutionEvent::RunCompleted { .. } | ExecutionEvent::RunCancelled { .. }) {
                    break;
                }
                continue;
            }
            match event {
                ExecutionEvent::RunStarted { node_count, .. } => {
                    println!("▶️  Run started ({} nodes)", node_count);
                }
                ExecutionEvent::NodeStarted { node_id, label, .. } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, label);
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    attempts,
                    duration_ms,
                    ..
                } => {
                    if attempts > 1 {
                        println!("  ✅ Node {} completed in {}ms after {} attempts", node_id, duration_ms, attempts);
                    } else {
                        println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                    }
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::NodeSkipped { node_id, .. } => {
                    println!("  ⏭️  Node {} skipped", node_id);
                }
                ExecutionEvent::NodeRetrying {
                    node_id,
                    attempt,
                    delay_ms,
                    error,
                    ..
                } => {
                    println!("  🔁 Node {} attempt {} failed ({}), retrying in {}ms", node_id, attempt, error, delay_ms);
                }
                ExecutionEvent::RunCancelled { .. } => {
                    println!("🛑 Run cancelled");
                    break;
                }
                ExecutionEvent::RunCompleted { success, duration_ms, .. } => {
                    if success {
                        println!("✨ Run completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Run failed after {}ms", duration_ms);
                    }
                    break;
                }
            }
        }
    });

    let handle = runtime.spawn(graph, payload);
    let run_id = handle.run_id();
    let cancel = handle.cancel_token();
    let join = handle.join();
    tokio::pin!(join);
    let result = tokio::select! {
        result = &mut join => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(%run_id, "Interrupted, cancelling run");
            cancel.cancel();
            join.await
        }
    };
    let run = match result {
        Ok(run) => run,
        Err(e) => {
            // Rejected before it started, so no closing event is coming.
            event_task.abort();
            return Err(e.into());
        }
    };
    let _ = event_task.await;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_summary(&run);
    }

    if !run.is_success() {
        bail!("Run {} failed", run.run_id);
    }
    Ok(())
}

fn print_summary(run: &ExecutionRun) {
    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", run.run_id);
    println!("   Status: {:?}", run.status);
    let completed = run.nodes.iter().filter(|t| t.status == NodeStatus::Success).count();
    println!("   Completed: {}/{} nodes", completed, run.nodes.len());

    let failed: Vec<_> = run.nodes.iter().filter(|t| t.status == NodeStatus::Failed).collect();
    if !failed.is_empty() {
        println!();
        println!("❌ Failures:");
        for trace in failed {
            let reason = trace.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
            println!("   {} ({}): {}", trace.node_id, trace.label, reason);
        }
    }
    let skipped = run.skipped_nodes();
    if !skipped.is_empty() {
        println!("   Skipped: {}", skipped.join(", "));
    }

    let with_output: Vec<_> = run
        .nodes
        .iter()
        .filter_map(|t| run.output(&t.node_id).filter(|o| !o.fields.is_empty()))
        .collect();
    if !with_output.is_empty() {
        println!();
        println!("📤 Outputs:");
        for output in with_output {
            println!("   {} ({}):", output.node_id, output.label);
            for (key, value) in &output.fields {
                println!("     {}: {}", key, value.to_json());
            }
        }
    }
}

fn validate_workflow(registry: Arc<ActionRegistry>, config: RuntimeConfig, file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let graph = load_graph(file)?;
    let runtime = FlowRuntime::with_config(registry, config);

    match runtime.validate(&graph) {
        Ok(()) => {
            println!("✅ Workflow is valid:");
            println!("   Name: {}", graph.name.as_deref().unwrap_or("(unnamed)"));
            println!("   Nodes: {}", graph.nodes.len());
            println!("   Edges: {}", graph.edges.len());
            Ok(())
        }
        Err(e) => {
            println!("❌ {}", e.reason);
            if !e.node_ids.is_empty() {
                println!("   Nodes: {}", e.node_ids.join(", "));
            }
            if !e.edge_ids.is_empty() {
                println!("   Edges: {}", e.edge_ids.join(", "));
            }
            if graph.triggers().count() > 1 {
                println!();
                println!("Keep only the first trigger with:");
                println!("  stepflow repair {} --output {}", file.display(), file.display());
            }
            Err(e.into())
        }
    }
}

fn repair_workflow(file: &Path, output: Option<PathBuf>) -> Result<()> {
    let repair = repair_triggers(load_graph(file)?);
    let json = repair.graph.to_json_pretty()?;

    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            if repair.is_noop() {
                println!("✅ Nothing to repair, wrote {}", path.display());
            } else {
                println!("🔧 Removed triggers: {}", repair.removed_nodes.join(", "));
                if !repair.removed_edges.is_empty() {
                    println!("   Removed edges: {}", repair.removed_edges.join(", "));
                }
                println!("   Wrote {}", path.display());
            }
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn compile_workflow(
    registry: &ActionRegistry,
    config: &RuntimeConfig,
    file: &Path,
    out: &Path,
    name: Option<String>,
) -> Result<()> {
    let graph = load_graph(file)?;
    let compiled = Compiler::new(&graph, registry).with_fan_in(config.fan_in).compile()?;

    let name = name.unwrap_or_else(|| package_name(&graph, file));
    compiled
        .write_to(out, &name)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!("📦 Compiled {} into {}", compiled.function_name, out.display());
    for (path, _) in compiled.files(&name) {
        println!("   {}", path);
    }
    if !compiled.env_vars.is_empty() {
        println!();
        println!("Set these before running:");
        for var in &compiled.env_vars {
            println!("  {}", var.name);
        }
    }
    Ok(())
}

/// npm-style package name from the graph name or file stem.
fn package_name(graph: &Graph, file: &Path) -> String {
    let raw = graph
        .name
        .clone()
        .or_else(|| file.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default();
    let mut name = String::new();
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.is_empty() && !name.ends_with('-') {
            name.push('-');
        }
    }
    let name = name.trim_end_matches('-').to_string();
    if name.is_empty() {
        "workflow".to_string()
    } else {
        name
    }
}

fn list_actions(registry: &ActionRegistry) {
    println!("📦 Available Actions:");

    for integration in registry.integrations() {
        println!();
        println!("  {} ({})", integration.label, integration.id);
        if !integration.description.is_empty() {
            println!("    {}", integration.description);
        }
        for action in registry.list_actions().iter().filter(|a| a.integration() == integration.id) {
            println!("    • {} - {}", action.id, action.label);
            let required: Vec<&str> = action
                .config_schema
                .iter()
                .filter(|f| f.required)
                .map(|f| f.name.as_str())
                .collect();
            if !required.is_empty() {
                println!("      requires: {}", required.join(", "));
            }
            if !action.credential_keys.is_empty() {
                println!("      credentials: {}", action.credential_keys.join(", "));
            }
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut graph = Graph::new().with_name("Example HTTP Workflow");
    graph.description = Some("Fetches a quote from an API and logs it".to_string());

    graph.add_node(Node::trigger("trigger-1", "Start", TriggerType::Manual));
    graph.add_node(
        Node::action("http-1", "Fetch Data", stepplugins::SEND_REQUEST)
            .with_field("endpoint", "{{@trigger-1:Start.url}}")
            .with_field("httpMethod", "GET"),
    );
    graph.add_node(
        Node::action("log-1", "Log Response", stepplugins::LOG)
            .with_field("message", "Got {{@http-1:Fetch Data.status}}: {{@http-1:Fetch Data.data}}"),
    );
    graph.connect("trigger-1", "http-1");
    graph.connect("http-1", "log-1");

    std::fs::write(output, graph.to_json_pretty()?)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  stepflow run {} --input '{{\"url\": \"https://api.github.com/zen\"}}'",
        output.display()
    );

    Ok(())
}
