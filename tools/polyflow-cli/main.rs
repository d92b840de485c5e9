use clap::{Parser, Subcommand};
use polyflow::prelude::*;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Tables made available to extract activities, keyed by name.
#[derive(Deserialize)]
struct RawEntity {
    fields: Vec<Field>,
    #[serde(default)]
    rows: Vec<Tuple>,
}

/// Runs and inspects polyflow workflows
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all available activity types
    Catalog {
        /// Print the full definitions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the type previews of every activity in a workflow
    Preview {
        /// Path to the workflow JSON file
        workflow: PathBuf,
    },
    /// Execute a workflow with in-memory storage
    Run {
        /// Path to the workflow JSON file
        workflow: PathBuf,
        /// Engine configuration in TOML
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Only execute this activity and the predecessors it needs
        #[arg(short, long)]
        target: Option<ActivityId>,
        /// JSON file with tables for extract activities
        #[arg(short, long)]
        entities: Option<PathBuf>,
        /// Write the workflow including execution state to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Number of rows printed per checkpoint
        #[arg(long, default_value_t = 5)]
        rows: usize,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = ActivityRegistry::with_builtins().unwrap_or_else(|e| {
        exit_with_error(&format!("Failed to register built-in activities: {}", e))
    });

    match cli.command {
        Command::Catalog { json } => print_catalog(&registry, json),
        Command::Preview { workflow } => {
            let workflow = load_workflow(&workflow, &registry);
            print_previews(&workflow);
        }
        Command::Run {
            workflow,
            config,
            target,
            entities,
            output,
            rows,
        } => {
            let config = match config {
                Some(path) => EngineConfig::load(&path).unwrap_or_else(|e| {
                    exit_with_error(&format!("Failed to load config '{}': {}", path.display(), e))
                }),
                None => EngineConfig::default(),
            };
            let storage = Arc::new(InMemoryStorage::new());
            if let Some(path) = entities {
                load_entities(&path, &storage);
            }
            let mut workflow = load_workflow(&workflow, &registry);
            run_workflow(&mut workflow, &storage, config, target, rows);
            if let Some(path) = output {
                let json = workflow
                    .to_model(true)
                    .to_json()
                    .unwrap_or_else(|e| exit_with_error(&format!("Failed to serialize: {}", e)));
                fs::write(&path, json).unwrap_or_else(|e| {
                    exit_with_error(&format!("Failed to write '{}': {}", path.display(), e))
                });
            }
        }
    }
}

fn print_catalog(registry: &ActivityRegistry, json: bool) {
    if json {
        let catalog = registry
            .serialize()
            .unwrap_or_else(|e| exit_with_error(&format!("Failed to serialize catalog: {}", e)));
        println!("{:#}", catalog);
        return;
    }
    for activity_type in registry.activity_types() {
        let Some(info) = registry.get(activity_type) else {
            continue;
        };
        let def = info.def();
        let ports = |types: Vec<String>| types.join(", ");
        println!(
            "{:<18} {:<22} in: [{}] out: [{}]",
            activity_type,
            def.display_name(),
            ports(def.in_ports().iter().map(|p| p.port_type.to_string()).collect()),
            ports(def.out_ports().iter().map(|p| p.port_type.to_string()).collect()),
        );
    }
}

fn load_workflow(path: &PathBuf, registry: &ActivityRegistry) -> Workflow {
    let json = fs::read_to_string(path).unwrap_or_else(|e| {
        exit_with_error(&format!("Failed to read workflow '{}': {}", path.display(), e))
    });
    let model = WorkflowModel::from_json(&json)
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to parse workflow JSON: {}", e)));
    Workflow::from_model(&model, registry)
        .unwrap_or_else(|e| exit_with_error(&format!("Invalid workflow: {}", e)))
}

fn load_entities(path: &PathBuf, storage: &InMemoryStorage) {
    let json = fs::read_to_string(path).unwrap_or_else(|e| {
        exit_with_error(&format!("Failed to read entities '{}': {}", path.display(), e))
    });
    let entities: BTreeMap<String, RawEntity> = serde_json::from_str(&json)
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to parse entities JSON: {}", e)));
    for (name, entity) in entities {
        storage
            .add_entity(name.clone(), TupleType::relational(entity.fields), entity.rows)
            .unwrap_or_else(|e| exit_with_error(&format!("Invalid entity '{}': {}", name, e)));
    }
}

fn print_previews(workflow: &Workflow) {
    let order = workflow
        .topological_order(None)
        .unwrap_or_else(|e| exit_with_error(&format!("Invalid workflow: {}", e)));
    for id in order {
        let Some(activity) = workflow.activity(id) else {
            continue;
        };
        let name = activity.dynamic_name().unwrap_or(activity.def().display_name());
        println!("{} ({}) [{}]", name, activity.activity_type(), id);
        for (port, preview) in activity.out_type_preview().iter().enumerate() {
            println!("  out {}: {}", port, preview);
        }
        for (key, message) in activity.invalid_settings() {
            println!("  invalid setting '{}': {}", key, message);
        }
        if let Some(reason) = activity.invalid_state_reason() {
            println!("  invalid: {}", reason);
        }
    }
}

fn run_workflow(
    workflow: &mut Workflow,
    storage: &Arc<InMemoryStorage>,
    config: EngineConfig,
    target: Option<ActivityId>,
    rows: usize,
) {
    let runner = WorkflowRunner::new(storage.clone(), config);
    let start = Instant::now();
    let summary = runner
        .run(workflow, target)
        .unwrap_or_else(|e| exit_with_error(&format!("Execution failed: {}", e)));
    let duration = start.elapsed();

    println!("\n--- Submissions ---");
    for submission in &summary.submissions {
        let status = match &submission.error {
            Some(error) => format!("FAILED: {}", error),
            None => "ok".to_string(),
        };
        println!(
            "{} root {} ({} activities): {}",
            submission.strategy,
            submission.root,
            submission.activities.len(),
            status
        );
    }

    println!("\n--- Activities ---");
    for id in workflow.activity_ids() {
        let Some(activity) = workflow.activity(id) else {
            continue;
        };
        println!("{:<10} {} [{}]", activity.state(), activity.activity_type(), id);
        for port in 0..activity.def().out_port_count() {
            let Some(tuples) = storage.checkpoint_rows(id, port) else {
                continue;
            };
            println!("  out {}: {} tuples", port, tuples.len());
            for tuple in tuples.iter().take(rows) {
                let cells: Vec<String> = tuple.iter().map(|v| v.to_string()).collect();
                println!("    {}", cells.join(" | "));
            }
        }
    }

    println!("\n--- Summary ---");
    println!("Skipped:     {}", summary.skipped.len());
    println!("Failed:      {}", summary.failed.len());
    println!("Interrupted: {}", summary.interrupted);
    println!("Duration:    {:?}", duration);
    if !summary.is_success() {
        std::process::exit(2);
    }
}

fn exit_with_error(message: &str) -> ! {
    eprintln!("\nError: {}", message);
    std::process::exit(1);
}
