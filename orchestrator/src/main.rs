//! quill CLI
//!
//! Usage:
//!   quill workflow run --topic "Angular frameworks"
//!   quill workflow list
//!   quill workflow show multi-agent-workflow
//!   quill publish --topic "Angular frameworks" --session blog
//!   quill threads
//!   quill personas
//!   quill models

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orchestrator::blog::{self, BlogPersonas};
use orchestrator::engine::WorkflowEngine;
use quill_agent::config::QuillConfig;
use quill_agent::events::{event_channel, EventReceiver, RunEvent};
use quill_agent::llm::{list_models, ChatBackend};
use quill_agent::{
    CancellationToken, Fields, PersonaRegistry, Schema, SequencePlanner, SessionKey, SqliteMemory,
};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Persona pipelines and tool delegation over a local Ollama model")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Ollama server URL
    #[arg(long, env = "OLLAMA_URL", global = true)]
    ollama_url: Option<String>,

    /// Default model to use
    #[arg(short = 'm', long, env = "OLLAMA_MODEL", global = true)]
    model: Option<String>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace). Default is warn.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Workflow management and execution
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
    /// Ask the publisher agent to write and edit a blog post
    Publish {
        /// Blog post topic
        #[arg(long, short)]
        topic: String,

        /// Memory thread to continue
        #[arg(long, short)]
        session: Option<String>,

        /// Resource (user) the thread belongs to
        #[arg(long)]
        resource: Option<String>,

        /// Memory database path (default ~/.quill/memory.db)
        #[arg(long)]
        memory: Option<PathBuf>,

        /// Call the tools in a fixed order instead of letting the model decide
        #[arg(long)]
        sequential: bool,
    },
    /// List memory threads, most recently updated first
    Threads {
        /// Memory database path (default ~/.quill/memory.db)
        #[arg(long)]
        memory: Option<PathBuf>,

        /// Maximum number of threads to show
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// List configured personas
    Personas,
    /// List models available on the Ollama server
    Models,
}

#[derive(Subcommand)]
enum WorkflowCommands {
    /// Run a workflow
    Run {
        /// Workflow name
        #[arg(default_value = blog::WORKFLOW_ID)]
        workflow: String,

        /// Blog post topic (sets the `topic` input field)
        #[arg(long, short)]
        topic: Option<String>,

        /// Extra input fields as key=value
        #[arg(long = "set", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,

        /// Directory for custom workflow files
        #[arg(long)]
        workflows_dir: Option<PathBuf>,
    },
    /// List available workflows
    List {
        /// Directory for custom workflow files
        #[arg(long)]
        workflows_dir: Option<PathBuf>,
    },
    /// Show workflow definition
    Show {
        /// Workflow name
        workflow: String,

        /// Directory for custom workflow files
        #[arg(long)]
        workflows_dir: Option<PathBuf>,
    },
}

fn workflow_not_found(workflow: &str) -> String {
    format!(
        "Workflow '{}' not found. Use 'quill workflow list' to see available workflows.",
        workflow
    )
}

fn field_names(schema: &Schema) -> String {
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
    names.join(", ")
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

/// Initialize tracing with the given verbosity level
///
/// - 0: warn (default)
/// - 1: info (-v)
/// - 2: debug (-vv)
/// - 3+: trace (-vvv)
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    // Allow RUST_LOG to override if set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Everything a command needs, resolved from config file and flags
struct Runtime {
    config: QuillConfig,
    personas: PersonaRegistry,
}

impl Runtime {
    fn load(cli: &Cli) -> Result<Self> {
        let mut config = QuillConfig::load()?;
        if let Some(url) = &cli.ollama_url {
            config.llm.url = url.clone();
        }
        if let Some(model) = &cli.model {
            config.llm.model = model.clone();
        }

        let mut personas = blog::default_personas();
        personas.extend(config.personas.iter().cloned());

        Ok(Self { config, personas })
    }

    fn backend(&self, model: Option<&str>) -> Arc<dyn ChatBackend> {
        Arc::new(self.config.llm.client(model))
    }

    fn blog_personas(&self) -> Result<BlogPersonas> {
        BlogPersonas::from_registry(&self.personas, |model| self.backend(model))
    }

    fn open_memory(&self, path: Option<PathBuf>) -> Result<SqliteMemory> {
        let memory = match path.or_else(|| self.config.memory.path.clone()) {
            Some(path) => SqliteMemory::open_at(path)?,
            None => SqliteMemory::open()?,
        };
        Ok(memory)
    }

    fn engine(&self, workflows_dir: Option<PathBuf>) -> Result<WorkflowEngine> {
        let mut engine = WorkflowEngine::with_builtins(&self.blog_personas()?)?;

        if let Some(dir) = workflows_dir.or_else(|| self.config.workflows.dir.clone()) {
            let loaded = engine.load_dir(&dir, &self.personas, |model| self.backend(model))?;
            tracing::info!("Loaded {} custom workflow(s) from {}", loaded, dir.display());
        }

        Ok(engine)
    }
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            token.cancel();
        }
    });
}

/// Print progress events to stderr until the sender is dropped
async fn print_events(mut rx: EventReceiver) {
    while let Some(event) = rx.recv().await {
        match event {
            RunEvent::StepStart { index, id } => eprintln!("[Step {}] {}", index + 1, id),
            RunEvent::StepComplete { id, duration, .. } => {
                eprintln!("  {} completed in {}ms", id, duration.as_millis())
            }
            RunEvent::ToolStart { name, .. } => eprintln!("  -> {}", name),
            RunEvent::ToolComplete { name, duration, is_error } => {
                let mark = if is_error { "failed" } else { "done" };
                eprintln!("  <- {} {} ({}ms)", name, mark, duration.as_millis())
            }
            RunEvent::Error { message } => eprintln!("  error: {}", message),
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI first to get verbosity before initializing tracing
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = Runtime::load(&cli)?;

    match cli.command {
        Commands::Workflow { command } => run_workflow_command(command, &runtime).await,
        Commands::Publish {
            topic,
            session,
            resource,
            memory,
            sequential,
        } => run_publish(&runtime, &topic, session, resource, memory, sequential).await,
        Commands::Threads { memory, limit } => run_threads(&runtime, memory, limit),
        Commands::Personas => {
            run_personas(&runtime);
            Ok(())
        }
        Commands::Models => run_models(&runtime).await,
    }
}

async fn run_workflow_command(command: WorkflowCommands, runtime: &Runtime) -> Result<()> {
    match command {
        WorkflowCommands::Run {
            workflow,
            topic,
            fields,
            workflows_dir,
        } => {
            let engine = runtime.engine(workflows_dir)?;
            let Some(wf) = engine.get(&workflow) else {
                bail!(workflow_not_found(&workflow));
            };

            let mut input = Fields::new();
            if let Some(topic) = topic {
                input.insert("topic".to_string(), topic.into());
            }
            for (key, value) in fields {
                input.insert(key, value.into());
            }

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let (tx, rx) = event_channel();
            let printer = tokio::spawn(print_events(rx));
            let result = wf.run_observed(input, &cancel, tx).await;
            let _ = printer.await;

            let run = result?;
            for (field, value) in &run.output {
                match value.as_str() {
                    Some(text) if run.output.len() == 1 => println!("{}", text),
                    Some(text) => println!("{}:\n{}\n", field, text),
                    None => println!("{}: {}", field, value),
                }
            }
            eprintln!(
                "\nWorkflow {} completed: {} step(s) in {}ms",
                run.workflow_id,
                run.steps.len(),
                run.total_duration_ms()
            );
        }

        WorkflowCommands::List { workflows_dir } => {
            let engine = runtime.engine(workflows_dir)?;
            let workflows = engine.list_workflows();

            println!("Available Workflows:\n");
            println!("Built-in:");
            for (name, desc, _) in workflows.iter().filter(|(_, _, custom)| !custom) {
                println!("  {} - {}", name, desc);
            }

            let customs: Vec<_> = workflows.iter().filter(|(_, _, custom)| *custom).collect();
            if !customs.is_empty() {
                println!("\nCustom:");
                for (name, desc, _) in customs {
                    println!("  {} - {}", name, desc);
                }
            }

            println!("\nRun a workflow with: quill workflow run <name> --topic \"...\"");
        }

        WorkflowCommands::Show {
            workflow,
            workflows_dir,
        } => {
            let engine = runtime.engine(workflows_dir)?;
            let Some(wf) = engine.get(&workflow) else {
                bail!(workflow_not_found(&workflow));
            };

            println!("Workflow: {}\n", wf.id());
            if !wf.description().is_empty() {
                println!("Description: {}\n", wf.description());
            }
            let input = serde_json::to_string_pretty(&wf.input_schema().to_json_schema())?;
            let output = serde_json::to_string_pretty(&wf.output_schema().to_json_schema())?;
            println!("Input: {}", input);
            println!("Output: {}\n", output);
            println!("Steps:");
            for (i, step) in wf.steps().iter().enumerate() {
                println!("  {}. {}", i + 1, step.id());
                println!("     {}", step.description());
                println!(
                    "     {{{}}} -> {{{}}}",
                    field_names(step.input_schema()),
                    field_names(step.output_schema())
                );
            }
        }
    }

    Ok(())
}

async fn run_publish(
    runtime: &Runtime,
    topic: &str,
    session: Option<String>,
    resource: Option<String>,
    memory_path: Option<PathBuf>,
    sequential: bool,
) -> Result<()> {
    let personas = runtime.blog_personas()?;
    let memory_config = &runtime.config.memory;

    let memory = runtime.open_memory(memory_path)?;
    tracing::info!("Using memory at {}", memory.path().display());

    let (tx, rx) = event_channel();
    let mut publisher = blog::publisher_agent(&personas)?
        .with_memory(Arc::new(memory))
        .with_history_limit(Some(memory_config.history_limit))
        .with_memory_failure_policy(memory_config.on_failure)
        .with_max_iterations(runtime.config.orchestrator.max_iterations)
        .with_event_sender(tx);

    if sequential {
        publisher = publisher.with_planner(Arc::new(SequencePlanner::new(
            [blog::COPYWRITER_TOOL, blog::EDITOR_TOOL],
            "topic",
            "copy",
        )));
    }

    let session = session.map(|thread| {
        let key = SessionKey::thread(thread);
        match resource {
            Some(resource) => key.with_resource(resource),
            None => key,
        }
    });

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let printer = tokio::spawn(print_events(rx));
    // Sequential runs hand the prompt straight to the copywriter as its topic
    let prompt = if sequential {
        topic.to_string()
    } else {
        blog::publisher_prompt(topic)
    };
    let result = publisher.generate(&prompt, session.as_ref(), &cancel).await;
    drop(publisher);
    let _ = printer.await;

    let generation = result.context("Publisher failed")?;
    println!("{}", generation.text);
    Ok(())
}

fn run_threads(runtime: &Runtime, memory_path: Option<PathBuf>, limit: u32) -> Result<()> {
    let memory = runtime.open_memory(memory_path)?;
    let threads = memory.list_threads(limit)?;

    if threads.is_empty() {
        println!("No threads in {}", memory.path().display());
        return Ok(());
    }

    for thread in threads {
        let resource = thread.session.resource.as_deref().unwrap_or("-");
        println!(
            "  {:<24} {:<12} {:>4} messages  {}",
            thread.session.thread,
            resource,
            thread.message_count,
            thread.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn run_personas(runtime: &Runtime) {
    println!("Available Personas:\n");
    for (name, config) in runtime.personas.iter() {
        let model = config.model.as_deref().unwrap_or(&runtime.config.llm.model);
        println!("  {} ({}) - {}", name, model, config.label());
        println!("    {}", config.instructions);
    }
}

async fn run_models(runtime: &Runtime) -> Result<()> {
    let models = list_models(&runtime.config.llm.url)
        .await
        .with_context(|| format!("Failed to list models at {}", runtime.config.llm.url))?;

    if models.is_empty() {
        println!("No models installed. Try: ollama pull {}", QuillConfig::default_model());
        return Ok(());
    }

    println!("Models at {}:\n", runtime.config.llm.url);
    for model in models {
        let marker = if model.name == runtime.config.llm.model { "*" } else { " " };
        println!(" {} {}", marker, model.name);
    }
    Ok(())
}
