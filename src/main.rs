// SPDX-License-Identifier: MIT

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use trellis_rs::adk::memory::InMemoryStore;
use trellis_rs::trellis::config::ModelSettings;
use trellis_rs::trellis::definition::{DefinitionBuilder, DefinitionLoader};
use trellis_rs::trellis::graph::{CompiledGraph, LogSink, RunContext, Update};
use trellis_rs::trellis::mcp::manager::McpServiceManager;
use trellis_rs::trellis::messages::{self, MESSAGES};
use trellis_rs::trellis::registry::ToolRegistry;
use trellis_rs::trellis::tools::register_builtin_tools;
use trellis_rs::trellis::workflows;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a prompt to the supervisor over the built-in workflows
    Run {
        /// The prompt to send
        #[arg(short, long)]
        prompt: String,

        /// Conversation thread to resume
        #[arg(short, long)]
        thread: Option<String>,

        /// User whose long-term memories are used
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Run a graph definition file
    Workflow {
        /// Path to the definition file
        #[arg(short, long)]
        file: String,

        /// Input message for the graph
        #[arg(short, long)]
        input: String,

        /// Conversation thread to resume
        #[arg(short, long)]
        thread: Option<String>,
    },
    /// Parse and compile a definition file without running it
    Validate {
        /// Path to the definition file
        #[arg(short, long)]
        file: String,
    },
}

/// Context shared by the run commands; Ctrl-C cancels the run
fn run_context(settings: &ModelSettings, tools: ToolRegistry) -> anyhow::Result<RunContext> {
    let ctx = RunContext::new()
        .with_model(settings.build()?)
        .with_tools(tools)
        .with_memory(Arc::new(InMemoryStore::new()))
        .with_events(Arc::new(LogSink));

    let cancel = ctx.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; cancelling run");
            cancel.cancel();
        }
    });
    Ok(ctx)
}

async fn execute(graph: &CompiledGraph, input: String, ctx: &RunContext) -> anyhow::Result<()> {
    println!("Running graph: {}", graph.name());
    let outcome = graph
        .invoke(Update::new().set(MESSAGES, json!(input)), ctx)
        .await;
    log::info!(
        "Run {} took {} steps ({} node invocations)",
        outcome.run_id,
        outcome.steps,
        outcome.invocations
    );

    let state = outcome.into_result()?;
    println!("Response: {}", messages::last_text(&state, MESSAGES));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Run {
            prompt,
            thread,
            user,
        } => {
            let registry = ToolRegistry::new();
            register_builtin_tools(&registry).await;

            let graph = workflows::build(workflows::supervisor::NAME)?;
            let mut ctx = run_context(&ModelSettings::default(), registry)?;
            if let Some(thread) = thread {
                ctx = ctx.with_thread(thread);
            }
            if let Some(user) = user {
                ctx = ctx.with_user(user);
            }
            execute(&graph, prompt, &ctx).await?;
        }
        Commands::Workflow {
            file,
            input,
            thread,
        } => {
            let registry = ToolRegistry::new();
            register_builtin_tools(&registry).await;
            let mcp_manager = Arc::new(McpServiceManager::new());

            let def = DefinitionLoader::new().load(&file)?;
            let base_dir = Path::new(&file).parent().unwrap_or_else(|| Path::new("."));
            let builder = DefinitionBuilder::new(registry.clone(), mcp_manager);
            let graph = builder.build(&def, base_dir).await?;

            let mut ctx = run_context(&def.model, registry)?;
            if let Some(thread) = thread {
                ctx = ctx.with_thread(thread);
            }
            execute(&graph, input, &ctx).await?;
        }
        Commands::Validate { file } => {
            let registry = ToolRegistry::new();
            register_builtin_tools(&registry).await;

            let graph = DefinitionBuilder::offline(registry).build_file(&file).await?;
            println!("Definition '{}' is valid", graph.name());
            println!("Entry: {}", graph.entry());
            let mut nodes: Vec<&str> = graph.node_names().collect();
            nodes.sort_unstable();
            println!("Nodes: {}", nodes.join(", "));
            for warning in graph.warnings() {
                println!("Warning: {}", warning);
            }
        }
    }

    Ok(())
}
