//! llmist CLI
//!
//! Command-line runner wiring an `HttpChatProvider`, a `GadgetRegistry`
//! populated with the bundled gadgets, and the agent loop, for one-shot
//! and interactive use.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use llmist::agent::{AgentLoop, AgentLoopInput, FinishReason};
use llmist::config::{MarkerConfig, ProviderConfig};
use llmist::gadget::{GadgetRegistry, HttpFetchGadget, ReadFileGadget, WriteFileGadget};
use llmist::message::Message;
use llmist::prompt::{ParameterEncoding, PromptAssembler};
use llmist::provider::HttpChatProvider;
use llmist::{Result, VERSION};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "llmist",
    author = "llmist contributors",
    version = VERSION,
    about = "llmist - an LLM-agent runtime built on a textual gadget-call protocol",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single task to completion and print the agent's final answer
    Run {
        /// The task for the agent to carry out
        task: String,

        /// Model to use (defaults to LLMIST_MODEL / the provider default)
        #[arg(short, long)]
        model: Option<String>,

        /// Maximum iterations before forcing a final answer
        #[arg(long, default_value_t = 10)]
        max_iterations: u32,
    },

    /// Interactive chat: each line you type becomes a fresh agent run
    /// sharing an accumulating transcript
    Chat {
        /// Model to use (defaults to LLMIST_MODEL / the provider default)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// List the gadgets the bundled registry exposes
    Gadgets,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("llmist=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            task,
            model,
            max_iterations,
        } => run_task(task, model, max_iterations).await,
        Commands::Chat { model } => interactive_chat(model).await,
        Commands::Gadgets => list_gadgets(),
    }
}

fn build_registry() -> GadgetRegistry {
    let cwd = std::env::current_dir().unwrap_or_else(|_| ".".into());
    let mut registry = GadgetRegistry::new();
    registry.register(Arc::new(ReadFileGadget::new(cwd.clone())));
    registry.register(Arc::new(WriteFileGadget::new(cwd)));
    registry.register(Arc::new(HttpFetchGadget::new(30_000)));
    registry
}

fn build_provider_and_prompt(model_override: Option<String>) -> Result<(Arc<HttpChatProvider>, Arc<PromptAssembler>, String)> {
    let mut provider_config = ProviderConfig::from_env()?;
    provider_config.validate()?;
    if let Some(model) = model_override {
        provider_config.default_model = model;
    }
    let model = provider_config.default_model.clone();

    let markers = MarkerConfig::default();
    let provider = Arc::new(HttpChatProvider::new(provider_config)?);
    let prompt = Arc::new(PromptAssembler::new(markers, ParameterEncoding::Block));
    Ok((provider, prompt, model))
}

async fn run_task(task: String, model: Option<String>, max_iterations: u32) -> Result<()> {
    let (provider, prompt, model) = build_provider_and_prompt(model)?;
    let registry = Arc::new(build_registry());

    info!(%model, max_iterations, "starting run");
    let system_message = prompt.build_system_message(&registry);
    let agent_loop = AgentLoop::new(provider, prompt, Some(Duration::from_secs(60)));
    let input = AgentLoopInput::root(
        vec![system_message, Message::user(task)],
        model,
        registry,
        MarkerConfig::default(),
        max_iterations,
    );
    let output = agent_loop.run(input).await?;

    match output.finish_reason {
        FinishReason::Stop => {}
        FinishReason::MaxIterations => {
            eprintln!("(stopped after reaching the iteration cap)");
        }
        FinishReason::Cancelled => {
            eprintln!("(run was cancelled)");
        }
    }

    if let Some(last) = output.final_messages.last() {
        println!("{}", last.content.as_text());
    }
    info!(
        prompt_tokens = output.total_usage.prompt_tokens,
        completion_tokens = output.total_usage.completion_tokens,
        "run complete"
    );
    Ok(())
}

async fn interactive_chat(model: Option<String>) -> Result<()> {
    let (provider, prompt, model) = build_provider_and_prompt(model)?;
    let registry = Arc::new(build_registry());
    let system_message = prompt.build_system_message(&registry);
    let agent_loop = AgentLoop::new(provider, prompt, Some(Duration::from_secs(60)));

    let mut transcript = vec![system_message];
    let stdin = io::stdin();
    print!("> ");
    io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            print!("> ");
            io::stdout().flush().ok();
            continue;
        }
        transcript.push(Message::user(line));

        let input = AgentLoopInput::root(
            transcript.clone(),
            model.clone(),
            registry.clone(),
            MarkerConfig::default(),
            10,
        );
        let output = agent_loop.run(input).await?;
        if let Some(last) = output.final_messages.last() {
            println!("{}", last.content.as_text());
        }
        transcript = output.final_messages;

        print!("> ");
        io::stdout().flush().ok();
    }
    Ok(())
}

fn list_gadgets() -> Result<()> {
    let registry = build_registry();
    for definition in registry.definitions() {
        println!("{} — {}", definition.name, definition.description);
        if !definition.schema.fields.is_empty() {
            println!("{}", definition.schema.render_text());
        }
    }
    Ok(())
}
