//! # Traced LLM Examples
//!
//! Example programs that call OpenAI, Anthropic and AWS Bedrock models and
//! report every step (traces, spans, generations, scores) to Langfuse.

mod chain;
mod cli;
mod config;
mod langfuse;
mod llm;
mod runner;
mod scoring;
mod workflows;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Values from .env never override variables already set in the environment.
    dotenvy::dotenv().ok();

    // RUST_LOG controls verbosity, e.g. RUST_LOG=traced_llm_examples=debug,info
    fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli_args = Cli::parse();
    let global = cli_args.global;

    let outcome = match cli_args.command {
        Commands::Quickstart => cli::handle_quickstart(&global).await,
        Commands::Openai => cli::handle_openai(&global).await,
        Commands::Anthropic => cli::handle_anthropic(&global).await,
        Commands::Bedrock => cli::handle_bedrock(&global).await,
        Commands::Langchain => cli::handle_langchain(&global).await,
        Commands::Run(args) => cli::handle_run(&global, args).await,
        Commands::ShowConfig => cli::handle_show_config(&global).await,
    };

    if let Err(e) = outcome {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
