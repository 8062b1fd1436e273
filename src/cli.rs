//! # CLI Module
//!
//! Handles command-line argument parsing and dispatching to the example
//! workflows. It uses the `clap` crate for parsing.

use std::future::Future;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::langfuse::{with_flush, LangfuseClient};
use crate::runner::{run_example, Provider, RunOptions};
use crate::workflows::{
    anthropic_research, bedrock_comparison, content_processing, document_chains, quickstart,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Traced LLM examples reporting to Langfuse", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: String,
    /// Overrides LANGFUSE_HOST and the config file.
    #[arg(long, global = true)]
    pub langfuse_host: Option<String>,
    /// Overrides AWS_REGION and the config file.
    #[arg(long, global = true)]
    pub aws_region: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Story, summary and sentiment with OpenAI in one trace
    Quickstart,
    /// Keyword, summary and sentiment pipeline with OpenAI
    Openai,
    /// Research summary and follow-up with Claude
    Anthropic,
    /// Compare Claude and Titan on AWS Bedrock
    Bedrock,
    /// Prompt-template chains: summary, Q&A, document extraction
    Langchain,
    /// Send one prompt to one provider and score the answer
    Run(RunArgs),
    /// Show current configuration settings
    ShowConfig,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(short, long, value_enum)]
    pub provider: Provider,
    #[arg(index = 1)]
    pub prompt: String,
    #[arg(short, long)]
    pub model: Option<String>,
    #[arg(long)]
    pub max_tokens: Option<u32>,
    #[arg(short, long)]
    pub temperature: Option<f32>,
    #[arg(long)]
    pub top_p: Option<f32>,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

fn load_config(global: &GlobalArgs) -> anyhow::Result<Config> {
    match Config::load(
        &global.config_file,
        global.langfuse_host.clone(),
        global.aws_region.clone(),
    ) {
        Ok(config) => Ok(config),
        Err(e) => {
            error!("Failed to load configuration: {:?}", e);
            Err(e)
        }
    }
}

/// Runs one workflow with a fresh Langfuse client, flushing on every exit path.
async fn run_workflow<F, Fut, T>(
    global: &GlobalArgs,
    completion_message: &str,
    workflow: F,
) -> anyhow::Result<()>
where
    F: FnOnce(Config, LangfuseClient) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let config = load_config(global)?;
    let langfuse = LangfuseClient::from_settings(&config.langfuse);
    info!(tracing_enabled = langfuse.is_enabled(), "Starting workflow");

    with_flush(&langfuse, workflow(config, langfuse.clone())).await?;
    println!("{}", completion_message);
    Ok(())
}

pub async fn handle_quickstart(global: &GlobalArgs) -> anyhow::Result<()> {
    run_workflow(global, quickstart::COMPLETION_MESSAGE, |config, langfuse| async move {
        quickstart::run(&config, &langfuse).await
    })
    .await
}

pub async fn handle_openai(global: &GlobalArgs) -> anyhow::Result<()> {
    run_workflow(global, content_processing::COMPLETION_MESSAGE, |config, langfuse| async move {
        content_processing::run(&config, &langfuse).await
    })
    .await
}

pub async fn handle_anthropic(global: &GlobalArgs) -> anyhow::Result<()> {
    run_workflow(global, anthropic_research::COMPLETION_MESSAGE, |config, langfuse| async move {
        anthropic_research::run(&config, &langfuse).await
    })
    .await
}

pub async fn handle_bedrock(global: &GlobalArgs) -> anyhow::Result<()> {
    run_workflow(global, bedrock_comparison::COMPLETION_MESSAGE, |config, langfuse| async move {
        bedrock_comparison::run(&config, &langfuse).await
    })
    .await
}

pub async fn handle_langchain(global: &GlobalArgs) -> anyhow::Result<()> {
    run_workflow(global, document_chains::COMPLETION_MESSAGE, |config, langfuse| async move {
        document_chains::run(&config, &langfuse).await
    })
    .await
}

pub async fn handle_run(global: &GlobalArgs, args: RunArgs) -> anyhow::Result<()> {
    info!("Starting 'run' command with provider: {}", args.provider.as_str());
    let config = load_config(global)?;
    let langfuse = LangfuseClient::from_settings(&config.langfuse);

    let options = args.options();
    let result = with_flush(
        &langfuse,
        run_example(&config, &langfuse, args.provider, &args.prompt, &options),
    )
    .await;

    println!("\n--- {} ({}) ---", result.provider.as_str(), result.model);
    println!("{}", result.output);
    if let Some(confidence) = result.confidence {
        println!("\nConfidence: {}", confidence);
    }
    if let Some(usage) = result.usage {
        println!(
            "Tokens: {} prompt + {} completion = {}",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        );
    }
    println!("Trace ID: {}", result.trace_id);
    Ok(())
}

pub async fn handle_show_config(global: &GlobalArgs) -> anyhow::Result<()> {
    println!("Attempting to load config from: {}", global.config_file);
    let config = load_config(global)?;

    println!("\n--- Configuration ---");
    println!("{}", serde_json::to_string_pretty(&config.masked())?);
    if !config.langfuse.is_complete() {
        println!("\nLangfuse keys are not set: traces will not be sent.");
    }
    println!("--- End Configuration ---");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "traced-llm",
            "bedrock",
            "--aws-region",
            "eu-central-1",
            "--config-file",
            "custom.json",
        ]);
        assert!(matches!(cli.command, Commands::Bedrock));
        assert_eq!(cli.global.aws_region.as_deref(), Some("eu-central-1"));
        assert_eq!(cli.global.config_file, "custom.json");
        assert!(cli.global.langfuse_host.is_none());
    }

    #[test]
    fn test_run_args_map_to_options() {
        let cli = Cli::parse_from([
            "traced-llm",
            "run",
            "--provider",
            "bedrock-titan",
            "--max-tokens",
            "500",
            "--top-p",
            "0.9",
            "Explain entanglement",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.provider, Provider::BedrockTitan);
        assert_eq!(args.prompt, "Explain entanglement");
        let options = args.options();
        assert_eq!(options.max_tokens, Some(500));
        assert_eq!(options.top_p, Some(0.9));
        assert!(options.model.is_none());
        assert_eq!(cli.global.config_file, DEFAULT_CONFIG_FILE);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let parsed = Cli::try_parse_from(["traced-llm", "run", "--provider", "cohere", "hi"]);
        assert!(parsed.is_err());
    }
}
