//! ferroprot: Staged protein design pipeline.
//! Entry point for the tool-serving binary.

mod stdio;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ferroprot_config::AppConfig;
use ferroprot_pipeline::PipelineService;

#[derive(Debug, Parser)]
#[command(name = "ferroprot", version, about = "Staged protein design pipeline")]
struct Cli {
    /// Override the run output root from configuration.
    #[arg(long, env = "PIPELINE_OUTPUT_ROOT")]
    output_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve tool calls as JSON-RPC lines on stdin/stdout (default).
    Serve,
    /// Print the tool manifest.
    Tools,
    /// Invoke one tool and print its JSON result.
    Call {
        /// Tool name, e.g. pipeline.status
        tool: String,
        /// Flat JSON argument map.
        #[arg(default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout is the tool channel; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ferroprot=debug,info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("ferroprot {} starting", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load().context("loading ferroprot configuration")?;
    if let Some(root) = cli.output_root {
        config.storage.output_root = root;
    }
    info!(
        output_root = %config.storage.output_root.display(),
        runpod = config.runpod.api_key.is_some(),
        "Configuration loaded"
    );

    let service = Arc::new(PipelineService::from_config(&config).context("building pipeline service")?);
    let registry = tools::build_default_registry(service);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!("Serving tool calls on stdio");
            stdio::serve(&registry).await?;
        }
        Command::Tools => {
            println!("{}", serde_json::to_string_pretty(&registry.manifest())?);
        }
        Command::Call { tool, args } => {
            let params: serde_json::Value = serde_json::from_str(&args).context("tool arguments must be JSON")?;
            let out = registry.invoke(&tool, params).await?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}
