mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pagescout")]
#[command(about = "Headless page retrieval with automatic cookie-consent opt-out", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.pagescout/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Host to bind to (overrides config server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Serve the get_page tool over the Model Context Protocol (JSON-RPC on stdio)
    Mcp,

    /// Retrieve a page and print it as JSON
    Fetch {
        url: String,

        /// Settle time after load, in milliseconds
        #[arg(short, long)]
        wait_time: Option<u64>,

        /// Conversion to apply (markdown, base64-removal)
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Capture a full-page JPEG screenshot
    Screenshot {
        url: String,

        /// Output file (defaults to ~/.pagescout/screenshots/)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Settle time after load, in milliseconds
        #[arg(short, long)]
        wait_time: Option<u64>,
    },

    /// Inspect consent rule documents
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
}

#[derive(Subcommand)]
enum RulesCommands {
    /// Parse a rule document and summarise it
    Check {
        /// Rule document (defaults to the configured rules path)
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    // stdout carries command output and MCP messages.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { host, port } => {
            commands::serve::run(config_path, host, port).await?;
        }
        Commands::Mcp => {
            commands::mcp::run(config_path).await?;
        }
        Commands::Fetch { url, wait_time, format } => {
            commands::fetch::run(config_path, url, wait_time, format).await?;
        }
        Commands::Screenshot { url, output, wait_time } => {
            commands::screenshot::run(config_path, url, output, wait_time).await?;
        }
        Commands::Rules { command } => match command {
            RulesCommands::Check { path } => {
                commands::rules::check(config_path, path)?;
            }
        },
    }

    Ok(())
}
