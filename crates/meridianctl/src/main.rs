//! meridianctl: Command-line interface for the Meridian timestamp oracle.
//!
//! Fetches timestamps, inspects allocator status and moves streams forward
//! from the terminal.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Command-line interface for the Meridian timestamp oracle.
#[derive(Parser)]
#[command(name = "meridianctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Meridian server endpoint (e.g., http://127.0.0.1:3379)
    #[arg(short, long, env = "MERIDIAN_ENDPOINT", default_value = "http://127.0.0.1:3379")]
    endpoint: String,

    /// Path to TLS CA certificate (required for https:// endpoints)
    #[arg(long, env = "MERIDIAN_TLS_CA")]
    tls_ca: Option<String>,

    /// TLS domain name override
    #[arg(long, env = "MERIDIAN_TLS_DOMAIN")]
    tls_domain: Option<String>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a block of timestamps
    Ts {
        /// Stream: "global" or "local/<region>"
        #[arg(short, long, default_value = "global")]
        stream: String,
        /// Number of consecutive timestamps to reserve
        #[arg(short, long, default_value_t = 1)]
        count: u32,
    },
    /// Show leadership and per-stream allocator state
    Status,
    /// Move a stream forward to the given timestamp
    Reset {
        /// Target as "<physical>.<logical>", "<physical>" or a composed 64-bit value with --composed
        timestamp: String,
        /// Stream: "global" or "local/<region>"
        #[arg(short, long, default_value = "global")]
        stream: String,
        /// Interpret the target as a composed 64-bit timestamp
        #[arg(long)]
        composed: bool,
        /// Succeed without changes when the target is not ahead
        #[arg(long)]
        ignore_smaller: bool,
        /// Allow targets far ahead of the server clock
        #[arg(long)]
        skip_upper_bound_check: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = meridian::client::ConnectConfig {
        endpoint: cli.endpoint,
        tls_ca: cli.tls_ca,
        tls_domain: cli.tls_domain,
    };

    match cli.command {
        Commands::Ts { stream, count } => {
            commands::ts::run(config, &stream, count, cli.output).await?;
        }
        Commands::Status => commands::status::run(config, cli.output).await?,
        Commands::Reset {
            timestamp,
            stream,
            composed,
            ignore_smaller,
            skip_upper_bound_check,
        } => {
            let target = commands::reset::parse_target(&timestamp, composed)?;
            commands::reset::run(
                config,
                &stream,
                target,
                ignore_smaller,
                skip_upper_bound_check,
                cli.output,
            )
            .await?;
        }
    }

    Ok(())
}
