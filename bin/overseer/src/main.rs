mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "overseer", version, about = "Supervised multi-agent task orchestrator")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket gateway
    Gateway {
        /// Bind host (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one task locally and print its event stream as JSON lines
    Run {
        /// Task description
        task: Vec<String>,
        /// User id credentials are stored under
        #[arg(long, default_value = "local")]
        user: String,
        /// Apply auditor-suggested actions automatically
        #[arg(long)]
        auto_apply: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Gateway { host, port } => {
            commands::gateway::run(host, port).await?;
        }
        Commands::Run {
            task,
            user,
            auto_apply,
        } => {
            commands::run_cmd::run(task.join(" "), user, auto_apply).await?;
        }
    }

    Ok(())
}
