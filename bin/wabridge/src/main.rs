mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "wabridge")]
#[command(about = "HTTP bridge that drives WhatsApp Web sessions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (long-running daemon)
    Gateway {
        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// List persisted sessions and whether their browser is still running
    Sessions,

    /// Kill the browser recorded for a token and forget the token
    Terminate {
        /// Session token
        token: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Gateway { port, host } => {
            commands::gateway::run(host, port).await?;
        }
        Commands::Sessions => {
            commands::sessions::list().await?;
        }
        Commands::Terminate { token } => {
            commands::sessions::terminate(&token).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config_cmd::show().await?,
            ConfigCommands::Init { force } => commands::config_cmd::init(force).await?,
        },
    }

    Ok(())
}
