//! dawpilot CLI, the main entry point.
//!
//! Commands:
//! - `serve`   Start the HTTP gateway for the chat client and the DAW host
//! - `chat`    One turn (or an interactive session) from the terminal
//! - `tools`   List the tool catalog
//! - `config`  Show, locate or initialize the configuration file

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "dawpilot",
    about = "dawpilot: an AI assistant for your DAW session",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (default: $DAWPILOT_CONFIG or ~/.dawpilot/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "DAWPILOT_LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with the assistant (no executor attached; DAW actions time out)
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List the tools offered to the model
    Tools {
        /// Print the full JSON schemas
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,

        /// Print the config file path only
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { host, port } => commands::serve::run(config_path, host, port).await?,
        Commands::Chat { message } => commands::chat::run(config_path, message).await?,
        Commands::Tools { json } => commands::tools::run(json)?,
        Commands::Config { init, path } => commands::config_cmd::run(config_path, init, path)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "dawpilot=debug,tower_http=debug"
    } else {
        "dawpilot=info,tower_http=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
