use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

mod config;
mod watch;

use config::AtendeConfig;
use watch::WatchOptions;

#[derive(Parser)]
#[command(name = "atende")]
#[command(about = "Monitor the Atende WhatsApp realtime channel from a terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.atende)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print session, pairing code and message events
    Watch(WatchArgs),

    /// Print the resolved configuration as JSON
    Config,
}

#[derive(Parser)]
struct WatchArgs {
    /// Backend URL (ws:// or wss://), overrides [channel].host
    #[arg(long)]
    host: Option<String>,

    /// Namespace path appended to the host
    #[arg(long)]
    namespace: Option<String>,

    /// Bearer token for the connection
    #[arg(long, env = "ATENDE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Conversation to subscribe to (repeatable)
    #[arg(short = 'c', long = "conversation")]
    conversations: Vec<String>,

    /// Output one JSON object per change
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = AtendeConfig::new(cli.data_dir.clone())?;

    match cli.command {
        Commands::Watch(args) => {
            let options = WatchOptions {
                host: args.host,
                namespace: args.namespace,
                token: args.token,
                conversations: args.conversations,
                json: args.json,
            };
            watch::watch_command(&config, options).await
        }
        Commands::Config => {
            let mut fc = config.load()?;
            if fc.channel.token.is_some() {
                fc.channel.token = Some("<redacted>".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&fc)?);
            Ok(())
        }
    }
}

fn init_tracing(debug: bool) {
    let default_directive = if debug {
        "atende=debug,atende_realtime=debug,info"
    } else {
        "atende=info,atende_realtime=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}
