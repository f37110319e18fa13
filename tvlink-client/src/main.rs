//! tvlink-client — entry point.
//!
//! ```text
//! tvlink-client                               Connect and print events until Ctrl-C
//! tvlink-client server-info                   Fetch server info (starts a bandwidth probe)
//! tvlink-client channels                      List channels
//! tvlink-client runtime-info <stream>         Watchers and chat state of one channel
//! tvlink-client chat <stream> <message...>    Post a chat line and wait for approval
//! tvlink-client --config <path>               Use custom config TOML
//! tvlink-client --gen-config                  Dump default config and exit
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tvlink_client::config::{ClientConfig, LoggingConfig};
use tvlink_client::report::{describe_event, render};
use tvlink_core::{ChatMessage, InnerClient, InnerError};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tvlink-client", about = "tvlink inner control-channel client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tvlink-client.toml")]
    config: PathBuf,

    /// Inner server address (overrides config). Example: 10.0.0.5:6317
    #[arg(long)]
    host: Option<String>,

    /// Login presented to the server (overrides config).
    #[arg(short, long)]
    login: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Stay connected and print events.
    Watch,
    /// Fetch server info.
    ServerInfo,
    /// Fetch the channel list.
    Channels,
    /// Fetch runtime info of one channel.
    RuntimeInfo { stream_id: String },
    /// Post a chat message to a channel.
    Chat {
        stream_id: String,
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        println!("{}", ClientConfig::default().to_toml()?);
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.inner.inner_host = host;
    }
    if let Some(login) = cli.login {
        config.inner.auth.login = login;
    }

    init_logging(&config.logging)?;
    info!("tvlink-client v{}", env!("CARGO_PKG_VERSION"));
    let login = config.inner.auth.login.clone();
    let (client, mut events, handle) = InnerClient::spawn(config.inner)?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("* {}", describe_event(&event));
        }
    });

    client.connect().await?;
    let outcome = run(&client, cli.action.unwrap_or(Action::Watch), login).await;

    client.shutdown().await;
    handle.await?;

    if let Err(e) = &outcome {
        error!("{e}");
    }
    outcome?;
    Ok(())
}

async fn run(client: &InnerClient, action: Action, login: String) -> Result<(), InnerError> {
    match action {
        Action::Watch => {
            info!("watching; press Ctrl-C to quit");
            tokio::signal::ctrl_c().await?;
        }
        Action::ServerInfo => {
            let info = client.request_server_info().await?;
            println!("{}", render(&info));
            // Give the bandwidth probe a chance to report.
            if !info.bandwidth_host.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
        }
        Action::Channels => {
            let channels = client.request_channels().await?;
            for channel in &channels.channels {
                println!("{:>6}  {}", channel.id, channel.name);
            }
            println!("{} channel(s)", channels.len());
        }
        Action::RuntimeInfo { stream_id } => {
            let info = client.request_runtime_channel_info(stream_id).await?;
            println!("{}", render(&info));
        }
        Action::Chat { stream_id, message } => {
            let msg = ChatMessage::new(stream_id, login, message.join(" "));
            client.post_message_to_chat(msg).await?;
            println!("message approved");
        }
    }
    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> std::io::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.file.is_empty() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}
