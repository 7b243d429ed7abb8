//! cordwire-bot - a minimal gateway bot
//!
//! Connects with the configured token, sets its game and logs every gateway
//! event until interrupted or until reconnecting is given up.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use cordwire::{Client, ClientConfig, CordError, GatewayEvent};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "cordwire-bot")]
#[command(about = "Minimal cordwire gateway bot")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and log gateway events
    Run {
        /// Path to config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Bot token, overriding the config file
        #[arg(long, env = "CORDWIRE_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Game to show once connected
        #[arg(long)]
        game: Option<String>,

        /// Maximum reconnect attempts per window, overriding the config file
        #[arg(long)]
        max_reconnects: Option<usize>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "cordwire.json")]
        output: PathBuf,

        /// Token to put in the file
        #[arg(long, default_value = "YOUR_BOT_TOKEN")]
        token: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("cordwire=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            token,
            game,
            max_reconnects,
        } => {
            let mut config = load_config(config, token)?;
            if let Some(max) = max_reconnects {
                config.reconnect.max_attempts = max;
            }
            config.validate()?;
            run_bot(&config, game).await?;
        }

        Commands::InitConfig { output, token } => {
            init_config(&output, token)?;
        }
    }

    Ok(())
}

/// Read the config file if given, then apply the token override.
fn load_config(path: Option<PathBuf>, token: Option<String>) -> anyhow::Result<ClientConfig> {
    let mut config = match (path, token.as_deref()) {
        (Some(path), _) => ClientConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        (None, Some(token)) => ClientConfig::new(token),
        (None, None) => bail!("either --config or --token (or CORDWIRE_TOKEN) is required"),
    };
    if let Some(token) = token {
        config.token = token;
    }
    Ok(config)
}

async fn run_bot(config: &ClientConfig, game: Option<String>) -> anyhow::Result<()> {
    info!(gateway = %config.gateway_url, "starting cordwire-bot");

    let client = Client::new(config)?;
    let mut events = client.subscribe();
    if let Some(game) = game.as_deref() {
        // Carried by the identify; the handle is not needed.
        let _ = client.update_game(Some(game));
    }
    client.connect();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for ctrl-c")?;
                info!("interrupted, shutting down");
                client.shutdown().await;
                return Ok(());
            }
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("event stream closed");
                    return Ok(());
                };
                match event {
                    GatewayEvent::Ready { session_id } => {
                        info!(%session_id, servers = client.cache().servers().len(), "ready");
                    }
                    GatewayEvent::Resumed => info!("session resumed"),
                    GatewayEvent::Reconnecting { reason, delay, resume } => {
                        warn!(%reason, ?delay, resume, "reconnecting");
                    }
                    GatewayEvent::Dispatch { name, seq, .. } => {
                        info!(event = %name, ?seq, "dispatch");
                    }
                    GatewayEvent::Disconnected => {
                        info!("disconnected");
                        return Ok(());
                    }
                    GatewayEvent::FatallyDisconnected { attempts, window } => {
                        error!(attempts, ?window, "gave up reconnecting");
                        client.shutdown().await;
                        return Err(CordError::FatalDisconnect { attempts, window }.into());
                    }
                }
            }
        }
    }
}

fn init_config(output: &Path, token: String) -> anyhow::Result<()> {
    let config = ClientConfig::new(token);
    std::fs::write(output, config.to_json_pretty()?)
        .with_context(|| format!("writing {}", output.display()))?;

    println!("Config written to {}", output.display());
    println!();
    println!("Edit the file to add your bot token, then run:");
    println!("  cordwire-bot run --config {}", output.display());

    Ok(())
}
