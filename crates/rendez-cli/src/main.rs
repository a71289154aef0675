//! `rendez` - run a rendezvous relay and manage its access keys.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rendez_keystore::{AclDecision, AclRule, KeyStore, KeyStoreAuthority};
use rendez_router::{AllowAll, Authority, Router, RouterOptions};
use tracing::{info, warn};

use config::RelayConfig;

#[derive(Parser)]
#[command(
    name = "rendez",
    version,
    about = "TCP rendezvous relay for channel-addressed connections"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay.
    Serve {
        /// Path to the JSON configuration file.
        #[arg(long)]
        config: PathBuf,
    },
    /// Manage access-control keys.
    #[command(subcommand)]
    Token(TokenCommand),
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Generate a key and print it once; it is never recoverable later.
    New {
        #[arg(long)]
        config: PathBuf,
        /// Identifier recorded next to the key.
        #[arg(long)]
        name: String,
        /// Channel regexp the key may listen on.
        #[arg(long)]
        listen: Option<String>,
        /// Channel regexp the key may dial.
        #[arg(long)]
        invoke: Option<String>,
        /// Validity in days.
        #[arg(long, default_value_t = 90)]
        days: i64,
    },
    /// Drop expired keys from the store.
    Cleanup {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config } => serve(&config).await,
        Command::Token(command) => token(command),
    }
}

async fn serve(config_path: &Path) -> Result<()> {
    let config = RelayConfig::load(config_path)?;

    let authority: Arc<dyn Authority> = match &config.token_file {
        Some(path) => {
            let store = Arc::new(config::create_or_load_keystore(path)?);
            info!(keys = store.len(), "access control enabled");
            Arc::new(KeyStoreAuthority::new(store))
        }
        None => {
            warn!("no token-file configured, every peer is allowed");
            Arc::new(AllowAll)
        }
    };

    let options = RouterOptions {
        authority,
        tls: config.tls_acceptor()?,
        ..RouterOptions::default()
    };
    let router = Arc::new(Router::new(options));
    info!(addr = %config.router_address, tls = config.enable_tls, "starting relay");
    router
        .listen_and_serve(&config.router_address)
        .await
        .context("relay terminated")?;
    Ok(())
}

fn token(command: TokenCommand) -> Result<()> {
    match command {
        TokenCommand::New {
            config,
            name,
            listen,
            invoke,
            days,
        } => {
            let config = RelayConfig::load(&config)?;
            let path = config
                .token_file
                .context("config names no token-file to store keys in")?;
            let store = config::create_or_load_keystore(&path)?;

            let mut rules = Vec::new();
            if let Some(pattern) = listen {
                rules.push(AclRule {
                    listen: AclDecision::Allow,
                    invoke: AclDecision::Undefined,
                    channel_regexp: pattern,
                });
            }
            if let Some(pattern) = invoke {
                rules.push(AclRule {
                    listen: AclDecision::Undefined,
                    invoke: AclDecision::Allow,
                    channel_regexp: pattern,
                });
            }
            if rules.is_empty() {
                warn!("key has no rules and will be denied everywhere");
            }

            let token = store.generate_key(&name, rules, chrono::Duration::days(days))?;
            store.save(&path)?;
            println!("{token}");
            Ok(())
        }
        TokenCommand::Cleanup { config } => {
            let config = RelayConfig::load(&config)?;
            let path = config
                .token_file
                .context("config names no token-file to clean up")?;
            let store = KeyStore::load(&path)?;
            let before = store.len();
            store.cleanup();
            store.save(&path)?;
            println!("removed {} expired keys", before - store.len());
            Ok(())
        }
    }
}
