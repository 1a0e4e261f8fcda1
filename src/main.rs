//! Tradovate copy-trading CLI.
//!
//! Mirrors open positions from a master brokerage account onto a follower
//! account, scaled by a configurable ratio.

mod api;
mod engine;
mod models;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::{AuthMethod, BrokerClient, SessionConfig, DEFAULT_API_BASE};
use crate::engine::{Broker, EngineConfig, EngineStatus, SidePolicy, SyncEngine};
use crate::models::{AccountSnapshot, Position};

/// Copy-trading CLI.
#[derive(Parser)]
#[command(name = "tradocopier")]
#[command(about = "Mirror open positions from a master brokerage account onto a follower", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the synchronization loop
    Run {
        #[command(flatten)]
        accounts: AccountArgs,

        /// Scale factor applied to master quantities
        #[arg(short, long, default_value = "1.0")]
        ratio: f64,

        /// Polling interval in seconds
        #[arg(short, long, default_value = "10")]
        interval: u64,

        /// Compute and log corrective orders without submitting them
        #[arg(long)]
        dry_run: bool,

        /// Flip the order side when the follower must reduce exposure
        #[arg(long)]
        sign_aware: bool,
    },

    /// Authenticate both sessions and print the resolved account ids
    Check {
        #[command(flatten)]
        accounts: AccountArgs,
    },
}

/// Connection settings for the two accounts. Secrets are usually supplied
/// via environment (or a .env file) rather than argv.
#[derive(Args)]
struct AccountArgs {
    /// Brokerage API base URL
    #[arg(long, env = "COPIER_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,

    /// Master pre-issued access token
    #[arg(long, env = "COPIER_MASTER_TOKEN")]
    master_token: Option<String>,

    /// Master API key (exchanged for a bearer token)
    #[arg(long, env = "COPIER_MASTER_API_KEY")]
    master_api_key: Option<String>,

    /// Master account username
    #[arg(long, env = "COPIER_MASTER_NAME")]
    master_name: Option<String>,

    /// Master account password
    #[arg(long, env = "COPIER_MASTER_PASSWORD")]
    master_password: Option<String>,

    /// Follower pre-issued access token
    #[arg(long, env = "COPIER_FOLLOWER_TOKEN")]
    follower_token: Option<String>,

    /// Follower API key (exchanged for a bearer token)
    #[arg(long, env = "COPIER_FOLLOWER_API_KEY")]
    follower_api_key: Option<String>,

    /// Follower account username
    #[arg(long, env = "COPIER_FOLLOWER_NAME")]
    follower_name: Option<String>,

    /// Follower account password
    #[arg(long, env = "COPIER_FOLLOWER_PASSWORD")]
    follower_password: Option<String>,
}

impl AccountArgs {
    fn master_config(&self) -> Result<SessionConfig> {
        let auth = Self::pick_auth(
            "master",
            &self.master_token,
            &self.master_api_key,
            &self.master_name,
            &self.master_password,
        )?;
        Ok(SessionConfig::new(auth).with_base_url(&self.api_base))
    }

    fn follower_config(&self) -> Result<SessionConfig> {
        let auth = Self::pick_auth(
            "follower",
            &self.follower_token,
            &self.follower_api_key,
            &self.follower_name,
            &self.follower_password,
        )?;
        Ok(SessionConfig::new(auth).with_base_url(&self.api_base))
    }

    fn pick_auth(
        role: &str,
        token: &Option<String>,
        api_key: &Option<String>,
        name: &Option<String>,
        password: &Option<String>,
    ) -> Result<AuthMethod> {
        if let Some(token) = token {
            return Ok(AuthMethod::AccessToken(token.clone()));
        }
        if let Some(key) = api_key {
            return Ok(AuthMethod::ApiKey(key.clone()));
        }
        if let (Some(name), Some(password)) = (name, password) {
            return Ok(AuthMethod::Credentials {
                name: name.clone(),
                password: password.clone(),
            });
        }
        anyhow::bail!(
            "no {role} credentials configured: supply an access token, an API key, \
             or a username and password"
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging; RUST_LOG takes precedence over --log-level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            accounts,
            ratio,
            interval,
            dry_run,
            sign_aware,
        } => {
            let master: Arc<dyn Broker> =
                Arc::new(BrokerClient::new(accounts.master_config()?)?);
            let follower: Arc<dyn Broker> =
                Arc::new(BrokerClient::new(accounts.follower_config()?)?);

            let config = EngineConfig {
                ratio,
                poll_interval: Duration::from_secs(interval.max(1)),
                side_policy: if sign_aware {
                    SidePolicy::SignAware
                } else {
                    SidePolicy::MirrorMaster
                },
                dry_run,
                ..EngineConfig::default()
            };

            let mut engine = SyncEngine::new(config);
            engine.start(master, follower).await?;

            println!("Copy trading running (Ctrl-C to stop)");

            let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
            ticker.tick().await; // first tick is immediate
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = ticker.tick() => print_status(&engine.status().await),
                }
            }

            info!("Shutdown signal received");
            engine.stop().await;
            print_status(&engine.status().await);
        }

        Commands::Check { accounts } => {
            let master = BrokerClient::new(accounts.master_config()?)?;
            let follower = BrokerClient::new(accounts.follower_config()?)?;

            check_connection("master", &master).await?;
            check_connection("follower", &follower).await?;
        }
    }

    Ok(())
}

/// Preflight one connection: authenticate and resolve the account id.
async fn check_connection(role: &str, client: &BrokerClient) -> Result<()> {
    client
        .authenticate()
        .await
        .with_context(|| format!("{role} authentication failed"))?;

    match client.resolve_account_id().await {
        Some(id) => {
            println!("{role}: authenticated, account {id}");
            Ok(())
        }
        None => anyhow::bail!("{role}: authenticated but no account returned"),
    }
}

fn print_status(status: &EngineStatus) {
    println!("\n=== Copier Status ===");
    println!("Running:            {}", status.running);
    println!(
        "Master positions:   {}",
        format_positions(&status.positions.master)
    );
    println!(
        "Follower positions: {}",
        format_positions(&status.positions.follower)
    );
    println!(
        "Master balance:     {}",
        format_balance(&status.balance.master)
    );
    println!(
        "Follower balance:   {}",
        format_balance(&status.balance.follower)
    );

    if !status.logs.is_empty() {
        println!("Recent activity:");
        for entry in &status.logs {
            println!(
                "  [{}] {}",
                entry.timestamp.format("%H:%M:%S"),
                entry.message
            );
        }
    }
}

fn format_positions(positions: &[Position]) -> String {
    if positions.is_empty() {
        return "(none)".to_string();
    }
    positions
        .iter()
        .map(|p| format!("{} {} x{}", p.symbol, p.side, p.quantity))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_balance(snapshot: &AccountSnapshot) -> String {
    let summary = match snapshot.fetched_at {
        None => "(not fetched yet)".to_string(),
        Some(at) => format!(
            "{} fields as of {}",
            snapshot.fields.len(),
            at.format("%H:%M:%S")
        ),
    };
    if snapshot.stale {
        format!("{summary} [stale]")
    } else {
        summary
    }
}
