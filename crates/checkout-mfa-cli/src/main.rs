//! checkout-mfa - terminal host for the Checkout MFA Gate
//!
//! - `check` asks the MFA service for a decision and prints it as JSON
//! - `checkout` runs a full gated checkout, prompting for the verification code

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use checkout_mfa_core::{EnforceMode, GateConfig, GateSettings};

mod commands;
mod terminal;

use commands::TransactionArgs;

#[derive(Parser)]
#[command(name = "checkout-mfa")]
#[command(about = "Step-up verification for checkout submissions", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, env = "CHECKOUT_MFA_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Base URL of the MFA service
    #[arg(long, env = "CHECKOUT_MFA_API_BASE_URL", global = true)]
    api_base_url: Option<String>,

    /// Merchant identifier sent with every request
    #[arg(long, env = "CHECKOUT_MFA_MERCHANT_ID", global = true)]
    merchant_id: Option<String>,

    /// Enforcement mode (client, token-required)
    #[arg(long, env = "CHECKOUT_MFA_ENFORCE_MODE", global = true)]
    enforce_mode: Option<EnforceMode>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the MFA service whether a transaction needs verification
    Check(TransactionArgs),

    /// Run a gated checkout and prompt for the verification code
    Checkout(TransactionArgs),
}

impl Cli {
    /// File settings overlaid with flags and environment.
    fn gate_config(&self) -> anyhow::Result<GateConfig> {
        let file = match &self.config {
            Some(path) => GateSettings::load(path)?,
            None => GateSettings::default(),
        };
        let flags = GateSettings {
            api_base_url: self.api_base_url.clone(),
            merchant_id: self.merchant_id.clone(),
            enforce_mode: self.enforce_mode,
            ..GateSettings::default()
        };
        Ok(file.merge(flags).into_config()?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    let config = cli.gate_config()?;

    match cli.command {
        Commands::Check(args) => commands::check(config, args).await,
        Commands::Checkout(args) => commands::checkout(config, args).await,
    }
}
