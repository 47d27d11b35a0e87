//! Subcommand handlers

use std::sync::Arc;

use anyhow::bail;
use clap::Args;
use colored::*;
use dialoguer::Input;

use checkout_mfa_core::{
    CodeOutcome, DecisionClient, DismissReason, EnforceMode, GateConfig, GateHost, MfaGate,
    RawTransactionContext, ResendOutcome, VerifiedToken, GUEST_USER_ID,
};
use checkout_mfa_http::HttpMfaService;

use crate::terminal::TerminalRenderer;

/// Typed at the code prompt to ask for a new code.
const RESEND_COMMAND: &str = "resend";

/// Transaction to gate.
#[derive(Args, Debug, Clone)]
pub struct TransactionArgs {
    /// Transaction amount
    #[arg(long, allow_negative_numbers = true)]
    amount: f64,

    /// ISO-4217 currency code
    #[arg(long, default_value = "USD")]
    currency: String,

    /// Customer email
    #[arg(long, default_value = "")]
    email: String,

    /// User identifier (defaults to the email, then "guest")
    #[arg(long)]
    user_id: Option<String>,

    /// Device identifier
    #[arg(long)]
    device_id: Option<String>,

    /// Country code
    #[arg(long)]
    country: Option<String>,
}

impl TransactionArgs {
    fn user_id(&self) -> String {
        match &self.user_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ if !self.email.trim().is_empty() => self.email.trim().to_string(),
            _ => GUEST_USER_ID.to_string(),
        }
    }

    fn raw_context(&self) -> RawTransactionContext {
        let mut raw =
            RawTransactionContext::new(self.amount, self.currency.as_str()).with_email(self.email.as_str());
        if let Some(device) = &self.device_id {
            raw = raw.with_device(device.as_str());
        }
        if let Some(country) = &self.country {
            raw = raw.with_country(country.as_str());
        }
        raw
    }
}

/// Print the service's decision for one transaction.
pub async fn check(config: GateConfig, args: TransactionArgs) -> anyhow::Result<()> {
    let context = args.raw_context().validate(&config.merchant_id)?;
    let service = Arc::new(HttpMfaService::new(&config)?);
    let decision = DecisionClient::new(service)
        .decide(&context, &args.user_id())
        .await?;

    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

/// Gate one checkout: decide, then prompt for codes until verified or cancelled.
pub async fn checkout(config: GateConfig, args: TransactionArgs) -> anyhow::Result<()> {
    let user_id = args.user_id();
    let config = config.with_user_id_provider(move |_| user_id.clone());
    let service = Arc::new(HttpMfaService::new(&config)?);
    let gate = MfaGate::initialize(config, service, GateHost::new(Arc::new(TerminalRenderer)))?;

    let evaluation = gate.evaluate(Some(args.raw_context())).await?;
    let Some(handle) = evaluation.challenge else {
        println!("{} No verification required; checkout proceeds", "✓".green());
        return Ok(());
    };

    println!(
        "{}",
        format!("Enter the code, '{}' for a new one, or nothing to cancel.", RESEND_COMMAND).dimmed()
    );

    loop {
        let code: String = Input::new()
            .with_prompt("Verification code")
            .allow_empty(true)
            .interact_text()?;
        let code = code.trim();

        if code.is_empty() {
            gate.dismiss(handle, DismissReason::CancelKey);
            bail!("checkout cancelled; the transaction still requires verification");
        }

        if code.eq_ignore_ascii_case(RESEND_COMMAND) {
            if let ResendOutcome::Accepted { expires_in } = gate.resend_code(handle) {
                println!(
                    "{} New code requested; it expires in {}s",
                    "→".cyan(),
                    expires_in.as_secs()
                );
            }
            continue;
        }

        match gate.submit_code(handle, code).await {
            CodeOutcome::Verified(token) => {
                println!("{} Checkout released", "✓".green());
                if gate.config().enforce_mode == EnforceMode::TokenRequired {
                    let kind = match token {
                        VerifiedToken::Token(_) => "service token",
                        VerifiedToken::Marker => "verification marker",
                    };
                    println!("  {} goes in '{}'", kind, gate.config().hidden_field_name);
                }
                return Ok(());
            }
            CodeOutcome::Expired => {
                bail!("the verification window expired; run checkout again")
            }
            CodeOutcome::Retry(_) | CodeOutcome::EmptyCode | CodeOutcome::Ignored => continue,
        }
    }
}
