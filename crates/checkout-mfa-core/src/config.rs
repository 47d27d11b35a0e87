use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::RawTransactionContext;
use crate::error::{GateError, GateResult};
use crate::host::CheckoutPage;

pub const DEFAULT_HIDDEN_FIELD_NAME: &str = "mfa_token";
pub const DEFAULT_RESEND_COOLDOWN: Duration = Duration::from_millis(30_000);
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(300);
/// Longest challenge lifetime a configuration may ask for.
pub const MAX_CHALLENGE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// User identifier sent when the page exposes no email.
pub const GUEST_USER_ID: &str = "guest";

/// Resolves the user identifier sent with decision and verify requests.
pub type UserIdProvider = Arc<dyn Fn(&dyn CheckoutPage) -> String + Send + Sync>;

/// Produces an unvalidated transaction context from the page.
pub type ContextProvider = Arc<dyn Fn(&dyn CheckoutPage) -> RawTransactionContext + Send + Sync>;

/// How verification is enforced on the released submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnforceMode {
    /// UI-only: the challenge is shown, nothing is attached to the form.
    Client,
    /// The verification token is written into the hidden field before release.
    #[default]
    TokenRequired,
}

impl EnforceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::TokenRequired => "token-required",
        }
    }
}

impl fmt::Display for EnforceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnforceMode {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "client" => Ok(Self::Client),
            "token-required" => Ok(Self::TokenRequired),
            other => Err(GateError::Configuration(format!(
                "unknown enforce mode '{}' (expected 'client' or 'token-required')",
                other
            ))),
        }
    }
}

/// What the submission guard does when the decision call itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionFailurePolicy {
    /// Keep the submission blocked and show an inline notice.
    #[default]
    FailClosed,
    /// Log and let the native submission continue.
    FailOpen,
}

impl FromStr for DecisionFailurePolicy {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fail-closed" => Ok(Self::FailClosed),
            "fail-open" => Ok(Self::FailOpen),
            other => Err(GateError::Configuration(format!(
                "unknown decision failure policy '{}' (expected 'fail-closed' or 'fail-open')",
                other
            ))),
        }
    }
}

/// Gate configuration. Immutable once the gate is initialized.
#[derive(Clone)]
pub struct GateConfig {
    /// Base address of the decision/verification service, without trailing slash.
    pub api_base_url: String,
    pub merchant_id: String,
    /// Selector of the checkout form. `None` leaves interception inert.
    pub form_selector: Option<String>,
    pub hidden_field_name: String,
    pub enforce_mode: EnforceMode,
    pub user_id_provider: UserIdProvider,
    pub context_provider: ContextProvider,
    /// Extra request headers. Never override the merchant header.
    pub headers: BTreeMap<String, String>,
    pub resend_cooldown: Duration,
    pub challenge_ttl: Duration,
    pub decision_failure_policy: DecisionFailurePolicy,
    /// Re-trigger native submission of the intercepted form once verified.
    pub resubmit_on_verify: bool,
    pub request_timeout: Duration,
}

impl GateConfig {
    pub fn new(api_base_url: impl Into<String>, merchant_id: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim().trim_end_matches('/').to_string(),
            merchant_id: merchant_id.into().trim().to_string(),
            form_selector: None,
            hidden_field_name: DEFAULT_HIDDEN_FIELD_NAME.to_string(),
            enforce_mode: EnforceMode::default(),
            user_id_provider: Arc::new(default_user_id),
            context_provider: Arc::new(default_context),
            headers: BTreeMap::new(),
            resend_cooldown: DEFAULT_RESEND_COOLDOWN,
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
            decision_failure_policy: DecisionFailurePolicy::default(),
            resubmit_on_verify: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_form_selector(mut self, selector: impl Into<String>) -> Self {
        self.form_selector = Some(selector.into());
        self
    }

    pub fn with_enforce_mode(mut self, mode: EnforceMode) -> Self {
        self.enforce_mode = mode;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_user_id_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn(&dyn CheckoutPage) -> String + Send + Sync + 'static,
    {
        self.user_id_provider = Arc::new(provider);
        self
    }

    pub fn with_context_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn(&dyn CheckoutPage) -> RawTransactionContext + Send + Sync + 'static,
    {
        self.context_provider = Arc::new(provider);
        self
    }

    pub fn with_decision_failure_policy(mut self, policy: DecisionFailurePolicy) -> Self {
        self.decision_failure_policy = policy;
        self
    }

    /// Reject configurations the gate cannot run with.
    pub fn validate(&self) -> GateResult<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(GateError::Configuration("api_base_url is required".into()));
        }
        if self.merchant_id.trim().is_empty() {
            return Err(GateError::Configuration("merchant_id is required".into()));
        }
        if self.hidden_field_name.trim().is_empty() {
            return Err(GateError::Configuration(
                "hidden_field_name must not be empty".into(),
            ));
        }
        if matches!(&self.form_selector, Some(selector) if selector.trim().is_empty()) {
            return Err(GateError::Configuration(
                "form_selector must not be blank when set".into(),
            ));
        }
        if self.challenge_ttl.is_zero() {
            return Err(GateError::Configuration(
                "challenge_ttl must be greater than zero".into(),
            ));
        }
        if self.challenge_ttl > MAX_CHALLENGE_TTL {
            return Err(GateError::Configuration(format!(
                "challenge_ttl must not exceed {}s",
                MAX_CHALLENGE_TTL.as_secs()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for GateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateConfig")
            .field("api_base_url", &self.api_base_url)
            .field("merchant_id", &self.merchant_id)
            .field("form_selector", &self.form_selector)
            .field("hidden_field_name", &self.hidden_field_name)
            .field("enforce_mode", &self.enforce_mode)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("resend_cooldown", &self.resend_cooldown)
            .field("challenge_ttl", &self.challenge_ttl)
            .field("decision_failure_policy", &self.decision_failure_policy)
            .field("resubmit_on_verify", &self.resubmit_on_verify)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

fn email_field(page: &dyn CheckoutPage) -> Option<String> {
    page.field("email")
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_user_id(page: &dyn CheckoutPage) -> String {
    email_field(page).unwrap_or_else(|| GUEST_USER_ID.to_string())
}

fn default_context(page: &dyn CheckoutPage) -> RawTransactionContext {
    // Unparseable amounts become NaN so validation reports them.
    let amount = match page.field("amount") {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => 0.0,
    };
    let currency = page
        .field("currency")
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "USD".to_string())
        .to_ascii_uppercase();

    RawTransactionContext {
        amount,
        currency,
        email: email_field(page).unwrap_or_default(),
        ..RawTransactionContext::default()
    }
}
