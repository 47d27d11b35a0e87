//! Decision client and the wire contract of the MFA service.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::TransactionContext;
use crate::error::GateResult;

/// Method shown when the service requires a challenge but names none.
pub const DEFAULT_METHOD: &str = "otp";

pub const CHECK_MFA_PATH: &str = "/api/check_mfa";
pub const VERIFY_MFA_PATH: &str = "/api/verify_mfa";
/// Header identifying the merchant on every request.
pub const MERCHANT_HEADER: &str = "X-Merchant-Id";

/// Body of `POST /api/check_mfa`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub merchant_id: String,
    pub user_id: String,
    pub amount: f64,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl DecisionRequest {
    /// The caller's timestamp wins; otherwise the request is stamped now.
    pub fn from_context(context: &TransactionContext, user_id: impl Into<String>) -> Self {
        Self {
            merchant_id: context.merchant_id.clone(),
            user_id: user_id.into(),
            amount: context.amount,
            currency: context.currency.clone(),
            timestamp: context.timestamp.unwrap_or_else(Utc::now),
            email: context.email.clone(),
            device_id: context.device_id.clone(),
            country: context.country.clone(),
        }
    }
}

/// Response of `POST /api/check_mfa`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub require_mfa: bool,
    #[serde(default)]
    pub methods: Option<Vec<String>>,
}

impl DecisionResponse {
    pub fn challenge(methods: &[&str]) -> Self {
        Self {
            require_mfa: true,
            methods: Some(methods.iter().map(|m| m.to_string()).collect()),
        }
    }

    pub fn allow() -> Self {
        Self {
            require_mfa: false,
            methods: Some(Vec::new()),
        }
    }
}

/// Body of `POST /api/verify_mfa`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub user_id: String,
    pub otp: String,
}

impl fmt::Debug for VerifyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyRequest")
            .field("user_id", &self.user_id)
            .field("otp", &"<redacted>")
            .finish()
    }
}

/// Response of `POST /api/verify_mfa`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub verified: bool,
    /// Opaque proof of verification, when the service issues one.
    #[serde(default)]
    pub token: Option<String>,
}

/// Remote decision/verification service.
#[async_trait]
pub trait MfaService: Send + Sync {
    async fn check(&self, request: &DecisionRequest) -> GateResult<DecisionResponse>;

    async fn verify(&self, request: &VerifyRequest) -> GateResult<VerifyResponse>;
}

/// Whether a transaction needs a challenge, and with which methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub require_challenge: bool,
    /// Ordered method names. Never empty when `require_challenge` is set.
    pub methods: Vec<String>,
}

impl Decision {
    pub fn from_response(response: DecisionResponse) -> Self {
        let mut methods: Vec<String> = response
            .methods
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if response.require_mfa && methods.is_empty() {
            methods.push(DEFAULT_METHOD.to_string());
        }
        Self {
            require_challenge: response.require_mfa,
            methods,
        }
    }
}

/// Sends validated contexts to the service and normalizes the answer.
///
/// No retries. A failure is returned to the caller and never read as "no challenge".
#[derive(Clone)]
pub struct DecisionClient {
    service: Arc<dyn MfaService>,
}

impl DecisionClient {
    pub fn new(service: Arc<dyn MfaService>) -> Self {
        Self { service }
    }

    pub async fn decide(&self, context: &TransactionContext, user_id: &str) -> GateResult<Decision> {
        let request = DecisionRequest::from_context(context, user_id);
        debug!(
            merchant = %request.merchant_id,
            amount = request.amount,
            currency = %request.currency,
            "requesting MFA decision"
        );

        let response = self.service.check(&request).await.map_err(|err| {
            warn!(error = %err, "MFA decision request failed");
            err
        })?;
        let decision = Decision::from_response(response);

        info!(
            require_challenge = decision.require_challenge,
            methods = ?decision.methods,
            "MFA decision received"
        );
        Ok(decision)
    }

    pub fn service(&self) -> &Arc<dyn MfaService> {
        &self.service
    }
}
