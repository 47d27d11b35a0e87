//! Transaction context extraction and validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GateConfig;
use crate::error::{GateError, GateResult};
use crate::host::CheckoutPage;

/// Context as read from the page or supplied by the caller, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTransactionContext {
    pub amount: f64,
    pub currency: String,
    /// `None` takes the configured merchant.
    #[serde(default)]
    pub merchant_id: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl RawTransactionContext {
    pub fn new(amount: f64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
            ..Self::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_merchant(mut self, merchant_id: impl Into<String>) -> Self {
        self.merchant_id = Some(merchant_id.into());
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Normalize and validate. Currency is upper-cased before the pattern check.
    pub fn validate(self, default_merchant: &str) -> GateResult<TransactionContext> {
        if !self.amount.is_finite() {
            return Err(GateError::validation("amount", "must be a finite number"));
        }
        if self.amount < 0.0 {
            return Err(GateError::validation("amount", "must not be negative"));
        }

        // Check the letters as typed; Unicode case mapping can change the length.
        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(GateError::validation(
                "currency",
                format!("'{}' is not a 3-letter currency code", self.currency),
            ));
        }
        let currency = currency.to_ascii_uppercase();

        let merchant_id = match self.merchant_id {
            Some(merchant) => merchant.trim().to_string(),
            None => default_merchant.trim().to_string(),
        };
        if merchant_id.is_empty() {
            return Err(GateError::validation("merchant_id", "must not be empty"));
        }

        Ok(TransactionContext {
            amount: self.amount,
            currency,
            merchant_id,
            email: self.email.trim().to_string(),
            timestamp: self.timestamp,
            device_id: non_blank(self.device_id),
            country: non_blank(self.country),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A validated transaction context. Only this type reaches the decision client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionContext {
    pub amount: f64,
    /// Upper-case ISO-4217 style code.
    pub currency: String,
    pub merchant_id: String,
    pub email: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub device_id: Option<String>,
    pub country: Option<String>,
}

impl TransactionContext {
    /// Same purchase, ignoring when it was observed.
    pub fn same_transaction(&self, other: &TransactionContext) -> bool {
        self.amount == other.amount
            && self.currency == other.currency
            && self.merchant_id == other.merchant_id
            && self.email == other.email
            && self.device_id == other.device_id
            && self.country == other.country
    }
}

/// Produce a validated context from an explicit argument or the configured provider.
pub fn extract_context(
    explicit: Option<RawTransactionContext>,
    config: &GateConfig,
    page: &dyn CheckoutPage,
) -> GateResult<TransactionContext> {
    let raw = match explicit {
        Some(raw) => raw,
        None => (config.context_provider)(page),
    };
    raw.validate(&config.merchant_id)
}
