//! Configuration discovery.
//!
//! Settings can come from a TOML file or from `data-*` attribute pairs (the way a
//! script tag would carry them). Discovery is separate from the gate: a host reads
//! settings, turns them into a [`GateConfig`], attaches providers, and initializes.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{DecisionFailurePolicy, EnforceMode, GateConfig};
use crate::error::{GateError, GateResult};

/// Serializable subset of [`GateConfig`]. Absent fields keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateSettings {
    pub api_base_url: Option<String>,
    pub merchant_id: Option<String>,
    pub form_selector: Option<String>,
    pub hidden_field_name: Option<String>,
    pub enforce_mode: Option<EnforceMode>,
    pub headers: BTreeMap<String, String>,
    pub resend_cooldown_ms: Option<u64>,
    pub challenge_ttl_seconds: Option<u64>,
    pub decision_failure_policy: Option<DecisionFailurePolicy>,
    pub resubmit_on_verify: Option<bool>,
    pub request_timeout_ms: Option<u64>,
}

impl GateSettings {
    /// Load from a TOML file. A missing file yields empty settings.
    pub fn load(path: &Path) -> GateResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no settings file; using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GateError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> GateResult<Self> {
        toml::from_str(contents).map_err(|e| GateError::Configuration(e.to_string()))
    }

    /// Read `data-*` attributes. Unrelated attributes are ignored.
    pub fn from_attributes<I, K, V>(attributes: I) -> GateResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Self::default();
        for (key, value) in attributes {
            let value = value.as_ref().trim();
            match key.as_ref() {
                "data-api-base-url" => settings.api_base_url = Some(value.to_string()),
                "data-merchant-id" => settings.merchant_id = Some(value.to_string()),
                "data-form-selector" => settings.form_selector = Some(value.to_string()),
                "data-hidden-field-name" => settings.hidden_field_name = Some(value.to_string()),
                "data-enforce-mode" => settings.enforce_mode = Some(value.parse()?),
                "data-decision-failure-policy" => {
                    settings.decision_failure_policy = Some(value.parse()?)
                }
                "data-resend-cooldown-ms" => {
                    settings.resend_cooldown_ms = Some(parse_number(key.as_ref(), value)?)
                }
                "data-challenge-ttl-seconds" => {
                    settings.challenge_ttl_seconds = Some(parse_number(key.as_ref(), value)?)
                }
                "data-request-timeout-ms" => {
                    settings.request_timeout_ms = Some(parse_number(key.as_ref(), value)?)
                }
                "data-resubmit-on-verify" => {
                    settings.resubmit_on_verify = Some(parse_bool(key.as_ref(), value)?)
                }
                _ => {}
            }
        }
        Ok(settings)
    }

    /// Overlay `other` on top of `self`; values present in `other` win.
    pub fn merge(mut self, other: GateSettings) -> Self {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        overlay!(
            api_base_url,
            merchant_id,
            form_selector,
            hidden_field_name,
            enforce_mode,
            resend_cooldown_ms,
            challenge_ttl_seconds,
            decision_failure_policy,
            resubmit_on_verify,
            request_timeout_ms
        );
        self.headers.extend(other.headers);
        self
    }

    /// Build a validated [`GateConfig`] with default providers.
    pub fn into_config(self) -> GateResult<GateConfig> {
        let api_base_url = self
            .api_base_url
            .ok_or_else(|| GateError::Configuration("api_base_url is required".into()))?;
        let merchant_id = self
            .merchant_id
            .ok_or_else(|| GateError::Configuration("merchant_id is required".into()))?;

        let mut config = GateConfig::new(api_base_url, merchant_id);
        config.form_selector = self.form_selector;
        if let Some(name) = self.hidden_field_name {
            config.hidden_field_name = name;
        }
        if let Some(mode) = self.enforce_mode {
            config.enforce_mode = mode;
        }
        config.headers = self.headers;
        if let Some(ms) = self.resend_cooldown_ms {
            config.resend_cooldown = Duration::from_millis(ms);
        }
        if let Some(secs) = self.challenge_ttl_seconds {
            config.challenge_ttl = Duration::from_secs(secs);
        }
        if let Some(policy) = self.decision_failure_policy {
            config.decision_failure_policy = policy;
        }
        if let Some(resubmit) = self.resubmit_on_verify {
            config.resubmit_on_verify = resubmit;
        }
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_number(key: &str, value: &str) -> GateResult<u64> {
    value
        .parse()
        .map_err(|_| GateError::Configuration(format!("{} must be a whole number, got '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> GateResult<bool> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(GateError::Configuration(format!(
            "{} must be true or false, got '{}'",
            key, value
        ))),
    }
}
