//! HTTP transport for the MFA decision and verification service.
//!
//! [`HttpMfaService`] implements [`MfaService`] over JSON `POST`s to
//! `{api_base_url}/api/check_mfa` and `{api_base_url}/api/verify_mfa`. Every
//! request carries `Content-Type: application/json` and the merchant header;
//! configured extra headers are sent too but can never replace those two.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use checkout_mfa_core::{
    DecisionRequest, DecisionResponse, GateConfig, GateError, GateResult, MfaService,
    VerifyRequest, VerifyResponse, CHECK_MFA_PATH, MERCHANT_HEADER, VERIFY_MFA_PATH,
};

/// MFA service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMfaService {
    client: Client,
    base_url: String,
}

impl HttpMfaService {
    /// Build a client for `config`. Invalid header names or values are
    /// configuration errors.
    pub fn new(config: &GateConfig) -> GateResult<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(default_headers(config)?)
            .build()
            .map_err(|e| GateError::Configuration(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> GateResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "POST");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(%url, error = %e, "MFA service request failed");
                GateError::Network(e.to_string())
            })?;
        handle_response(response).await
    }
}

#[async_trait]
impl MfaService for HttpMfaService {
    async fn check(&self, request: &DecisionRequest) -> GateResult<DecisionResponse> {
        self.post(CHECK_MFA_PATH, request).await
    }

    async fn verify(&self, request: &VerifyRequest) -> GateResult<VerifyResponse> {
        self.post(VERIFY_MFA_PATH, request).await
    }
}

/// Extra headers first, then the fixed ones so they always win.
fn default_headers(config: &GateConfig) -> GateResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| GateError::Configuration(format!("invalid header name '{}'", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| GateError::Configuration(format!("invalid value for header '{}'", name)))?;
        headers.insert(name, value);
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let merchant = HeaderValue::from_str(&config.merchant_id)
        .map_err(|_| GateError::Configuration("merchant_id is not a valid header value".into()))?;
    let merchant_header = HeaderName::from_bytes(MERCHANT_HEADER.as_bytes())
        .map_err(|_| GateError::Configuration(format!("invalid header name '{}'", MERCHANT_HEADER)))?;
    headers.insert(merchant_header, merchant);

    Ok(headers)
}

async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> GateResult<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| GateError::Network(e.to_string()))?;

    if !status.is_success() {
        return Err(GateError::Transport {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| {
        GateError::Serialization(format!("unexpected MFA service response: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GateConfig {
        GateConfig::new("http://127.0.0.1:5000/", "merchant_1")
    }

    #[test]
    fn merchant_header_overrides_extra_headers() {
        let config = config()
            .with_header("X-Merchant-Id", "someone-else")
            .with_header("Content-Type", "text/plain")
            .with_header("X-Client", "checkout-web");

        let headers = default_headers(&config).unwrap();
        assert_eq!(headers.get(MERCHANT_HEADER).unwrap(), "merchant_1");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get("x-client").unwrap(), "checkout-web");
    }

    #[test]
    fn invalid_header_name_is_a_configuration_error() {
        let err = default_headers(&config().with_header("bad header", "x")).unwrap_err();
        assert!(matches!(err, GateError::Configuration(msg) if msg.contains("bad header")));
    }

    #[test]
    fn base_url_has_no_trailing_slash() {
        let service = HttpMfaService::new(&config()).unwrap();
        assert_eq!(service.base_url(), "http://127.0.0.1:5000");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = HttpMfaService::new(&GateConfig::new("", "merchant_1")).unwrap_err();
        assert!(matches!(err, GateError::Configuration(_)));
    }
}
