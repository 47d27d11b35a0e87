//! HttpMfaService against an in-process MFA service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use checkout_mfa_core::mocks::RecordingRenderer;
use checkout_mfa_core::{
    CodeOutcome, DecisionRequest, GateConfig, GateError, GateHost, MfaGate, MfaService,
    RawTransactionContext, VerifiedToken, VerifyRequest,
};
use checkout_mfa_http::HttpMfaService;

#[derive(Debug, Clone)]
struct Recorded {
    path: &'static str,
    headers: HeaderMap,
    body: Value,
}

struct Backend {
    requests: Mutex<Vec<Recorded>>,
    check_reply: Mutex<(StatusCode, String)>,
    verify_reply: Mutex<(StatusCode, String)>,
}

impl Backend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            check_reply: Mutex::new((
                StatusCode::OK,
                json!({"require_mfa": true, "methods": ["otp", "sms"]}).to_string(),
            )),
            verify_reply: Mutex::new((
                StatusCode::OK,
                json!({"verified": true, "token": "tok-123"}).to_string(),
            )),
        })
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }
}

async fn check_mfa(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    backend.requests.lock().push(Recorded {
        path: "/api/check_mfa",
        headers,
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    });
    backend.check_reply.lock().clone()
}

async fn verify_mfa(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    backend.requests.lock().push(Recorded {
        path: "/api/verify_mfa",
        headers,
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    });
    backend.verify_reply.lock().clone()
}

async fn serve(backend: Arc<Backend>) -> SocketAddr {
    let app = Router::new()
        .route("/api/check_mfa", post(check_mfa))
        .route("/api/verify_mfa", post(verify_mfa))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config(addr: SocketAddr) -> GateConfig {
    GateConfig::new(format!("http://{}/", addr), "merchant_1")
}

fn decision_request() -> DecisionRequest {
    DecisionRequest {
        merchant_id: "merchant_1".into(),
        user_id: "user123".into(),
        amount: 100.0,
        currency: "USD".into(),
        timestamp: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        email: "demo@example.com".into(),
        device_id: None,
        country: Some("US".into()),
    }
}

#[tokio::test]
async fn check_posts_camel_case_json_with_merchant_header() {
    let backend = Backend::new();
    let addr = serve(backend.clone()).await;
    let service = HttpMfaService::new(&config(addr)).unwrap();

    let response = service.check(&decision_request()).await.unwrap();
    assert!(response.require_mfa);
    assert_eq!(
        response.methods,
        Some(vec!["otp".to_string(), "sms".to_string()])
    );

    let recorded = backend.requests();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].path, "/api/check_mfa");
    assert_eq!(recorded[0].headers["x-merchant-id"], "merchant_1");
    assert_eq!(recorded[0].headers["content-type"], "application/json");

    let body = &recorded[0].body;
    assert_eq!(body["merchantId"], "merchant_1");
    assert_eq!(body["userId"], "user123");
    assert_eq!(body["amount"], 100.0);
    assert_eq!(body["currency"], "USD");
    assert_eq!(body["email"], "demo@example.com");
    assert_eq!(body["country"], "US");
    assert!(body.get("deviceId").is_none());
    assert!(body["timestamp"].as_str().unwrap().starts_with("2026-01-02T03:04:05"));
}

#[tokio::test]
async fn extra_headers_cannot_replace_merchant_header() {
    let backend = Backend::new();
    let addr = serve(backend.clone()).await;
    let service = HttpMfaService::new(
        &config(addr)
            .with_header("X-Merchant-Id", "spoofed")
            .with_header("X-Client", "checkout-web"),
    )
    .unwrap();

    service.check(&decision_request()).await.unwrap();

    let headers = &backend.requests()[0].headers;
    let merchants: Vec<_> = headers.get_all("x-merchant-id").iter().collect();
    assert_eq!(merchants, vec!["merchant_1"]);
    assert_eq!(headers["x-client"], "checkout-web");
}

#[tokio::test]
async fn server_error_is_a_transport_error() {
    let backend = Backend::new();
    *backend.check_reply.lock() = (StatusCode::INTERNAL_SERVER_ERROR, "boom".into());
    let addr = serve(backend).await;
    let service = HttpMfaService::new(&config(addr)).unwrap();

    let err = service.check(&decision_request()).await.unwrap_err();
    assert_eq!(
        err,
        GateError::Transport {
            status: 500,
            body: "boom".into()
        }
    );
}

#[tokio::test]
async fn malformed_body_is_a_serialization_error() {
    let backend = Backend::new();
    *backend.check_reply.lock() = (StatusCode::OK, "<html>".into());
    let addr = serve(backend).await;
    let service = HttpMfaService::new(&config(addr)).unwrap();

    let err = service.check(&decision_request()).await.unwrap_err();
    assert!(matches!(err, GateError::Serialization(_)));
}

#[tokio::test]
async fn unreachable_service_is_a_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let service = HttpMfaService::new(&config(addr)).unwrap();
    let err = service.check(&decision_request()).await.unwrap_err();
    assert!(matches!(err, GateError::Network(_)));
}

#[tokio::test]
async fn verify_sends_user_and_code() {
    let backend = Backend::new();
    let addr = serve(backend.clone()).await;
    let service = HttpMfaService::new(&config(addr)).unwrap();

    let response = service
        .verify(&VerifyRequest {
            user_id: "user123".into(),
            otp: "123456".into(),
        })
        .await
        .unwrap();
    assert!(response.verified);
    assert_eq!(response.token.as_deref(), Some("tok-123"));

    let body = &backend.requests()[0].body;
    assert_eq!(body, &json!({"userId": "user123", "otp": "123456"}));
}

#[tokio::test]
async fn gate_runs_end_to_end_over_http() {
    let backend = Backend::new();
    let addr = serve(backend.clone()).await;
    let config = config(addr).with_user_id_provider(|_| "user123".to_string());
    let service = Arc::new(HttpMfaService::new(&config).unwrap());
    let renderer = Arc::new(RecordingRenderer::new());
    let gate = MfaGate::initialize(config, service, GateHost::new(renderer.clone())).unwrap();

    let evaluation = gate
        .evaluate(Some(
            RawTransactionContext::new(100.0, "usd").with_email("demo@example.com"),
        ))
        .await
        .unwrap();
    assert!(evaluation.challenge_required);
    assert_eq!(renderer.opened()[0].methods_label(), "otp, sms");

    let handle = evaluation.challenge.unwrap();
    let outcome = gate.submit_code(handle, "123456").await;
    assert_eq!(outcome, CodeOutcome::Verified(VerifiedToken::Token("tok-123".into())));
    assert!(!gate.is_flagged());

    let paths: Vec<_> = backend.requests().iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["/api/check_mfa", "/api/verify_mfa"]);
}
