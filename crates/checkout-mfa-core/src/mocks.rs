//! In-memory collaborators for tests and demos.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::decision::{DecisionRequest, DecisionResponse, MfaService, VerifyRequest, VerifyResponse};
use crate::error::GateResult;
use crate::host::{ChallengeHandle, ChallengeRenderer, ChallengeView, CheckoutForm, CheckoutPage};

/// Scripted MFA service.
///
/// Queued responses are served first; once a queue is empty the default answers.
/// Defaults: no challenge required, every code verifies without a token.
pub struct MockMfaService {
    decisions: Mutex<VecDeque<GateResult<DecisionResponse>>>,
    default_decision: Mutex<GateResult<DecisionResponse>>,
    verifications: Mutex<VecDeque<GateResult<VerifyResponse>>>,
    default_verification: Mutex<GateResult<VerifyResponse>>,
    check_requests: Mutex<Vec<DecisionRequest>>,
    verify_requests: Mutex<Vec<VerifyRequest>>,
    latency: Mutex<Duration>,
}

impl MockMfaService {
    pub fn new() -> Self {
        Self {
            decisions: Mutex::new(VecDeque::new()),
            default_decision: Mutex::new(Ok(DecisionResponse::allow())),
            verifications: Mutex::new(VecDeque::new()),
            default_verification: Mutex::new(Ok(VerifyResponse {
                verified: true,
                token: None,
            })),
            check_requests: Mutex::new(Vec::new()),
            verify_requests: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Service that requires a challenge with `methods` for every transaction.
    pub fn requiring(methods: &[&str]) -> Self {
        let service = Self::new();
        *service.default_decision.lock() = Ok(DecisionResponse::challenge(methods));
        service
    }

    /// Delay every call by `latency` (use with a paused tokio clock).
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    pub fn set_default_decision(&self, response: GateResult<DecisionResponse>) {
        *self.default_decision.lock() = response;
    }

    pub fn set_default_verification(&self, response: GateResult<VerifyResponse>) {
        *self.default_verification.lock() = response;
    }

    pub fn push_decision(&self, response: GateResult<DecisionResponse>) {
        self.decisions.lock().push_back(response);
    }

    pub fn push_verification(&self, response: GateResult<VerifyResponse>) {
        self.verifications.lock().push_back(response);
    }

    pub fn check_requests(&self) -> Vec<DecisionRequest> {
        self.check_requests.lock().clone()
    }

    pub fn verify_requests(&self) -> Vec<VerifyRequest> {
        self.verify_requests.lock().clone()
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MockMfaService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MfaService for MockMfaService {
    async fn check(&self, request: &DecisionRequest) -> GateResult<DecisionResponse> {
        self.check_requests.lock().push(request.clone());
        self.delay().await;
        let queued = self.decisions.lock().pop_front();
        queued.unwrap_or_else(|| self.default_decision.lock().clone())
    }

    async fn verify(&self, request: &VerifyRequest) -> GateResult<VerifyResponse> {
        self.verify_requests.lock().push(request.clone());
        self.delay().await;
        let queued = self.verifications.lock().pop_front();
        queued.unwrap_or_else(|| self.default_verification.lock().clone())
    }
}

/// One renderer call.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    Open(ChallengeView),
    Error { handle: ChallengeHandle, message: String },
    Close(ChallengeHandle),
    Success,
    Notice(String),
}

/// Renderer that records every call.
#[derive(Default)]
pub struct RecordingRenderer {
    calls: Mutex<Vec<RenderCall>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().clone()
    }

    pub fn opened(&self) -> Vec<ChallengeView> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RenderCall::Open(view) => Some(view.clone()),
                _ => None,
            })
            .collect()
    }

    /// Surfaces opened and not yet closed.
    pub fn visible(&self) -> Vec<ChallengeHandle> {
        let mut visible = Vec::new();
        for call in self.calls.lock().iter() {
            match call {
                RenderCall::Open(view) => visible.push(view.handle),
                RenderCall::Close(handle) => visible.retain(|h| h != handle),
                _ => {}
            }
        }
        visible
    }

    pub fn errors(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RenderCall::Error { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RenderCall::Notice(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn success_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, RenderCall::Success))
            .count()
    }
}

impl ChallengeRenderer for RecordingRenderer {
    fn open(&self, view: &ChallengeView) {
        self.calls.lock().push(RenderCall::Open(view.clone()));
    }

    fn show_error(&self, handle: ChallengeHandle, message: &str) {
        self.calls.lock().push(RenderCall::Error {
            handle,
            message: message.to_string(),
        });
    }

    fn close(&self, handle: ChallengeHandle) {
        self.calls.lock().push(RenderCall::Close(handle));
    }

    fn show_success(&self) {
        self.calls.lock().push(RenderCall::Success);
    }

    fn show_notice(&self, message: &str) {
        self.calls.lock().push(RenderCall::Notice(message.to_string()));
    }
}

/// Form that records hidden fields and re-submissions.
pub struct MockForm {
    id: String,
    selector: String,
    hidden: Mutex<BTreeMap<String, String>>,
    submissions: AtomicUsize,
}

impl MockForm {
    pub fn new(id: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            selector: selector.into(),
            hidden: Mutex::new(BTreeMap::new()),
            submissions: AtomicUsize::new(0),
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn hidden_field(&self, name: &str) -> Option<String> {
        self.hidden.lock().get(name).cloned()
    }

    pub fn submit_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

impl CheckoutForm for MockForm {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn set_hidden_field(&self, name: &str, value: &str) {
        self.hidden
            .lock()
            .insert(name.to_string(), value.to_string());
    }

    fn submit(&self) {
        self.submissions.fetch_add(1, Ordering::SeqCst);
    }
}

/// Page backed by a field map and a list of forms.
#[derive(Default)]
pub struct MockPage {
    fields: RwLock<BTreeMap<String, String>>,
    forms: Vec<Arc<MockForm>>,
}

impl MockPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(self, name: &str, value: &str) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn with_form(mut self, form: Arc<MockForm>) -> Self {
        self.forms.push(form);
        self
    }

    pub fn set_field(&self, name: &str, value: &str) {
        self.fields
            .write()
            .insert(name.to_string(), value.to_string());
    }
}

impl CheckoutPage for MockPage {
    fn field(&self, name: &str) -> Option<String> {
        self.fields.read().get(name).cloned()
    }

    fn forms(&self, selector: &str) -> Vec<Arc<dyn CheckoutForm>> {
        self.forms
            .iter()
            .filter(|form| form.selector() == selector)
            .map(|form| form.clone() as Arc<dyn CheckoutForm>)
            .collect()
    }
}
