use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::challenge::{
    ChallengeController, ChallengePhase, ResendStep, SubmitStep, VerifiedToken, VerifyStep,
    MSG_EMPTY_CODE, MSG_EXPIRED,
};
use crate::config::{DecisionFailurePolicy, EnforceMode, GateConfig};
use crate::context::{extract_context, RawTransactionContext, TransactionContext};
use crate::decision::{Decision, DecisionClient, MfaService};
use crate::error::{GateError, GateResult};
use crate::event::{EventBus, GateEvent};
use crate::guard::{classify, Interception, SubmissionGuard, SubmitVerdict, SuppressReason};
use crate::host::{
    BlankPage, ChallengeHandle, ChallengeRenderer, ChallengeView, CheckoutForm, CheckoutPage,
    DismissReason,
};

pub const MSG_DECISION_UNAVAILABLE: &str =
    "We could not confirm this payment right now. Please try again.";

/// The page-side collaborators a gate is initialized with.
#[derive(Clone)]
pub struct GateHost {
    pub renderer: Arc<dyn ChallengeRenderer>,
    pub page: Arc<dyn CheckoutPage>,
}

impl GateHost {
    /// Host with no readable page; contexts must be passed explicitly or come from a
    /// custom provider.
    pub fn new(renderer: Arc<dyn ChallengeRenderer>) -> Self {
        Self {
            renderer,
            page: Arc::new(BlankPage),
        }
    }

    pub fn with_page(mut self, page: Arc<dyn CheckoutPage>) -> Self {
        self.page = page;
        self
    }
}

/// Result of an evaluation cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub challenge_required: bool,
    pub decision: Decision,
    /// Surface opened (or already open) for this evaluation.
    pub challenge: Option<ChallengeHandle>,
    /// Set when the same transaction was already verified.
    pub verified: Option<VerifiedToken>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodeOutcome {
    Verified(VerifiedToken),
    /// Still open, inline error shown.
    Retry(String),
    EmptyCode,
    /// Deadline passed; the surface closed and the transaction stays blocked.
    Expired,
    /// Debounced, stale, or unknown handle.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendOutcome {
    Accepted { expires_in: Duration },
    CoolingDown { remaining: Duration },
    Ignored,
}

#[derive(Debug, Clone)]
struct VerifiedSubmission {
    token: VerifiedToken,
    context: Option<TransactionContext>,
}

/// Mutable per-page session. Only the gate touches it.
#[derive(Debug)]
struct Session {
    flagged: bool,
    last_decision: Option<Decision>,
    last_context: Option<TransactionContext>,
    last_user_id: Option<String>,
    verified: Option<VerifiedSubmission>,
    challenge: ChallengeController,
    /// Form whose submission opened the current challenge.
    origin_form: Option<String>,
    /// Bumped on teardown; work started under an older generation is dropped.
    generation: u64,
}

impl Session {
    fn new(config: &GateConfig) -> Self {
        Self {
            flagged: false,
            last_decision: None,
            last_context: None,
            last_user_id: None,
            verified: None,
            challenge: ChallengeController::new(config.challenge_ttl, config.resend_cooldown),
            origin_form: None,
            generation: 0,
        }
    }
}

enum Cycle {
    Pending(Evaluation),
    Reopened(Evaluation),
    Decided(Evaluation),
    AlreadyVerified(Evaluation),
    /// The session was torn down while the decision was in flight.
    Discarded(Evaluation),
}

/// The MFA gate for one page.
///
/// Each instance owns its session; there is no process-wide state, so independent
/// gates (or tests) never observe each other.
///
/// Ordering: evaluation cycles are serialized. While a challenge is open or
/// submitting no decision request is issued, so at most one surface exists.
pub struct MfaGate {
    config: GateConfig,
    decisions: DecisionClient,
    renderer: Arc<dyn ChallengeRenderer>,
    page: Arc<dyn CheckoutPage>,
    guard: SubmissionGuard,
    events: EventBus,
    session: Mutex<Session>,
    cycle: tokio::sync::Mutex<()>,
}

impl MfaGate {
    /// Validate `config` and wire the configured checkout form, if it resolves to
    /// exactly one form. Otherwise interception stays inert and the host drives
    /// [`MfaGate::evaluate`] itself.
    pub fn initialize(
        config: GateConfig,
        service: Arc<dyn MfaService>,
        host: GateHost,
    ) -> GateResult<Self> {
        config.validate()?;

        let gate = Self {
            decisions: DecisionClient::new(service),
            renderer: host.renderer,
            page: host.page,
            guard: SubmissionGuard::new(),
            events: EventBus::new(),
            session: Mutex::new(Session::new(&config)),
            cycle: tokio::sync::Mutex::new(()),
            config,
        };

        if let Some(selector) = gate.config.form_selector.as_deref() {
            let mut forms = gate.page.forms(selector);
            if forms.len() == 1 {
                if let Some(form) = forms.pop() {
                    gate.guard.wire(form);
                }
            } else {
                warn!(
                    selector,
                    matches = forms.len(),
                    "form selector did not resolve to exactly one form; interception inert"
                );
            }
        }

        info!(
            merchant = %gate.config.merchant_id,
            enforce_mode = %gate.config.enforce_mode,
            wired_forms = gate.guard.wired_count(),
            "MFA gate initialized"
        );
        Ok(gate)
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn is_flagged(&self) -> bool {
        self.session.lock().flagged
    }

    pub fn last_decision(&self) -> Option<Decision> {
        self.session.lock().last_decision.clone()
    }

    pub fn verified_token(&self) -> Option<VerifiedToken> {
        self.session
            .lock()
            .verified
            .as_ref()
            .map(|v| v.token.clone())
    }

    pub fn challenge_phase(&self) -> ChallengePhase {
        self.session.lock().challenge.phase()
    }

    /// Handle of the open (or submitting) challenge surface.
    pub fn open_challenge(&self) -> Option<ChallengeHandle> {
        self.session.lock().challenge.handle()
    }

    pub fn guard(&self) -> &SubmissionGuard {
        &self.guard
    }

    /// Wire an additional form. Idempotent.
    pub fn wire_form(&self, form: Arc<dyn CheckoutForm>) -> bool {
        self.guard.wire(form)
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&GateEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(Arc::new(handler));
    }

    /// Called with the decision and context whenever a challenge is required.
    pub fn register_challenge_required_handler<F>(&self, handler: F)
    where
        F: Fn(&Decision, &TransactionContext) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let GateEvent::ChallengeRequired { decision, context } = event {
                handler(decision, context);
            }
        });
    }

    /// Evaluate a transaction without a wired form.
    ///
    /// Uses `context` when given, otherwise the configured provider. Validation and
    /// service failures are returned as errors, never as "no challenge".
    pub async fn evaluate(&self, context: Option<RawTransactionContext>) -> GateResult<Evaluation> {
        match self.run_cycle(context, None).await? {
            Cycle::Pending(evaluation)
            | Cycle::Reopened(evaluation)
            | Cycle::Decided(evaluation)
            | Cycle::AlreadyVerified(evaluation)
            | Cycle::Discarded(evaluation) => Ok(evaluation),
        }
    }

    /// Intercept a submit attempt of `form_id`.
    ///
    /// Forms that were never wired are not the gate's business and proceed.
    pub async fn handle_submit(&self, form_id: &str) -> SubmitVerdict {
        let Some(form) = self.guard.form(form_id) else {
            return SubmitVerdict::Proceed;
        };

        match self.run_cycle(None, Some(form_id)).await {
            Ok(Cycle::Pending(_)) => SubmitVerdict::Suppress(SuppressReason::ChallengeOpen),
            Ok(Cycle::Reopened(_)) => SubmitVerdict::Suppress(SuppressReason::ChallengeReopened),
            Ok(Cycle::Decided(evaluation)) if evaluation.challenge_required => {
                SubmitVerdict::Suppress(SuppressReason::ChallengeRequired)
            }
            Ok(Cycle::Decided(_)) => SubmitVerdict::Proceed,
            Ok(Cycle::Discarded(_)) => SubmitVerdict::Suppress(SuppressReason::SessionEnded),
            Ok(Cycle::AlreadyVerified(evaluation)) => {
                if let Some(token) = evaluation.verified.as_ref() {
                    self.attach_token(form.as_ref(), token);
                }
                SubmitVerdict::Proceed
            }
            Err(GateError::Validation { field, reason }) => {
                self.renderer
                    .show_notice(&format!("Please check the {} field: {}", field, reason));
                SubmitVerdict::Suppress(SuppressReason::InvalidContext { field })
            }
            Err(err) => match self.config.decision_failure_policy {
                DecisionFailurePolicy::FailClosed => {
                    warn!(error = %err, form = form_id, "decision failed; submission blocked");
                    self.renderer.show_notice(MSG_DECISION_UNAVAILABLE);
                    SubmitVerdict::Suppress(SuppressReason::DecisionUnavailable)
                }
                DecisionFailurePolicy::FailOpen => {
                    warn!(error = %err, form = form_id, "decision failed; submission released (fail-open)");
                    SubmitVerdict::Proceed
                }
            },
        }
    }

    /// User submitted `code` on the surface `handle`.
    pub async fn submit_code(&self, handle: ChallengeHandle, code: &str) -> CodeOutcome {
        let (step, generation) = {
            let mut session = self.session.lock();
            let step = session.challenge.begin_submit(handle, code, Instant::now());
            (step, session.generation)
        };

        let request = match step {
            SubmitStep::Send(request) => request,
            SubmitStep::EmptyCode => {
                self.renderer.show_error(handle, MSG_EMPTY_CODE);
                return CodeOutcome::EmptyCode;
            }
            SubmitStep::Expired => {
                info!(%handle, "challenge expired; transaction stays blocked");
                self.renderer.close(handle);
                self.renderer.show_notice(MSG_EXPIRED);
                return CodeOutcome::Expired;
            }
            SubmitStep::Ignored => {
                debug!(%handle, "code submission ignored");
                return CodeOutcome::Ignored;
            }
        };

        let result = self.decisions.service().verify(&request).await;
        if let Err(err) = &result {
            warn!(%handle, error = %err, "verification request failed");
        }

        let (step, origin_form) = {
            let mut session = self.session.lock();
            if session.generation != generation {
                debug!(%handle, "session ended during verification; response dropped");
                return CodeOutcome::Ignored;
            }
            let step = session.challenge.finish(handle, result);
            let mut origin_form = None;
            if let VerifyStep::Verified(token) = &step {
                session.flagged = false;
                session.verified = Some(VerifiedSubmission {
                    token: token.clone(),
                    context: session.last_context.clone(),
                });
                origin_form = session.origin_form.take();
            }
            (step, origin_form)
        };

        match step {
            VerifyStep::Verified(token) => {
                info!(%handle, "challenge verified; submission released");
                self.renderer.close(handle);
                self.renderer.show_success();
                self.events.emit(&GateEvent::Verified {
                    handle,
                    token: token.clone(),
                });
                self.release(origin_form.as_deref(), &token);
                CodeOutcome::Verified(token)
            }
            VerifyStep::Retry(message) => {
                warn!(%handle, "verification rejected");
                self.renderer.show_error(handle, &message);
                CodeOutcome::Retry(message)
            }
            VerifyStep::Stale => {
                warn!(%handle, "late verification response dropped");
                CodeOutcome::Ignored
            }
        }
    }

    /// Dismiss the surface. The transaction stays flagged.
    pub fn dismiss(&self, handle: ChallengeHandle, reason: DismissReason) -> bool {
        let dismissed = self.session.lock().challenge.dismiss(handle);
        if dismissed {
            info!(%handle, ?reason, "challenge dismissed; transaction stays blocked");
            self.renderer.close(handle);
        }
        dismissed
    }

    /// Ask for a new code on the open surface.
    pub fn resend_code(&self, handle: ChallengeHandle) -> ResendOutcome {
        let step = self
            .session
            .lock()
            .challenge
            .resend(handle, Instant::now());

        match step {
            ResendStep::Accepted { user_id, view } => {
                info!(%handle, "code resend accepted");
                let expires_in = view.expires_in;
                self.events
                    .emit(&GateEvent::CodeResendRequested { user_id, view });
                ResendOutcome::Accepted { expires_in }
            }
            ResendStep::CoolingDown { remaining } => {
                let seconds = remaining.as_secs_f64().ceil() as u64;
                self.renderer.show_error(
                    handle,
                    &format!("You can request a new code in {}s.", seconds),
                );
                ResendOutcome::CoolingDown { remaining }
            }
            ResendStep::Ignored => ResendOutcome::Ignored,
        }
    }

    /// Page unload: close any surface and forget the session.
    pub fn teardown(&self) {
        let closed = {
            let mut session = self.session.lock();
            let closed = session.challenge.close();
            let mut fresh = Session::new(&self.config);
            fresh.generation = session.generation.wrapping_add(1);
            // Keep the closed controller so handles are never reused.
            std::mem::swap(&mut fresh.challenge, &mut session.challenge);
            *session = fresh;
            closed
        };
        if let Some(handle) = closed {
            self.renderer.close(handle);
        }
        debug!("MFA gate session cleared");
    }

    async fn run_cycle(
        &self,
        explicit: Option<RawTransactionContext>,
        origin_form: Option<&str>,
    ) -> GateResult<Cycle> {
        let _cycle = self.cycle.lock().await;

        let (generation, reopen) = {
            let mut session = self.session.lock();
            let generation = session.generation;
            let route = classify(
                session.flagged,
                session.challenge.is_active(),
                session.last_decision.as_ref(),
            );
            match route {
                Interception::Block => {
                    let decision = session.last_decision.clone().ok_or(GateError::NoDecision)?;
                    return Ok(Cycle::Pending(Evaluation {
                        challenge_required: true,
                        decision,
                        challenge: session.challenge.handle(),
                        verified: None,
                    }));
                }
                Interception::Reopen(decision) => {
                    let user_id = session.last_user_id.clone().unwrap_or_default();
                    if origin_form.is_some() {
                        session.origin_form = origin_form.map(str::to_string);
                    }
                    let opened = session.challenge.open(&decision, &user_id, Instant::now());
                    (generation, Some((decision, opened)))
                }
                Interception::Evaluate => (generation, None),
            }
        };

        if let Some((decision, opened)) = reopen {
            info!(handle = %opened.view.handle, "re-opening challenge from last decision");
            self.render_opened(opened.replaced, &opened.view);
            return Ok(Cycle::Reopened(Evaluation {
                challenge_required: true,
                decision,
                challenge: Some(opened.view.handle),
                verified: None,
            }));
        }

        let context = extract_context(explicit, &self.config, self.page.as_ref()).map_err(|err| {
            warn!(error = %err, "transaction context rejected");
            err
        })?;

        {
            let session = self.session.lock();
            if let (Some(verified), Some(decision)) = (&session.verified, &session.last_decision) {
                let unchanged = verified
                    .context
                    .as_ref()
                    .map(|ctx| ctx.same_transaction(&context))
                    .unwrap_or(false);
                if unchanged {
                    debug!("transaction already verified; no new decision");
                    return Ok(Cycle::AlreadyVerified(Evaluation {
                        challenge_required: false,
                        decision: decision.clone(),
                        challenge: None,
                        verified: Some(verified.token.clone()),
                    }));
                }
            }
        }

        let user_id = (self.config.user_id_provider)(self.page.as_ref());
        let decision = self.decisions.decide(&context, &user_id).await?;

        let opened = {
            let mut session = self.session.lock();
            if session.generation != generation {
                debug!("session ended during decision; result dropped");
                return Ok(Cycle::Discarded(Evaluation {
                    challenge_required: decision.require_challenge,
                    decision,
                    challenge: None,
                    verified: None,
                }));
            }
            session.last_decision = Some(decision.clone());
            session.last_context = Some(context.clone());
            session.last_user_id = Some(user_id.clone());
            if decision.require_challenge {
                session.flagged = true;
                session.verified = None;
                session.origin_form = origin_form.map(str::to_string);
                Some(session.challenge.open(&decision, &user_id, Instant::now()))
            } else {
                None
            }
        };

        let Some(opened) = opened else {
            return Ok(Cycle::Decided(Evaluation {
                challenge_required: false,
                decision,
                challenge: None,
                verified: None,
            }));
        };

        self.render_opened(opened.replaced, &opened.view);
        self.events.emit(&GateEvent::ChallengeRequired {
            decision: decision.clone(),
            context,
        });
        Ok(Cycle::Decided(Evaluation {
            challenge_required: true,
            decision,
            challenge: Some(opened.view.handle),
            verified: None,
        }))
    }

    fn render_opened(&self, replaced: Option<ChallengeHandle>, view: &ChallengeView) {
        if let Some(old) = replaced {
            self.renderer.close(old);
        }
        self.renderer.open(view);
    }

    fn attach_token(&self, form: &dyn CheckoutForm, token: &VerifiedToken) {
        if self.config.enforce_mode == EnforceMode::TokenRequired {
            form.set_hidden_field(&self.config.hidden_field_name, token.field_value());
        }
    }

    fn release(&self, origin_form: Option<&str>, token: &VerifiedToken) {
        let Some(form) = origin_form.and_then(|id| self.guard.form(id)) else {
            return;
        };
        self.attach_token(form.as_ref(), token);
        if self.config.resubmit_on_verify {
            debug!(form = %form.id(), "re-triggering form submission");
            form.submit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{DecisionResponse, VerifyResponse};
    use crate::mocks::{MockForm, MockMfaService, MockPage, RecordingRenderer};

    struct Fixture {
        gate: MfaGate,
        service: Arc<MockMfaService>,
        renderer: Arc<RecordingRenderer>,
        form: Arc<MockForm>,
    }

    fn fixture(service: MockMfaService, config: GateConfig) -> Fixture {
        let service = Arc::new(service);
        let renderer = Arc::new(RecordingRenderer::new());
        let form = Arc::new(MockForm::new("checkout", "#checkout"));
        let page = MockPage::new()
            .with_field("amount", "100")
            .with_field("currency", "usd")
            .with_field("email", "demo@example.com")
            .with_form(form.clone());

        let gate = MfaGate::initialize(
            config.with_form_selector("#checkout"),
            service.clone(),
            GateHost::new(renderer.clone()).with_page(Arc::new(page)),
        )
        .unwrap();

        Fixture {
            gate,
            service,
            renderer,
            form,
        }
    }

    fn config() -> GateConfig {
        GateConfig::new("https://mfa.example.com", "merchant_1")
            .with_user_id_provider(|_| "user123".to_string())
    }

    #[test]
    fn initialize_rejects_missing_merchant() {
        let result = MfaGate::initialize(
            GateConfig::new("https://mfa.example.com", ""),
            Arc::new(MockMfaService::new()),
            GateHost::new(Arc::new(RecordingRenderer::new())),
        );
        assert!(matches!(result, Err(GateError::Configuration(_))));
    }

    #[test]
    fn ambiguous_selector_leaves_interception_inert() {
        let page = MockPage::new()
            .with_form(Arc::new(MockForm::new("a", "form")))
            .with_form(Arc::new(MockForm::new("b", "form")));
        let gate = MfaGate::initialize(
            config().with_form_selector("form"),
            Arc::new(MockMfaService::new()),
            GateHost::new(Arc::new(RecordingRenderer::new())).with_page(Arc::new(page)),
        )
        .unwrap();
        assert_eq!(gate.guard().wired_count(), 0);
    }

    #[tokio::test]
    async fn no_challenge_releases_submission() {
        let fx = fixture(MockMfaService::new(), config());
        let verdict = fx.gate.handle_submit("checkout").await;
        assert_eq!(verdict, SubmitVerdict::Proceed);
        assert!(!fx.gate.is_flagged());
        assert!(fx.renderer.opened().is_empty());
        assert_eq!(fx.service.check_requests().len(), 1);
    }

    #[tokio::test]
    async fn unwired_form_is_not_intercepted() {
        let fx = fixture(MockMfaService::requiring(&["otp"]), config());
        assert!(fx.gate.handle_submit("newsletter").await.is_proceed());
        assert!(fx.service.check_requests().is_empty());
    }

    #[tokio::test]
    async fn invalid_page_context_blocks_without_remote_call() {
        let fx = fixture(MockMfaService::new(), config());
        let err = fx
            .gate
            .evaluate(Some(RawTransactionContext::new(-1.0, "USD")))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("amount"));
        assert!(fx.service.check_requests().is_empty());
    }

    #[tokio::test]
    async fn decision_failure_fails_closed_by_default() {
        let service = MockMfaService::new();
        service.set_default_decision(Err(GateError::Network("refused".into())));
        let fx = fixture(service, config());

        let verdict = fx.gate.handle_submit("checkout").await;
        assert_eq!(
            verdict,
            SubmitVerdict::Suppress(SuppressReason::DecisionUnavailable)
        );
        assert_eq!(fx.renderer.notices(), vec![MSG_DECISION_UNAVAILABLE.to_string()]);
    }

    #[tokio::test]
    async fn decision_failure_can_fail_open() {
        let service = MockMfaService::new();
        service.set_default_decision(Err(GateError::Transport {
            status: 500,
            body: "boom".into(),
        }));
        let fx = fixture(
            service,
            config().with_decision_failure_policy(DecisionFailurePolicy::FailOpen),
        );
        assert!(fx.gate.handle_submit("checkout").await.is_proceed());
    }

    #[tokio::test]
    async fn evaluate_surfaces_decision_failure() {
        let service = MockMfaService::new();
        service.push_decision(Err(GateError::Transport {
            status: 502,
            body: String::new(),
        }));
        let fx = fixture(service, config());
        let err = fx.gate.evaluate(None).await.unwrap_err();
        assert!(matches!(err, GateError::Transport { status: 502, .. }));
        assert!(!fx.gate.is_flagged());
    }

    #[tokio::test]
    async fn token_required_attaches_token_and_resubmits() {
        let service = MockMfaService::requiring(&["otp"]);
        service.set_default_verification(Ok(VerifyResponse {
            verified: true,
            token: Some("tok-abc".into()),
        }));
        let fx = fixture(service, config());

        let verdict = fx.gate.handle_submit("checkout").await;
        assert_eq!(verdict, SubmitVerdict::Suppress(SuppressReason::ChallengeRequired));
        let handle = fx.gate.open_challenge().unwrap();

        let outcome = fx.gate.submit_code(handle, "123456").await;
        assert_eq!(outcome, CodeOutcome::Verified(VerifiedToken::Token("tok-abc".into())));
        assert_eq!(fx.form.hidden_field("mfa_token").as_deref(), Some("tok-abc"));
        assert_eq!(fx.form.submit_count(), 1);
    }

    #[tokio::test]
    async fn client_mode_attaches_nothing() {
        let fx = fixture(
            MockMfaService::requiring(&["otp"]),
            config().with_enforce_mode(EnforceMode::Client),
        );
        fx.gate.handle_submit("checkout").await;
        let handle = fx.gate.open_challenge().unwrap();
        fx.gate.submit_code(handle, "123456").await;

        assert!(fx.form.hidden_field("mfa_token").is_none());
        assert_eq!(fx.form.submit_count(), 1);
        assert!(fx.gate.handle_submit("checkout").await.is_proceed());
    }

    #[tokio::test]
    async fn open_challenge_blocks_resubmission_without_new_decision() {
        let fx = fixture(MockMfaService::requiring(&["otp"]), config());
        fx.gate.handle_submit("checkout").await;
        let verdict = fx.gate.handle_submit("checkout").await;

        assert_eq!(verdict, SubmitVerdict::Suppress(SuppressReason::ChallengeOpen));
        assert_eq!(fx.service.check_requests().len(), 1);
        assert_eq!(fx.renderer.visible().len(), 1);
    }

    #[tokio::test]
    async fn changed_transaction_after_verification_is_decided_again() {
        let service = MockMfaService::requiring(&["otp"]);
        service.push_decision(Ok(DecisionResponse::challenge(&["otp"])));
        service.push_decision(Ok(DecisionResponse::allow()));
        let fx = fixture(service, config());

        let first = fx.gate.evaluate(None).await.unwrap();
        fx.gate
            .submit_code(first.challenge.unwrap(), "123456")
            .await;

        let changed = fx
            .gate
            .evaluate(Some(RawTransactionContext::new(250.0, "USD")))
            .await
            .unwrap();
        assert!(!changed.challenge_required);
        assert!(changed.verified.is_none());
        assert_eq!(fx.service.check_requests().len(), 2);
    }

    #[tokio::test]
    async fn teardown_closes_surface_and_clears_session() {
        let fx = fixture(MockMfaService::requiring(&["otp"]), config());
        fx.gate.evaluate(None).await.unwrap();
        assert!(fx.gate.is_flagged());

        fx.gate.teardown();
        assert!(!fx.gate.is_flagged());
        assert!(fx.gate.last_decision().is_none());
        assert_eq!(fx.gate.challenge_phase(), ChallengePhase::Closed);
        assert!(fx.renderer.visible().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn resend_is_rate_limited() {
        let fx = fixture(MockMfaService::requiring(&["sms"]), config());
        let events = Arc::new(Mutex::new(0usize));
        let counter = events.clone();
        fx.gate.subscribe(move |event| {
            if matches!(event, GateEvent::CodeResendRequested { .. }) {
                *counter.lock() += 1;
            }
        });

        let handle = fx.gate.evaluate(None).await.unwrap().challenge.unwrap();
        assert!(matches!(
            fx.gate.resend_code(handle),
            ResendOutcome::CoolingDown { .. }
        ));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(
            fx.gate.resend_code(handle),
            ResendOutcome::Accepted {
                expires_in: Duration::from_secs(300)
            }
        );
        assert_eq!(*events.lock(), 1);
    }
}
