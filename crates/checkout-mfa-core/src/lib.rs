//! Checkout MFA Gate.
//!
//! Decides, per checkout submission, whether a step-up verification is required
//! before the transaction may proceed.
//!
//! ## Flow
//!
//! 1. **Context**: a transaction context is read from the page (or passed in) and
//!    validated. Invalid contexts never reach the service.
//! 2. **Decision**: `POST /api/check_mfa` answers whether a challenge is required.
//!    Failures are surfaced, never read as "no challenge".
//! 3. **Challenge**: one surface at a time; codes go to `POST /api/verify_mfa`.
//! 4. **Release**: once verified, the submission is released (with the token in a
//!    hidden field under `token-required` enforcement).
//!
//! The page is reached only through the traits in [`host`]; the service only
//! through [`MfaService`].

#![deny(unsafe_code)]

pub mod bootstrap;
pub mod challenge;
pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod event;
pub mod gate;
pub mod guard;
pub mod host;
pub mod mocks;

pub use bootstrap::GateSettings;
pub use challenge::{ChallengeController, ChallengePhase, ChallengeState, VerifiedToken};
pub use config::{
    ContextProvider, DecisionFailurePolicy, EnforceMode, GateConfig, UserIdProvider,
    DEFAULT_CHALLENGE_TTL, DEFAULT_HIDDEN_FIELD_NAME, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RESEND_COOLDOWN,
    GUEST_USER_ID, MAX_CHALLENGE_TTL,
};
pub use context::{extract_context, RawTransactionContext, TransactionContext};
pub use decision::{
    Decision, DecisionClient, DecisionRequest, DecisionResponse, MfaService, VerifyRequest,
    VerifyResponse, CHECK_MFA_PATH, DEFAULT_METHOD, MERCHANT_HEADER, VERIFY_MFA_PATH,
};
pub use error::{GateError, GateResult};
pub use event::{EventBus, GateEvent};
pub use gate::{CodeOutcome, Evaluation, GateHost, MfaGate, ResendOutcome};
pub use guard::{SubmissionGuard, SubmitVerdict, SuppressReason};
pub use host::{
    BlankPage, ChallengeHandle, ChallengeRenderer, ChallengeView, CheckoutForm, CheckoutPage,
    DismissReason,
};
