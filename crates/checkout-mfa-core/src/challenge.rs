//! Challenge controller.
//!
//! ```text
//! CLOSED --open--> OPEN --code--> SUBMITTING --verified--> CLOSED
//!                   ^                 |
//!                   +----rejected-----+
//! OPEN | SUBMITTING --dismiss--> CLOSED
//! ```
//!
//! The controller is pure state: it decides transitions and hands back what the
//! gate must do (render, call the service). Every surface gets a fresh
//! [`ChallengeHandle`]; inputs tagged with any other handle are ignored, which both
//! keeps a single surface alive and drops late verification responses.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::MAX_CHALLENGE_TTL;
use crate::decision::{Decision, VerifyRequest, VerifyResponse};
use crate::error::{GateError, GateResult};
use crate::host::{ChallengeHandle, ChallengeView};

pub const MSG_EMPTY_CODE: &str = "Enter the code you received.";
pub const MSG_REJECTED: &str = "Verification failed. Check the code and try again.";
pub const MSG_UNREACHABLE: &str = "Could not reach the verification service. Try again.";
pub const MSG_EXPIRED: &str = "This code has expired. Submit the form again to get a new one.";

/// Proof of a successful verification.
#[derive(Clone, PartialEq, Eq)]
pub enum VerifiedToken {
    /// Token issued by the service.
    Token(String),
    /// The service verified the code but issued no token.
    Marker,
}

impl VerifiedToken {
    pub fn from_response(response: &VerifyResponse) -> Self {
        match response.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Self::Token(token.to_string()),
            _ => Self::Marker,
        }
    }

    /// Value written into the hidden form field.
    pub fn field_value(&self) -> &str {
        match self {
            Self::Token(token) => token,
            Self::Marker => "verified",
        }
    }
}

impl fmt::Debug for VerifiedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::Marker => f.write_str("Marker"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengePhase {
    Closed,
    Open,
    Submitting,
}

/// An open (or submitting) challenge.
#[derive(Debug, Clone)]
pub struct ActiveChallenge {
    pub handle: ChallengeHandle,
    pub user_id: String,
    pub methods: Vec<String>,
    pub opened_at: Instant,
    pub expires_at: Instant,
    /// When the current code was issued: open time or last accepted resend.
    pub code_sent_at: Instant,
    pub last_error: Option<String>,
}

impl ActiveChallenge {
    fn view(&self, now: Instant) -> ChallengeView {
        ChallengeView {
            handle: self.handle,
            methods: self.methods.clone(),
            expires_in: self.expires_at.saturating_duration_since(now),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum ChallengeState {
    #[default]
    Closed,
    Open(ActiveChallenge),
    Submitting(ActiveChallenge),
}

/// A surface was opened, possibly replacing an older one.
#[derive(Debug, Clone)]
pub struct Opened {
    pub view: ChallengeView,
    pub replaced: Option<ChallengeHandle>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitStep {
    /// Send this request to the verification endpoint.
    Send(VerifyRequest),
    /// Blank input. Stays open, nothing sent.
    EmptyCode,
    /// Deadline passed. The challenge is now closed.
    Expired,
    /// Already submitting, or the handle is not the open challenge.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyStep {
    Verified(VerifiedToken),
    /// Back to open with an inline error.
    Retry(String),
    /// The response belongs to a surface that is no longer current.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResendStep {
    Accepted { user_id: String, view: ChallengeView },
    CoolingDown { remaining: Duration },
    Ignored,
}

/// Drives the challenge lifecycle for one gate.
#[derive(Debug)]
pub struct ChallengeController {
    state: ChallengeState,
    next_handle: u64,
    ttl: Duration,
    resend_cooldown: Duration,
}

impl ChallengeController {
    pub fn new(ttl: Duration, resend_cooldown: Duration) -> Self {
        Self {
            state: ChallengeState::Closed,
            next_handle: 1,
            ttl: ttl.min(MAX_CHALLENGE_TTL),
            resend_cooldown,
        }
    }

    pub fn state(&self) -> &ChallengeState {
        &self.state
    }

    pub fn phase(&self) -> ChallengePhase {
        match self.state {
            ChallengeState::Closed => ChallengePhase::Closed,
            ChallengeState::Open(_) => ChallengePhase::Open,
            ChallengeState::Submitting(_) => ChallengePhase::Submitting,
        }
    }

    pub fn active(&self) -> Option<&ActiveChallenge> {
        match &self.state {
            ChallengeState::Closed => None,
            ChallengeState::Open(c) | ChallengeState::Submitting(c) => Some(c),
        }
    }

    pub fn handle(&self) -> Option<ChallengeHandle> {
        self.active().map(|c| c.handle)
    }

    pub fn is_active(&self) -> bool {
        self.active().is_some()
    }

    /// Open a surface for `decision`, tearing down any existing one first.
    pub fn open(&mut self, decision: &Decision, user_id: &str, now: Instant) -> Opened {
        let replaced = self.close();
        let handle = ChallengeHandle(self.next_handle);
        self.next_handle += 1;

        let challenge = ActiveChallenge {
            handle,
            user_id: user_id.to_string(),
            methods: decision.methods.clone(),
            opened_at: now,
            expires_at: deadline(now, self.ttl),
            code_sent_at: now,
            last_error: None,
        };
        let view = challenge.view(now);
        debug!(%handle, ?replaced, "challenge opened");
        self.state = ChallengeState::Open(challenge);

        Opened { view, replaced }
    }

    /// User submitted a code on the surface identified by `handle`.
    pub fn begin_submit(&mut self, handle: ChallengeHandle, code: &str, now: Instant) -> SubmitStep {
        match std::mem::take(&mut self.state) {
            ChallengeState::Open(mut challenge) if challenge.handle == handle => {
                let code = code.trim();
                if code.is_empty() {
                    challenge.last_error = Some(MSG_EMPTY_CODE.to_string());
                    self.state = ChallengeState::Open(challenge);
                    return SubmitStep::EmptyCode;
                }
                if now >= challenge.expires_at {
                    debug!(%handle, "challenge expired before submission");
                    return SubmitStep::Expired;
                }

                let request = VerifyRequest {
                    user_id: challenge.user_id.clone(),
                    otp: code.to_string(),
                };
                challenge.last_error = None;
                self.state = ChallengeState::Submitting(challenge);
                debug!(%handle, "challenge submitting");
                SubmitStep::Send(request)
            }
            other => {
                self.state = other;
                SubmitStep::Ignored
            }
        }
    }

    /// Verification finished for `handle`.
    pub fn finish(&mut self, handle: ChallengeHandle, result: GateResult<VerifyResponse>) -> VerifyStep {
        match std::mem::take(&mut self.state) {
            ChallengeState::Submitting(mut challenge) if challenge.handle == handle => {
                let message = match result {
                    Ok(response) if response.verified => {
                        debug!(%handle, "challenge verified");
                        return VerifyStep::Verified(VerifiedToken::from_response(&response));
                    }
                    Ok(_) => MSG_REJECTED.to_string(),
                    Err(GateError::Transport { status, .. }) => {
                        format!("Verification service error (HTTP {}). Try again.", status)
                    }
                    Err(_) => MSG_UNREACHABLE.to_string(),
                };
                challenge.last_error = Some(message.clone());
                self.state = ChallengeState::Open(challenge);
                VerifyStep::Retry(message)
            }
            other => {
                self.state = other;
                VerifyStep::Stale
            }
        }
    }

    /// Dismiss the surface. In-flight verification is not cancelled; its response
    /// will arrive as [`VerifyStep::Stale`].
    pub fn dismiss(&mut self, handle: ChallengeHandle) -> bool {
        if self.handle() == Some(handle) {
            self.state = ChallengeState::Closed;
            debug!(%handle, "challenge dismissed");
            true
        } else {
            false
        }
    }

    /// Request a fresh code, subject to the resend cooldown.
    pub fn resend(&mut self, handle: ChallengeHandle, now: Instant) -> ResendStep {
        let cooldown = self.resend_cooldown;
        let ttl = self.ttl;
        match &mut self.state {
            ChallengeState::Open(challenge) if challenge.handle == handle => {
                let elapsed = now.saturating_duration_since(challenge.code_sent_at);
                if elapsed < cooldown {
                    return ResendStep::CoolingDown {
                        remaining: cooldown - elapsed,
                    };
                }
                challenge.code_sent_at = now;
                challenge.expires_at = deadline(now, ttl);
                challenge.last_error = None;
                ResendStep::Accepted {
                    user_id: challenge.user_id.clone(),
                    view: challenge.view(now),
                }
            }
            _ => ResendStep::Ignored,
        }
    }

    /// Close whatever is open. Returns the handle that was closed.
    pub fn close(&mut self) -> Option<ChallengeHandle> {
        let handle = self.handle();
        self.state = ChallengeState::Closed;
        handle
    }
}

/// `now + ttl`, saturating at `now + MAX_CHALLENGE_TTL`.
fn deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(MAX_CHALLENGE_TTL))
        .unwrap_or(now)
}
