//! Submission guard: form wiring and the pre-decision interception rules.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::decision::Decision;
use crate::host::CheckoutForm;

/// What the host should do with the native submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitVerdict {
    Proceed,
    Suppress(SuppressReason),
}

impl SubmitVerdict {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressReason {
    /// A challenge surface is open; it has to be resolved first.
    ChallengeOpen,
    /// A dismissed challenge was re-opened from the last decision.
    ChallengeReopened,
    /// A fresh decision required a challenge.
    ChallengeRequired,
    /// The page context failed validation.
    InvalidContext { field: &'static str },
    /// The decision call failed under the fail-closed policy.
    DecisionUnavailable,
    /// The gate was torn down before the decision arrived.
    SessionEnded,
}

/// Pre-decision routing of a submit attempt.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Interception {
    /// Flagged with a surface open: suppress, nothing else.
    Block,
    /// Flagged with no surface: re-open from this decision, no new request.
    Reopen(Decision),
    /// Not flagged: extract, decide.
    Evaluate,
}

pub(crate) fn classify(
    flagged: bool,
    challenge_active: bool,
    last_decision: Option<&Decision>,
) -> Interception {
    match (flagged, challenge_active, last_decision) {
        (true, true, _) => Interception::Block,
        (true, false, Some(decision)) => Interception::Reopen(decision.clone()),
        // Flagged without a recorded decision cannot be re-opened; decide again.
        (true, false, None) => Interception::Evaluate,
        (false, _, _) => Interception::Evaluate,
    }
}

/// Tracks the forms the gate intercepts.
#[derive(Default)]
pub struct SubmissionGuard {
    forms: RwLock<BTreeMap<String, Arc<dyn CheckoutForm>>>,
}

impl SubmissionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire a form. Re-wiring the same form is a no-op and returns `false`.
    pub fn wire(&self, form: Arc<dyn CheckoutForm>) -> bool {
        let id = form.id();
        let mut forms = self.forms.write();
        if forms.contains_key(&id) {
            debug!(form = %id, "form already wired");
            return false;
        }
        debug!(form = %id, "form wired");
        forms.insert(id, form);
        true
    }

    pub fn is_wired(&self, form_id: &str) -> bool {
        self.forms.read().contains_key(form_id)
    }

    pub fn form(&self, form_id: &str) -> Option<Arc<dyn CheckoutForm>> {
        self.forms.read().get(form_id).cloned()
    }

    pub fn wired_count(&self) -> usize {
        self.forms.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockForm;

    fn decision() -> Decision {
        Decision {
            require_challenge: true,
            methods: vec!["otp".into()],
        }
    }

    #[test]
    fn open_challenge_blocks() {
        assert_eq!(classify(true, true, Some(&decision())), Interception::Block);
    }

    #[test]
    fn dismissed_challenge_reopens_from_last_decision() {
        assert_eq!(
            classify(true, false, Some(&decision())),
            Interception::Reopen(decision())
        );
    }

    #[test]
    fn unflagged_submission_evaluates() {
        assert_eq!(classify(false, false, None), Interception::Evaluate);
        assert_eq!(classify(false, false, Some(&decision())), Interception::Evaluate);
    }

    #[test]
    fn wiring_is_idempotent() {
        let guard = SubmissionGuard::new();
        let form = Arc::new(MockForm::new("checkout", "#checkout"));
        assert!(guard.wire(form.clone()));
        assert!(!guard.wire(form));
        assert_eq!(guard.wired_count(), 1);
        assert!(guard.is_wired("checkout"));
        assert!(!guard.is_wired("newsletter"));
    }
}
