//! Host page collaborators.
//!
//! The gate never touches a UI toolkit directly. The hosting page implements these
//! traits; the gate calls into them to render surfaces and to release submissions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifies one rendered challenge surface.
///
/// A fresh handle is issued every time a surface opens, so responses that arrive
/// for an older surface can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChallengeHandle(pub u64);

impl fmt::Display for ChallengeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "challenge-{}", self.0)
    }
}

/// What a challenge surface shows.
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeView {
    pub handle: ChallengeHandle,
    /// Available verification methods, in service order. Never empty.
    pub methods: Vec<String>,
    /// Advisory lifetime of the code, shown to the user.
    pub expires_in: Duration,
}

impl ChallengeView {
    /// Method list as displayed, e.g. `otp, sms`.
    pub fn methods_label(&self) -> String {
        self.methods.join(", ")
    }
}

/// How the user dismissed a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissReason {
    CloseButton,
    OutsideClick,
    CancelKey,
}

/// Renders challenge and acknowledgment surfaces.
pub trait ChallengeRenderer: Send + Sync {
    /// Show a challenge surface with a code input.
    fn open(&self, view: &ChallengeView);

    /// Show an inline error on an open surface.
    fn show_error(&self, handle: ChallengeHandle, message: &str);

    /// Tear down a surface. Must tolerate handles that are already closed.
    fn close(&self, handle: ChallengeHandle);

    /// Acknowledge a successful verification.
    fn show_success(&self);

    /// Inline notice next to the checkout form (validation or decision failures).
    fn show_notice(&self, message: &str);
}

/// Read access to the hosting page.
pub trait CheckoutPage: Send + Sync {
    /// Current value of a named form field.
    fn field(&self, name: &str) -> Option<String>;

    /// Forms matched by a selector.
    fn forms(&self, selector: &str) -> Vec<Arc<dyn CheckoutForm>>;
}

/// An interceptable checkout form.
pub trait CheckoutForm: Send + Sync {
    /// Stable identity used for idempotent wiring.
    fn id(&self) -> String;

    /// Create or overwrite a hidden input.
    fn set_hidden_field(&self, name: &str, value: &str);

    /// Re-trigger native submission.
    fn submit(&self);
}

/// A page with no fields and no forms.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlankPage;

impl CheckoutPage for BlankPage {
    fn field(&self, _name: &str) -> Option<String> {
        None
    }

    fn forms(&self, _selector: &str) -> Vec<Arc<dyn CheckoutForm>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_label_joins_in_order() {
        let view = ChallengeView {
            handle: ChallengeHandle(1),
            methods: vec!["otp".into(), "sms".into()],
            expires_in: Duration::from_secs(300),
        };
        assert_eq!(view.methods_label(), "otp, sms");
        assert_eq!(view.handle.to_string(), "challenge-1");
    }

    #[test]
    fn blank_page_has_nothing() {
        assert!(BlankPage.field("amount").is_none());
        assert!(BlankPage.forms("#checkout").is_empty());
    }
}
