use std::sync::Arc;

use parking_lot::RwLock;

use crate::challenge::VerifiedToken;
use crate::context::TransactionContext;
use crate::decision::Decision;
use crate::host::{ChallengeHandle, ChallengeView};

/// Notifications emitted to the host page.
#[derive(Debug, Clone)]
pub enum GateEvent {
    /// A decision required a challenge and a surface was opened.
    ChallengeRequired {
        decision: Decision,
        context: TransactionContext,
    },
    /// The open challenge was verified.
    Verified {
        handle: ChallengeHandle,
        token: VerifiedToken,
    },
    /// The user asked for a new code and the cooldown allowed it. Code delivery is
    /// the host's (or the service's) job.
    CodeResendRequested {
        user_id: String,
        view: ChallengeView,
    },
}

impl GateEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChallengeRequired { .. } => "challenge_required",
            Self::Verified { .. } => "verified",
            Self::CodeResendRequested { .. } => "code_resend_requested",
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&GateEvent) + Send + Sync>;

/// Handler registry. Handlers run synchronously, in registration order.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<EventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: EventHandler) {
        self.handlers.write().push(handler);
    }

    pub fn emit(&self, event: &GateEvent) {
        // Snapshot so handlers may subscribe without deadlocking.
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
