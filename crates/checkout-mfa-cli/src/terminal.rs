//! Challenge surface drawn on the terminal

use colored::*;
use tracing::debug;

use checkout_mfa_core::{ChallengeHandle, ChallengeRenderer, ChallengeView};

/// Renders challenge updates as coloured lines on stdout.
pub struct TerminalRenderer;

impl ChallengeRenderer for TerminalRenderer {
    fn open(&self, view: &ChallengeView) {
        println!();
        println!("{}", "Verification required".bold());
        println!("  Methods: {}", view.methods_label().cyan());
        println!("  Expires in {}s", view.expires_in.as_secs());
    }

    fn show_error(&self, _handle: ChallengeHandle, message: &str) {
        println!("{} {}", "✗".red(), message);
    }

    fn close(&self, handle: ChallengeHandle) {
        debug!(%handle, "challenge surface closed");
    }

    fn show_success(&self) {
        println!("{} Verified", "✓".green());
    }

    fn show_notice(&self, message: &str) {
        println!("{} {}", "!".yellow(), message);
    }
}
