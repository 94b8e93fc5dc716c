//! Ctrl-C handling while apply or destroy runs

use anyhow::{Context as AnyhowContext, Result};
use declarative::CancelToken;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::ui;

/// Exit code when a second interrupt ends the process
const EXIT_INTERRUPTED: i32 = 130;

/// Routes interrupts to a run's cancellation token
struct Interrupt {
    cancel: CancelToken,
    seen: AtomicBool,
}

impl Interrupt {
    fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            seen: AtomicBool::new(false),
        }
    }

    /// Cancel on the first interrupt; returns true once the process should exit
    fn handle(&self) -> bool {
        if self.seen.swap(true, Ordering::SeqCst) {
            return true;
        }
        self.cancel.cancel();
        false
    }
}

/// Install the Ctrl-C handler for one run.
///
/// The first Ctrl-C stops dispatch; actions already running finish and
/// commit, and the state lock is released normally. A second Ctrl-C exits
/// at once and leaves the lock behind.
pub fn install(cancel: CancelToken) -> Result<()> {
    let interrupt = Interrupt::new(cancel);
    ctrlc::set_handler(move || {
        if interrupt.handle() {
            ui::error("Interrupted again, exiting. Run `strata state unlock` before the next apply");
            std::process::exit(EXIT_INTERRUPTED);
        }
        log::warn!("Interrupt received, cancelling");
        ui::warn("Interrupted: waiting for running actions to finish (Ctrl-C again to exit now)");
    })
    .context("Failed to install the Ctrl-C handler")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_interrupt_cancels_second_exits() {
        let token = CancelToken::new();
        let interrupt = Interrupt::new(token.clone());

        assert!(!interrupt.handle());
        assert!(token.is_cancelled());
        assert!(interrupt.handle());
    }

    #[test]
    fn test_fail_fast_cancel_is_not_an_interrupt() {
        let token = CancelToken::new();
        let interrupt = Interrupt::new(token.clone());
        token.cancel();
        assert!(!interrupt.handle());
    }
}
