//! Ctrl-C handling
//!
//! The first interrupt raises the run's [`CancelToken`]: no further ops are
//! started, and a fail-fast run still rolls back what it changed. A second
//! interrupt exits immediately.

use crate::ui;
use anyhow::{Context, Result};
use declarative::CancelToken;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Exit status of a process killed by SIGINT
const INTERRUPTED_EXIT: i32 = 130;

pub fn set_up_cancel_handler() -> Result<CancelToken> {
    let token = CancelToken::new();
    let presses = Arc::new(AtomicUsize::new(0));
    let handler_token = token.clone();
    ctrlc::set_handler(move || on_interrupt(&handler_token, &presses))
        .context("Error setting interrupt handler")?;
    Ok(token)
}

fn on_interrupt(token: &CancelToken, presses: &AtomicUsize) {
    if presses.fetch_add(1, Ordering::SeqCst) == 0 {
        ui::warn("Interrupted: finishing the current operation, press Ctrl-C again to exit now");
        token.cancel();
    } else {
        std::process::exit(INTERRUPTED_EXIT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_interrupt_cancels() {
        let token = CancelToken::new();
        let presses = AtomicUsize::new(0);
        on_interrupt(&token, &presses);
        assert!(token.is_cancelled());
        assert_eq!(presses.load(Ordering::SeqCst), 1);
    }
}
