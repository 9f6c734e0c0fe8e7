// Author: Jacques Murray

//! Runtime-agnostic timers.
//!
//! The `tokio-timer` and `async-std-timer` feature flags decide which
//! runtime's sleep backs the delays between attempts and call deadlines.

use std::time::Duration;

use crate::context::{CallContext, Interrupt};

/// Sleeps for `duration` on the runtime selected by the crate's features.
///
/// Will produce a compile error if no timer feature is enabled.
pub(crate) async fn sleep(duration: Duration) {
    cfg_if::cfg_if! {
        if #[cfg(feature = "tokio-timer")] {
            tokio::time::sleep(duration).await;
        } else if #[cfg(feature = "async-std-timer")] {
            async_std::task::sleep(duration).await;
        } else {
            compile_error!("No async timer feature enabled. Please enable 'tokio-timer' or 'async-std-timer'.");
        }
    }
}

/// Waits out an inter-attempt delay unless the call context is cancelled or
/// its deadline passes first.
pub(crate) async fn pause(delay: Duration, context: &CallContext) -> Result<(), Interrupt> {
    if delay.is_zero() {
        return match context.interrupted() {
            Some(interrupt) => Err(interrupt),
            None => Ok(()),
        };
    }
    context.guard(sleep(delay)).await
}
