//! Shutdown signalling for the listener and the tasks it spawned.
//!
//! [`ShutdownCoordinator::begin`] flips a [`CancellationToken`] that the
//! Axum listener waits on. [`ShutdownCoordinator::drain`] then gives the
//! listener tasks a bounded window to finish and reports any that did not.

use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a [`ShutdownCoordinator::drain`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every task finished inside the window.
    Completed,
    /// The window elapsed with `pending` tasks still running.
    TimedOut {
        /// Tasks that had not finished.
        pending: usize,
    },
}

/// Shared stop signal for the HTTP listener.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not been signalled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown begins. Each caller gets a child, so
    /// cancelling it does not stop anyone else.
    pub fn listener_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Signal shutdown. Returns `true` only for the call that started it.
    pub fn begin(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        info!("shutdown signalled");
        true
    }

    /// Whether [`ShutdownCoordinator::begin`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown, then wait up to `window` for `tasks` to finish.
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>, window: Duration) -> DrainOutcome {
        let _ = self.begin();

        let mut pending: FuturesUnordered<_> = tasks.into_iter().collect();
        debug!(tasks = pending.len(), ?window, "draining listener tasks");

        let drained = tokio::time::timeout(window, async {
            while let Some(joined) = pending.next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "listener task ended abnormally");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => DrainOutcome::Completed,
            Err(_) => {
                warn!(pending = pending.len(), ?window, "shutdown window elapsed");
                DrainOutcome::TimedOut {
                    pending: pending.len(),
                }
            }
        }
    }
}
