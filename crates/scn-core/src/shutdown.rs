//! Session teardown.
//!
//! Each connected session hands out a [`ShutdownHandle`]. Finalizing it
//! leaves the joined service and stops the inbound RPC server. The
//! application decides when that happens, typically on a termination signal:
//!
//! ```rust,ignore
//! let (scn, shutdown) = ScnManager::connect().await?;
//! // ...
//! scn_core::shutdown::finalize_on_signal(&[shutdown]).await?;
//! ```

use crate::manager::Session;
use crate::Result;
use std::sync::Arc;
use tracing::info;

/// Finalizes one SCN session. Cloning yields handles to the same session.
#[derive(Clone)]
pub struct ShutdownHandle {
    session: Arc<Session>,
}

impl ShutdownHandle {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Leave the service (if joined) and stop the inbound listener.
    ///
    /// Both steps are attempted even if leaving fails. Only the first call
    /// has any effect.
    pub async fn finalize(&self) {
        self.session.finalize().await
    }

    pub fn is_finalized(&self) -> bool {
        self.session.is_finalized()
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

/// Wait for Ctrl+C, or SIGTERM on Unix.
pub async fn termination_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

/// Wait for a termination signal, then finalize every handle.
pub async fn finalize_on_signal(handles: &[ShutdownHandle]) -> Result<()> {
    termination_signal().await?;
    info!("Termination signal received, finalizing {} session(s)", handles.len());

    for handle in handles {
        handle.finalize().await;
    }
    Ok(())
}
