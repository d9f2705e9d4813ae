use std::future::Future;
use std::io;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Owns the process-wide cancellation token and fires it on SIGINT/SIGTERM.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Clone of the root token, for observation by tasks.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn wait_for_signal(&self) -> io::Result<()> {
        self.shutdown_on(termination_signal()).await
    }

    /// Waits for `signal` to resolve, then cancels the token.
    pub async fn shutdown_on<F>(&self, signal: F) -> io::Result<()>
    where
        F: Future<Output = io::Result<&'static str>>,
    {
        let name = signal.await?;
        info!("{} received. Cleaning up...", name);
        self.trigger();
        Ok(())
    }

    /// Cancels the token. Later calls have no effect.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn termination_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}
