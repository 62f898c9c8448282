//! Termination-signal plumbing.
//!
//! Resolves once the operating system asks the process to stop. Logging and
//! shutdown policy stay with the caller; this module only names the signal.

/// Waits for a termination request and returns the signal's name.
///
/// Unix listens for both SIGINT and SIGTERM; other platforms get Ctrl+C.
/// Calling this a second time re-arms the listeners, which the application
/// uses to turn a repeated signal into an immediate exit.
pub async fn shutdown_requested() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        Ok(name)
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("Ctrl+C")
    }
}
