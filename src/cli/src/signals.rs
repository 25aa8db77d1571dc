//! Cancellation triggers: Ctrl-C, SIGTERM and the invocation deadline.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

async fn interrupt() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending::<()>().await,
    }
}

/// Raise `shutdown` on the first of Ctrl-C, SIGTERM or `timeout` elapsing.
///
/// Abort the returned task once the invocation is over.
pub fn spawn_shutdown_trigger(
    shutdown: watch::Sender<bool>,
    timeout: Option<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = tokio::select! {
            _ = interrupt() => "interrupt",
            _ = terminate() => "terminate",
            _ = deadline(timeout) => "deadline",
        };
        tracing::warn!(reason, "Cancelling invocation");
        let _ = shutdown.send(true);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_raises_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let handle = spawn_shutdown_trigger(tx, Some(Duration::from_millis(10)));

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_deadline_stays_quiet() {
        let (tx, rx) = watch::channel(false);
        let handle = spawn_shutdown_trigger(tx, None);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!*rx.borrow());
        handle.abort();
    }
}
