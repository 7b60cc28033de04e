//! Process-level shutdown: close registered components once, in order.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Error type returned by [`Closeable::close`].
pub type CloseError = Box<dyn std::error::Error + Send + Sync>;

/// Something with an orderly close.
#[async_trait]
pub trait Closeable: Send + Sync {
    /// Name used in shutdown logs.
    fn name(&self) -> &str;

    async fn close(&self) -> Result<(), CloseError>;
}

/// What caused [`ShutdownCoordinator::wait`] to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// The parent token was cancelled.
    Cancelled,
}

/// Closes registered components in registration order when shutdown is triggered.
///
/// Closing happens at most once; later calls are no-ops.
#[derive(Default)]
pub struct ShutdownCoordinator {
    components: Mutex<Vec<Arc<dyn Closeable>>>,
    closed: Mutex<bool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, component: Arc<dyn Closeable>) {
        self.components.lock().await.push(component);
    }

    pub async fn len(&self) -> usize {
        self.components.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.components.lock().await.is_empty()
    }

    /// Close every component in order. Failures are logged and do not stop the rest.
    ///
    /// Returns the number of components that failed to close.
    pub async fn close_all(&self) -> usize {
        let mut closed = self.closed.lock().await;
        if *closed {
            return 0;
        }
        *closed = true;

        let components = self.components.lock().await.clone();
        let mut failures = 0;
        for component in components {
            match component.close().await {
                Ok(()) => info!(component = component.name(), "closed"),
                Err(e) => {
                    failures += 1;
                    error!(component = component.name(), error = %e, "failed to close");
                }
            }
        }
        failures
    }

    /// Wait for `trigger` to resolve, then close everything.
    pub async fn close_on<F>(&self, trigger: F) -> usize
    where
        F: Future<Output = ()>,
    {
        trigger.await;
        self.close_all().await
    }

    /// Wait for SIGINT, SIGTERM (unix) or `parent` cancellation, then close everything.
    pub async fn wait(&self, parent: &CancellationToken) -> ShutdownTrigger {
        let trigger = wait_for_signal(parent).await;
        info!(?trigger, "shutdown triggered");
        self.close_all().await;
        trigger
    }
}

#[cfg(unix)]
async fn wait_for_signal(parent: &CancellationToken) -> ShutdownTrigger {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            return wait_for_interrupt(parent).await;
        }
    };

    tokio::select! {
        trigger = wait_for_interrupt(parent) => trigger,
        _ = sigterm.recv() => ShutdownTrigger::Terminate,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal(parent: &CancellationToken) -> ShutdownTrigger {
    wait_for_interrupt(parent).await
}

async fn wait_for_interrupt(parent: &CancellationToken) -> ShutdownTrigger {
    tokio::select! {
        _ = parent.cancelled() => ShutdownTrigger::Cancelled,
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!(error = %e, "failed to listen for ctrl-c");
                parent.cancelled().await;
                return ShutdownTrigger::Cancelled;
            }
            ShutdownTrigger::Interrupt
        }
    }
}
