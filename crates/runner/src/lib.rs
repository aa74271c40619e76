//! Concurrent runner for a set of named long-running processes with
//! graceful shutdown.
//!
//! Every process receives a shared [`CancellationToken`] and is expected to
//! return once it fires. The runner cancels the token on SIGINT/SIGTERM or
//! when any process returns an error, then executes the registered closers
//! under a timeout. `run` resolves to the process exit code so `main` stays
//! in charge of actually exiting.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type ProcessFuture = Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>;

/// A named long-running process: takes the shutdown token, runs until it is
/// cancelled or fails.
pub type Process = Box<dyn FnOnce(CancellationToken) -> ProcessFuture + Send>;

/// Cleanup executed after every process has stopped.
pub type Closer = Box<dyn FnOnce() -> ProcessFuture + Send>;

struct NamedProcess {
    name: String,
    start: Process,
}

pub struct Runner {
    processes: Vec<NamedProcess>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    token: CancellationToken,
}

impl Runner {
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            token: CancellationToken::new(),
        }
    }

    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.processes.push(NamedProcess {
            name: name.into(),
            start: Box::new(|token| Box::pin(process(token))),
        });
        self
    }

    /// Closers run after all processes have stopped, regardless of how they
    /// stopped. Every closer is attempted even when some fail.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Use an externally owned token, e.g. to cancel from a test.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    fn spawn_signal_handlers(token: &CancellationToken) {
        let ctrl_c_token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                ctrl_c_token.cancel();
            }
        });

        #[cfg(unix)]
        {
            let sigterm_token = token.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    info!("SIGTERM received");
                    sigterm_token.cancel();
                }
            });
        }
    }

    /// Run every process to completion and return the exit code: 0 for a
    /// clean shutdown, 1 when any process failed or panicked.
    pub async fn run(self) -> i32 {
        let token = self.token;
        let mut join_set = JoinSet::new();

        for process in self.processes {
            let process_token = token.clone();
            let name = process.name;
            let start = process.start;
            join_set.spawn(async move {
                let result = start(process_token).await;
                (name, result)
            });
        }

        Self::spawn_signal_handlers(&token);

        let mut failed = false;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    debug!(process = %name, "process completed");
                }
                Ok((name, Err(e))) => {
                    if !token.is_cancelled() {
                        error!(process = %name, error = %format!("{e:#}"), "process failed");
                        failed = true;
                        token.cancel();
                    } else {
                        debug!(process = %name, error = %format!("{e:#}"), "process error during shutdown");
                    }
                }
                Err(e) => {
                    error!(error = %e, "process panicked");
                    failed = true;
                    if !token.is_cancelled() {
                        token.cancel();
                    }
                }
            }
        }

        if !self.closers.is_empty() {
            info!(timeout_secs = self.closer_timeout.as_secs(), "running closers");
            let closed = tokio::time::timeout(
                self.closer_timeout,
                Self::run_closers(self.closers),
            )
            .await;
            if closed.is_err() {
                error!("closers timed out");
            }
        }

        if failed {
            1
        } else {
            0
        }
    }

    async fn run_closers(closers: Vec<Closer>) {
        let mut closer_set = JoinSet::new();
        for closer in closers {
            closer_set.spawn(closer());
        }
        while let Some(result) = closer_set.join_next().await {
            match result {
                Ok(Ok(())) => debug!("closer completed"),
                Ok(Err(e)) => error!(error = %format!("{e:#}"), "closer failed"),
                Err(e) => error!(error = %e, "closer panicked"),
            }
        }
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}
