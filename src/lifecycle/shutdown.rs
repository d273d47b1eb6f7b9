//! Graceful Shutdown
//!
//! Listens for OS signals and bounds how long the graceful teardown may take.

use super::{Application, Hook, OnApplicationShutdown, OnModuleDestroy};
use crate::error::KernelError;
use crate::process::{ProcessExit, format_memory_usage, resident_memory};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use strum_macros::Display;
use tokio::signal;
use tokio::task::JoinHandle;

/// Time the graceful teardown gets before the process is forced down.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(25);

/// Why the application is shutting down. Only used in log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Signal {
    #[strum(serialize = "SIGINT")]
    Interrupt,
    #[strum(serialize = "SIGTERM")]
    Terminate,
    /// Shutdown requested through [`Application::request_shutdown`].
    #[strum(serialize = "manual")]
    Requested,
}

/// Resolves when the process receives Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never resolves, leaving
/// the other one in charge.
///
/// # Example
///
/// ```rust,ignore
/// use meshestra_kernel::lifecycle::shutdown_signal;
///
/// let signal = shutdown_signal().await;
/// tracing::info!("Received {}", signal);
/// ```
pub async fn shutdown_signal() -> Signal {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
            Signal::Interrupt
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
            Signal::Terminate
        },
    }
}

/// Bounds the graceful shutdown with a watchdog
///
/// [`begin`](Self::begin) arms a timer; if [`complete`](Self::complete) is not
/// reached before it fires, the process exits with status `1`.
///
/// # Example
///
/// ```rust,ignore
/// let sequencer = ShutdownSequencer::new(Arc::new(ProcessTerminator));
/// let signal = shutdown_signal().await;
/// sequencer.run(signal, async { app.close().await.ok(); }).await;
/// ```
pub struct ShutdownSequencer {
    timeout: Duration,
    exit: Arc<dyn ProcessExit>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl ShutdownSequencer {
    pub fn new(exit: Arc<dyn ProcessExit>) -> Self {
        Self::with_timeout(exit, DEFAULT_SHUTDOWN_TIMEOUT)
    }

    pub fn with_timeout(exit: Arc<dyn ProcessExit>, timeout: Duration) -> Self {
        Self {
            timeout,
            exit,
            watchdog: Mutex::new(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn watchdog(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.watchdog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log the signal and arm the watchdog.
    ///
    /// Must be called from within a tokio runtime.
    pub fn begin(&self, signal: Signal) {
        tracing::info!(
            "Received signal: {}. Starting graceful shutdown sequence...",
            signal
        );

        let timeout = self.timeout;
        let exit = Arc::clone(&self.exit);
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::error!(
                "{}. Forcing exit (exit code 1).",
                KernelError::ShutdownTimeout(timeout)
            );
            exit.exit(1);
        });

        if let Some(previous) = self.watchdog().replace(watchdog) {
            previous.abort();
        }
    }

    /// Disarm the watchdog and report memory usage.
    pub fn complete(&self, signal: Signal) {
        if let Some(watchdog) = self.watchdog().take() {
            watchdog.abort();
        }

        tracing::info!(
            "Application shutdown complete ({}). {}",
            signal,
            format_memory_usage(resident_memory())
        );
    }

    /// Whether a watchdog is currently armed
    pub fn is_armed(&self) -> bool {
        self.watchdog()
            .as_ref()
            .is_some_and(|watchdog| !watchdog.is_finished())
    }

    /// Arm the watchdog, run `teardown`, then disarm it.
    pub async fn run<F>(&self, signal: Signal, teardown: F)
    where
        F: Future<Output = ()>,
    {
        self.begin(signal);
        teardown.await;
        self.complete(signal);
    }
}

impl Drop for ShutdownSequencer {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog().take() {
            watchdog.abort();
        }
    }
}

/// Teardown hooks run by the graceful shutdown.
///
/// Shutdown hooks run in registration order. Destroy hooks run afterwards in
/// **reverse** registration order, so services registered first are released
/// last.
#[derive(Default)]
pub struct ShutdownHooks {
    on_shutdown: Mutex<Vec<Hook>>,
    on_destroy: Mutex<Vec<Hook>>,
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_shutdown(&self, hook: Hook) {
        lock(&self.on_shutdown).push(hook);
    }

    pub fn on_destroy(&self, hook: Hook) {
        lock(&self.on_destroy).push(hook);
    }

    /// Register a service implementing [`OnApplicationShutdown`]
    pub fn register_shutdown_service<T>(&self, service: Arc<T>)
    where
        T: OnApplicationShutdown + 'static,
    {
        self.on_shutdown(Hook::shutdown(service));
    }

    /// Register a service implementing [`OnModuleDestroy`]
    pub fn register_destroy_service<T>(&self, service: Arc<T>)
    where
        T: OnModuleDestroy + 'static,
    {
        self.on_destroy(Hook::destroy(service));
    }

    /// Run every shutdown hook, then every destroy hook in reverse.
    pub async fn run(&self, app: Arc<Application>) {
        let shutdown = lock(&self.on_shutdown).clone();
        let destroy = lock(&self.on_destroy).clone();

        tracing::debug!("Calling {} shutdown hooks", shutdown.len());
        for hook in &shutdown {
            if let Err(e) = hook.execute(Arc::clone(&app)).await {
                tracing::error!("Shutdown hook {} failed: {:#}", hook.label(), e);
            }
        }

        tracing::debug!("Calling {} destroy hooks", destroy.len());
        for hook in destroy.iter().rev() {
            if let Err(e) = hook.execute(Arc::clone(&app)).await {
                tracing::error!("Destroy hook {} failed: {:#}", hook.label(), e);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::Container;
    use crate::process::RecordingExit;
    use async_trait::async_trait;

    fn sequencer(exit: &RecordingExit, timeout: Duration) -> ShutdownSequencer {
        ShutdownSequencer::with_timeout(Arc::new(exit.clone()), timeout)
    }

    #[test]
    fn signals_render_like_their_os_names() {
        assert_eq!(Signal::Interrupt.to_string(), "SIGINT");
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM");
        assert_eq!(Signal::Requested.to_string(), "manual");
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_forces_exit_when_teardown_overruns() {
        let exit = RecordingExit::new();
        let sequencer = sequencer(&exit, Duration::from_secs(25));

        sequencer.begin(Signal::Terminate);
        assert!(sequencer.is_armed());

        // Teardown still running at 30s.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(exit.codes(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn completing_in_time_disarms_the_watchdog() {
        let exit = RecordingExit::new();
        let sequencer = sequencer(&exit, Duration::from_secs(25));

        sequencer
            .run(Signal::Interrupt, tokio::time::sleep(Duration::from_secs(2)))
            .await;
        assert!(!sequencer.is_armed());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(exit.codes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn complete_without_begin_is_harmless() {
        let exit = RecordingExit::new();
        let sequencer = sequencer(&exit, Duration::from_millis(10));

        sequencer.complete(Signal::Requested);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(exit.codes().is_empty());
    }

    struct Releasable {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl OnModuleDestroy for Releasable {
        async fn on_module_destroy(&self, _app: Arc<Application>) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("destroy:{}", self.name));
            Ok(())
        }
    }

    #[async_trait]
    impl OnApplicationShutdown for Releasable {
        async fn on_application_shutdown(&self, _app: Arc<Application>) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("shutdown:{}", self.name));
            anyhow::bail!("{} refused to stop", self.name)
        }
    }

    #[tokio::test]
    async fn destroy_hooks_run_in_reverse_after_shutdown_hooks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = ShutdownHooks::new();

        for name in ["database", "cache"] {
            let service = Arc::new(Releasable {
                name,
                log: Arc::clone(&log),
            });
            hooks.register_shutdown_service(Arc::clone(&service));
            hooks.register_destroy_service(service);
        }

        let app = Arc::new(
            Application::builder()
                .container(Container::new())
                .build()
                .unwrap(),
        );
        hooks.run(app).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "shutdown:database",
                "shutdown:cache",
                "destroy:cache",
                "destroy:database",
            ]
        );
    }
}
