//! Application handle
//!
//! The running application object shared with every hook: the service
//! container built from the module descriptor, the router waiting to be
//! served, and the listener once it is bound.

use super::Signal;
use crate::di::{Container, ServiceLocator};
use crate::error::{KernelError, Result};
use crate::kernel::ServerAdapter;
use axum::Router;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The application handle
///
/// Created once per bootstrap and handed to hooks as `Arc<Application>`.
///
/// # Example
///
/// ```rust,ignore
/// registry.on_created(Hook::sync(|app: Arc<Application>| {
///     let db = app.resolve::<Database>()?;
///     app.map_router(|router| router.layer(Extension(db)))
/// }));
/// ```
pub struct Application {
    name: String,
    container: Arc<Container>,
    adapter: ServerAdapter,
    router: Mutex<Option<Router>>,
    local_addr: OnceLock<SocketAddr>,
    server: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
    drain: watch::Sender<bool>,
    shutdown_request: watch::Sender<Option<Signal>>,
    stopped: watch::Sender<bool>,
}

impl Application {
    /// Create a new application builder
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a reference to the container
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn adapter(&self) -> &ServerAdapter {
        &self.adapter
    }

    /// Replace the router before it is served.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::AlreadyListening`] once [`listen`](Self::listen)
    /// has taken the router.
    pub fn map_router<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(Router) -> Router,
    {
        let mut router = lock(&self.router);
        let current = router.take().ok_or(KernelError::AlreadyListening)?;
        *router = Some(f(current));
        Ok(())
    }

    /// Bind `host:port` and start serving the router in the background.
    ///
    /// Returns the bound address, which differs from the requested one when
    /// `port` is `0`.
    pub async fn listen(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let address = format!("{host}:{port}");
        let router = lock(&self.router)
            .take()
            .ok_or(KernelError::AlreadyListening)?;

        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| KernelError::listen(&address, e))?
            .next()
            .ok_or_else(|| {
                KernelError::listen(
                    &address,
                    std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no resolved address"),
                )
            })?;

        let listener = self
            .adapter
            .bind(addr)
            .map_err(|e| KernelError::listen(&address, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| KernelError::listen(&address, e))?;

        let mut drain = self.drain.subscribe();
        let server = self.adapter.serve(listener, router, async move {
            let _ = drain.wait_for(|draining| *draining).await;
        });

        *lock(&self.server) = Some(server);
        let _ = self.local_addr.set(local_addr);

        tracing::debug!("Listener bound on {}", local_addr);
        Ok(local_addr)
    }

    /// Address the listener is bound to, if listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Base URL of the listener, if listening
    ///
    /// Unspecified bind addresses are reported as loopback.
    pub fn url(&self) -> Option<String> {
        self.local_addr().map(|addr| {
            let ip = if addr.ip().is_unspecified() {
                match addr {
                    SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
                    SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
                }
            } else {
                addr.ip()
            };
            format!("http://{}", SocketAddr::new(ip, addr.port()))
        })
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    ///
    /// A no-op when the application never started listening.
    pub async fn close(&self) -> Result<()> {
        self.drain.send_replace(true);

        let server = lock(&self.server).take();
        if let Some(server) = server {
            let address = self
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default();
            server
                .await
                .map_err(|e| KernelError::Internal(format!("Server task failed: {e}")))?
                .map_err(|e| KernelError::listen(address, e))?;
            tracing::info!("Listener closed");
        }
        Ok(())
    }

    /// Ask the armed shutdown sequence to run as if `signal` had been received.
    pub fn request_shutdown(&self, signal: Signal) {
        self.shutdown_request.send_replace(Some(signal));
    }

    /// Resolves once shutdown has been requested through
    /// [`request_shutdown`](Self::request_shutdown).
    pub async fn shutdown_requested(&self) -> Signal {
        let mut requests = self.shutdown_request.subscribe();
        let requested = requests
            .wait_for(Option::is_some)
            .await
            .ok()
            .map(|signal| (*signal).unwrap_or(Signal::Requested));

        match requested {
            Some(signal) => signal,
            // The sender lives as long as `self`, so this cannot close first.
            None => std::future::pending().await,
        }
    }

    pub(crate) fn mark_stopped(&self) {
        self.stopped.send_replace(true);
    }

    /// Resolves once the graceful shutdown sequence has completed.
    pub async fn stopped(&self) {
        let mut stopped = self.stopped.subscribe();
        let _ = stopped.wait_for(|s| *s).await;
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }
}

impl ServiceLocator for Application {
    fn container(&self) -> &Container {
        &self.container
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for Application
pub struct ApplicationBuilder {
    name: Option<String>,
    container: Option<Container>,
    adapter: ServerAdapter,
    router: Router,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBuilder {
    /// Create a new application builder
    pub fn new() -> Self {
        Self {
            name: None,
            container: None,
            adapter: ServerAdapter::default(),
            router: Router::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the DI container
    pub fn container(mut self, container: Container) -> Self {
        self.container = Some(container);
        self
    }

    /// Set the network adapter used by [`Application::listen`]
    pub fn adapter(mut self, adapter: ServerAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Build the application object
    ///
    /// # Errors
    ///
    /// Returns an error if no container was provided.
    pub fn build(self) -> Result<Application> {
        let container = self
            .container
            .ok_or_else(|| KernelError::Internal("Container not provided".to_string()))?;

        Ok(Application {
            name: self.name.unwrap_or_else(|| "application".to_string()),
            container: Arc::new(container),
            adapter: self.adapter,
            router: Mutex::new(Some(self.router)),
            local_addr: OnceLock::new(),
            server: Mutex::new(None),
            drain: watch::channel(false).0,
            shutdown_request: watch::channel(None).0,
            stopped: watch::channel(false).0,
        })
    }
}
