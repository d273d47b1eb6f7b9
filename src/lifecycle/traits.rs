//! Lifecycle hook traits
//!
//! Services that prefer a type over a closure implement one of these traits and
//! are registered with [`Hook::created`], [`Hook::listening`],
//! [`Hook::shutdown`] or [`Hook::destroy`].

use super::{Application, Hook};
use async_trait::async_trait;
use std::sync::Arc;

/// Called when the application object exists but is not listening yet
///
/// Use this hook to:
/// - Open database connections
/// - Warm up caches
/// - Add layers to the router before it is served
///
/// # Example
///
/// ```rust,ignore
/// use meshestra_kernel::lifecycle::{Application, OnCreated};
/// use async_trait::async_trait;
///
/// #[async_trait]
/// impl OnCreated for DatabaseService {
///     async fn on_created(&self, _app: Arc<Application>) -> anyhow::Result<()> {
///         self.pool.connect().await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait OnCreated: Send + Sync {
    async fn on_created(&self, app: Arc<Application>) -> anyhow::Result<()>;
}

/// Called once the listener is bound
///
/// Use this hook to:
/// - Run final health checks
/// - Notify external services
/// - Start background jobs
#[async_trait]
pub trait OnListening: Send + Sync {
    async fn on_listening(&self, app: Arc<Application>) -> anyhow::Result<()>;
}

/// Called when the application receives a shutdown signal
///
/// Invoked after the listener has drained, before any
/// [`OnModuleDestroy`] hook.
#[async_trait]
pub trait OnApplicationShutdown: Send + Sync {
    async fn on_application_shutdown(&self, app: Arc<Application>) -> anyhow::Result<()>;
}

/// Called when the application is shutting down
///
/// # Note
///
/// Destroy hooks run in **reverse order** of their registration so that
/// services registered early (and depended upon) are released last.
#[async_trait]
pub trait OnModuleDestroy: Send + Sync {
    async fn on_module_destroy(&self, app: Arc<Application>) -> anyhow::Result<()>;
}

impl Hook {
    /// Hook that calls [`OnCreated::on_created`] on `service`.
    pub fn created<T: OnCreated + 'static>(service: Arc<T>) -> Self {
        Hook::new(move |app| {
            let service = Arc::clone(&service);
            async move { service.on_created(app).await }
        })
        .named(std::any::type_name::<T>())
    }

    /// Hook that calls [`OnListening::on_listening`] on `service`.
    pub fn listening<T: OnListening + 'static>(service: Arc<T>) -> Self {
        Hook::new(move |app| {
            let service = Arc::clone(&service);
            async move { service.on_listening(app).await }
        })
        .named(std::any::type_name::<T>())
    }

    /// Hook that calls [`OnApplicationShutdown::on_application_shutdown`] on `service`.
    pub fn shutdown<T: OnApplicationShutdown + 'static>(service: Arc<T>) -> Self {
        Hook::new(move |app| {
            let service = Arc::clone(&service);
            async move { service.on_application_shutdown(app).await }
        })
        .named(std::any::type_name::<T>())
    }

    /// Hook that calls [`OnModuleDestroy::on_module_destroy`] on `service`.
    pub fn destroy<T: OnModuleDestroy + 'static>(service: Arc<T>) -> Self {
        Hook::new(move |app| {
            let service = Arc::clone(&service);
            async move { service.on_module_destroy(app).await }
        })
        .named(std::any::type_name::<T>())
    }
}
