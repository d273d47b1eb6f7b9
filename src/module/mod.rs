use crate::command::Command;
use crate::di::Container;
use crate::error::Result;
use axum::Router;
use std::sync::Arc;

/// Trait for application modules
///
/// A module describes the application to the kernel: the services it
/// provides, the routes it serves, and the one-shot commands it offers in
/// standalone mode. The kernel never inspects it otherwise.
///
/// # Example
/// ```rust,ignore
/// use meshestra_kernel::prelude::*;
///
/// pub struct AppModule;
///
/// impl Module for AppModule {
///     fn register(&self, container: &mut Container) -> Result<()> {
///         container.register(UserService::new());
///         Ok(())
///     }
///
///     fn router(&self, container: &Container) -> Result<Router> {
///         let users = container.resolve::<UserService>()?;
///         Ok(Router::new().route("/users", get(list_users)).with_state(users))
///     }
/// }
/// ```
pub trait Module: Send + Sync + 'static {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Register all providers in this module
    fn register(&self, container: &mut Container) -> Result<()>;

    /// Routes served once the application listens
    fn router(&self, _container: &Container) -> Result<Router> {
        Ok(Router::new())
    }

    /// Commands available in standalone mode
    fn commands(&self, _container: &Container) -> Vec<Arc<dyn Command>> {
        Vec::new()
    }
}
