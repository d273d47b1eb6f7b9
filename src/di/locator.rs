use crate::di::Container;
use crate::error::Result;
use std::sync::Arc;

/// Capability to resolve services from a [`Container`].
///
/// Implemented by the container itself and by the application handle, so a
/// lifecycle hook can look up the services it needs without ambient globals.
pub trait ServiceLocator {
    fn container(&self) -> &Container;

    fn resolve<T: 'static + Send + Sync>(&self) -> Result<Arc<T>> {
        self.container().resolve::<T>()
    }

    fn resolve_trait<T: ?Sized + 'static + Send + Sync>(&self) -> Result<Arc<T>> {
        self.container().resolve_trait::<T>()
    }
}

impl ServiceLocator for Container {
    fn container(&self) -> &Container {
        self
    }
}
