use super::Application;
use crate::error::{KernelError, Result};
use std::sync::{Arc, OnceLock};

/// Write-once holder of the application handle.
///
/// The first [`set`](AppRef::set) wins; later calls leave the stored handle
/// untouched and log a warning.
#[derive(Default)]
pub struct AppRef {
    app: OnceLock<Arc<Application>>,
}

impl AppRef {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle, or [`KernelError::HandleNotReady`] before `set`.
    pub fn get(&self) -> Result<Arc<Application>> {
        self.app.get().cloned().ok_or(KernelError::HandleNotReady)
    }

    pub fn set(&self, app: Arc<Application>) -> &Self {
        if self.app.set(app).is_err() {
            tracing::warn!("AppRef::set() has already been called; keeping the original application");
        }
        self
    }

    pub fn is_set(&self) -> bool {
        self.app.get().is_some()
    }
}
