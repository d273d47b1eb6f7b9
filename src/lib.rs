//! # Meshestra Kernel
//!
//! The lifecycle core of a Meshestra application host.
//!
//! The kernel takes a [`Module`] from nothing to a listening HTTP server (or to
//! a finished one-shot command) and decides *when* everything else runs:
//!
//! - **Lifecycle Registry**: hooks per milestone (`Created`, `Listening`), run
//!   in priority order, one at a time, with failures isolated per hook
//! - **Application Handle**: the running application, stored once and handed
//!   to every hook
//! - **Kernel**: memoized server bootstrap or standalone command run, with a
//!   fatal exit on failure
//! - **Shutdown Sequencer**: graceful teardown bounded by a watchdog
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use meshestra_kernel::prelude::*;
//!
//! struct AppModule;
//!
//! impl Module for AppModule {
//!     fn register(&self, container: &mut Container) -> Result<()> {
//!         let registry = container.resolve::<LifecycleRegistry>()?;
//!         registry.register(
//!             Milestone::Created,
//!             Hook::sync(|_app| tracing::info!("logger ready")),
//!             -10,
//!         );
//!         Ok(())
//!     }
//!
//!     fn router(&self, _container: &Container) -> Result<Router> {
//!         Ok(Router::new().route("/", get(|| async { "5" })))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = KernelInitOptions::from_args(std::env::args());
//!     if let Ok(app) = bootstrap(AppModule, options).await {
//!         app.stopped().await;
//!     }
//! }
//! ```

pub mod command;
pub mod config;
pub mod di;
pub mod error;
pub mod kernel;
pub mod lifecycle;
pub mod module;
pub mod process;

// Re-export core types
pub use di::{Container, ServiceLocator};
pub use error::{KernelError, Result};
pub use kernel::{BootstrapOutcome, Kernel, KernelBuilder, KernelInitOptions, bootstrap};
pub use module::Module;

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use meshestra_kernel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::command::{Command, CommandRunner};
    pub use crate::config::{AppConfig, ConfigService};
    pub use crate::di::{Container, ServiceLocator};
    pub use crate::error::{KernelError, Result};
    pub use crate::kernel::{
        AppMode, BootstrapOutcome, Kernel, KernelBuilder, KernelInitOptions, bootstrap,
    };
    pub use crate::lifecycle::{
        AppRef, Application, Hook, LifecycleRegistry, LifecycleState, Milestone,
        OnApplicationShutdown, OnCreated, OnListening, OnModuleDestroy, ShutdownHooks, Signal,
    };
    pub use crate::module::Module;
    pub use async_trait::async_trait;
    pub use axum::{Router, routing::get};
    pub use std::sync::Arc;
}
