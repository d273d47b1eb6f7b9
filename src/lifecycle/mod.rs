//! Lifecycle Module
//!
//! Sequences initialization and teardown work around the two milestones of a
//! running application.
//!
//! # Lifecycle Phases
//!
//! ```text
//! 1. Module Registration
//!    ↓
//! 2. Application object built, handle stored in AppRef
//!    ↓
//! 3. Created hooks (priority order)      ← Lifecycle Hook
//!    ↓
//! 4. Listener bound
//!    ↓
//! 5. Listening hooks (priority order)    ← Lifecycle Hook
//!    ↓
//! [Running...]
//!    ↓
//! 6. Shutdown Signal (SIGTERM/SIGINT), watchdog armed
//!    ↓
//! 7. Listener drained
//!    ↓
//! 8. OnApplicationShutdown               ← Lifecycle Hook
//!    ↓
//! 9. OnModuleDestroy (reverse order)     ← Lifecycle Hook
//!    ↓
//! 10. Watchdog disarmed
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use meshestra_kernel::lifecycle::{Hook, LifecycleRegistry, Milestone};
//!
//! registry.register(
//!     Milestone::Created,
//!     Hook::new(|app| async move {
//!         let db = app.resolve::<Database>()?;
//!         db.migrate().await
//!     })
//!     .named("migrations"),
//!     -10,
//! );
//! ```

mod app_ref;
mod application;
mod hook;
mod registry;
mod shutdown;
mod state;
mod traits;

pub use app_ref::AppRef;
pub use application::{Application, ApplicationBuilder};
pub use hook::{DEFAULT_PRIORITY, Hook, IntoHookResult, PrioritizedHook};
pub(crate) use hook::panic_message;
pub use registry::{LifecycleRegistry, Registration};
pub use shutdown::{
    DEFAULT_SHUTDOWN_TIMEOUT, ShutdownHooks, ShutdownSequencer, Signal, shutdown_signal,
};
pub use state::{LifecycleState, Milestone};
pub use traits::{OnApplicationShutdown, OnCreated, OnListening, OnModuleDestroy};
