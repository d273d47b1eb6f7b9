//! Lifecycle Registry
//!
//! Holds the hooks of each milestone and runs them when the application
//! reaches it.

use super::hook::{DEFAULT_PRIORITY, insert_by_priority};
use super::{
    AppRef, Hook, LifecycleState, Milestone, OnCreated, OnListening, PrioritizedHook,
};
use crate::error::{KernelError, Result};
use futures::FutureExt;
use futures::task::noop_waker_ref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// What happened to a hook passed to [`LifecycleRegistry::register`].
#[derive(Debug)]
pub enum Registration {
    /// Stored; it runs when the milestone is reached.
    Deferred,
    /// The milestone had already passed and the hook ran to completion
    /// inside `register`.
    Completed,
    /// The milestone had already passed and the hook suspended on its first
    /// poll; the rest of it runs as a task.
    Immediate(JoinHandle<()>),
}

impl Registration {
    /// Wait until an immediately executed hook has finished.
    ///
    /// Resolves at once for deferred hooks.
    pub async fn finished(self) {
        if let Registration::Immediate(handle) = self {
            if let Err(e) = handle.await {
                tracing::warn!("Late lifecycle hook task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Registration::Deferred)
    }
}

#[derive(Default)]
struct RegistryInner {
    state: LifecycleState,
    created: Vec<PrioritizedHook>,
    listening: Vec<PrioritizedHook>,
}

impl RegistryInner {
    fn hooks_mut(&mut self, milestone: Milestone) -> &mut Vec<PrioritizedHook> {
        match milestone {
            Milestone::Created => &mut self.created,
            Milestone::Listening => &mut self.listening,
        }
    }

    fn hooks(&self, milestone: Milestone) -> &[PrioritizedHook] {
        match milestone {
            Milestone::Created => &self.created,
            Milestone::Listening => &self.listening,
        }
    }
}

/// Registers hooks per milestone and runs them in priority order
///
/// - Lower priority values run first; equal priorities keep registration order.
/// - Hooks of one milestone run one after another, never concurrently.
/// - A failing hook is logged and the next one still runs.
/// - A hook registered for a milestone that has already been reached runs
///   immediately, exactly once, and is not stored.
///
/// # Example
///
/// ```rust,ignore
/// use meshestra_kernel::lifecycle::{Hook, LifecycleRegistry, Milestone};
///
/// registry.on_created(Hook::sync(|_app| tracing::info!("warming caches")));
/// registry.register(Milestone::Created, Hook::sync(|_app| init_logger()), -10_000);
///
/// registry.transition(Milestone::Created).await?;
/// ```
pub struct LifecycleRegistry {
    app_ref: Arc<AppRef>,
    inner: Mutex<RegistryInner>,
}

impl LifecycleRegistry {
    /// Create a registry that hands hooks the application stored in `app_ref`
    pub fn new(app_ref: Arc<AppRef>) -> Self {
        Self {
            app_ref,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// Register `hook` for `milestone` at `priority`.
    ///
    /// Once the milestone has been reached the hook runs inside this call
    /// instead of being stored. A hook that does not suspend has finished when
    /// `register` returns; one that does is driven to completion on the
    /// current tokio runtime, so this must then be called from within one.
    pub fn register(&self, milestone: Milestone, hook: Hook, priority: i64) -> Registration {
        let mut inner = self.lock();

        if inner.state >= LifecycleState::from(milestone) {
            drop(inner);
            tracing::debug!(
                "Milestone {} already reached, running {} immediately",
                milestone,
                hook.label()
            );
            return self.run_late(milestone, hook);
        }

        insert_by_priority(inner.hooks_mut(milestone), PrioritizedHook { hook, priority });
        Registration::Deferred
    }

    /// Register a hook for [`Milestone::Created`] at the default priority
    pub fn on_created(&self, hook: Hook) -> Registration {
        self.register(Milestone::Created, hook, DEFAULT_PRIORITY)
    }

    /// Register a hook for [`Milestone::Listening`] at the default priority
    pub fn on_listening(&self, hook: Hook) -> Registration {
        self.register(Milestone::Listening, hook, DEFAULT_PRIORITY)
    }

    /// Register a service implementing [`OnCreated`]
    pub fn register_created_service<T>(&self, service: Arc<T>, priority: i64) -> Registration
    where
        T: OnCreated + 'static,
    {
        self.register(Milestone::Created, Hook::created(service), priority)
    }

    /// Register a service implementing [`OnListening`]
    pub fn register_listening_service<T>(&self, service: Arc<T>, priority: i64) -> Registration
    where
        T: OnListening + 'static,
    {
        self.register(Milestone::Listening, Hook::listening(service), priority)
    }

    /// Move to `milestone` and run its hooks sequentially.
    ///
    /// Resolves once every stored hook has finished, whether it succeeded or
    /// not. Transitioning to the current milestone runs its stored hooks again.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidTransition`] if `milestone` is earlier
    /// than the current state; no hook runs in that case.
    pub async fn transition(&self, milestone: Milestone) -> Result<()> {
        let target = LifecycleState::from(milestone);

        let hooks = {
            let mut inner = self.lock();
            if target < inner.state {
                return Err(KernelError::InvalidTransition {
                    from: inner.state,
                    to: target,
                });
            }
            inner.state = target;
            inner.hooks(milestone).to_vec()
        };

        tracing::debug!("State changed to: {}", target);

        if hooks.is_empty() {
            return Ok(());
        }

        for entry in &hooks {
            run_isolated(&self.app_ref, milestone, &entry.hook).await;
        }

        tracing::info!(
            "{} hooks complete ({} hooks executed)",
            milestone,
            hooks.len()
        );
        Ok(())
    }

    fn run_late(&self, milestone: Milestone, hook: Hook) -> Registration {
        let app_ref = Arc::clone(&self.app_ref);
        let mut late = async move {
            run_isolated(&app_ref, milestone, &hook).await;
        }
        .boxed();

        let mut cx = Context::from_waker(noop_waker_ref());
        match late.poll_unpin(&mut cx) {
            Poll::Ready(()) => Registration::Completed,
            Poll::Pending => Registration::Immediate(tokio::spawn(late)),
        }
    }

    /// Number of stored hooks for `milestone`
    pub fn hook_count(&self, milestone: Milestone) -> usize {
        self.lock().hooks(milestone).len()
    }
}

/// Run one hook, logging instead of propagating its failure.
async fn run_isolated(app_ref: &AppRef, milestone: Milestone, hook: &Hook) {
    tracing::debug!("Running {} hook: {}", milestone, hook.label());

    let outcome = match app_ref.get() {
        Ok(app) => hook.execute(app).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = outcome {
        tracing::warn!("{} hook {} failed: {:#}", milestone, hook.label(), e);
    }
}
