//! Hook values.
//!
//! A hook is any closure taking the application handle. Synchronous closures,
//! async closures, and closures returning `()` or a `Result` are all stored the
//! same way: as a shared function producing a boxed future of
//! `anyhow::Result<()>`.

use super::Application;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::borrow::Cow;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Priority used when none is given.
pub const DEFAULT_PRIORITY: i64 = 0;

type HookFn = dyn Fn(Arc<Application>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Values a hook body may produce.
pub trait IntoHookResult {
    fn into_hook_result(self) -> anyhow::Result<()>;
}

impl IntoHookResult for () {
    fn into_hook_result(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<T, E> IntoHookResult for Result<T, E>
where
    E: std::fmt::Display,
{
    fn into_hook_result(self) -> anyhow::Result<()> {
        self.map(|_| ()).map_err(|e| anyhow::anyhow!("{e:#}"))
    }
}

/// A unit of lifecycle work.
///
/// Cloning a hook is cheap and yields the same underlying closure; registering
/// it twice still gives two independent executions.
#[derive(Clone)]
pub struct Hook {
    label: Cow<'static, str>,
    run: Arc<HookFn>,
}

impl Hook {
    /// Wrap an async closure.
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Arc<Application>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoHookResult + 'static,
    {
        let f = Arc::new(f);
        Self {
            label: Cow::Borrowed("anonymous"),
            run: Arc::new(move |app| {
                let f = Arc::clone(&f);
                Box::pin(async move { f(app).await.into_hook_result() })
            }),
        }
    }

    /// Wrap a synchronous closure.
    pub fn sync<F, R>(f: F) -> Self
    where
        F: Fn(Arc<Application>) -> R + Send + Sync + 'static,
        R: IntoHookResult + 'static,
    {
        let f = Arc::new(f);
        Self {
            label: Cow::Borrowed("anonymous"),
            run: Arc::new(move |app| {
                let f = Arc::clone(&f);
                Box::pin(async move { f(app).into_hook_result() })
            }),
        }
    }

    /// Attach a label used in log lines.
    pub fn named(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the hook to completion. Panics inside the hook are turned into errors.
    pub(crate) async fn execute(&self, app: Arc<Application>) -> anyhow::Result<()> {
        match AssertUnwindSafe((self.run)(app)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!("hook panicked: {}", panic_message(&*panic))),
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook").field("label", &self.label).finish()
    }
}

/// A hook with its ordering key.
#[derive(Debug, Clone)]
pub struct PrioritizedHook {
    pub hook: Hook,
    pub priority: i64,
}

/// Insert `item` after every entry whose priority is lower or equal, so equal
/// priorities keep registration order.
pub(crate) fn insert_by_priority(hooks: &mut Vec<PrioritizedHook>, item: PrioritizedHook) {
    let index = hooks.partition_point(|h| h.priority <= item.priority);
    hooks.insert(index, item);
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prioritized(label: &'static str, priority: i64) -> PrioritizedHook {
        PrioritizedHook {
            hook: Hook::sync(|_| ()).named(label),
            priority,
        }
    }

    #[test]
    fn insertion_keeps_priority_order_and_ties_stable() {
        let mut hooks = Vec::new();
        insert_by_priority(&mut hooks, prioritized("a", 0));
        insert_by_priority(&mut hooks, prioritized("b", -10));
        insert_by_priority(&mut hooks, prioritized("c", 0));
        insert_by_priority(&mut hooks, prioritized("d", 100));
        insert_by_priority(&mut hooks, prioritized("e", i64::MIN));

        let labels: Vec<_> = hooks.iter().map(|h| h.hook.label()).collect();
        assert_eq!(labels, vec!["e", "b", "a", "c", "d"]);
    }

    #[test]
    fn results_of_any_value_collapse_to_unit() {
        assert!(Ok::<u32, std::io::Error>(7).into_hook_result().is_ok());
        assert!(().into_hook_result().is_ok());

        let failed: Result<(), std::io::Error> = Err(std::io::Error::other("disk full"));
        assert_eq!(failed.into_hook_result().unwrap_err().to_string(), "disk full");
    }

    #[test]
    fn any_displayable_error_is_accepted() {
        let failed: Result<(), String> = Err("cache unavailable".to_string());
        assert_eq!(
            failed.into_hook_result().unwrap_err().to_string(),
            "cache unavailable"
        );

        let chained: anyhow::Result<()> =
            Err(anyhow::anyhow!("connection refused").context("warming cache"));
        assert_eq!(
            chained.into_hook_result().unwrap_err().to_string(),
            "warming cache: connection refused"
        );
    }
}
