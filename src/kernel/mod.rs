//! Kernel
//!
//! Single entry point that takes a [`Module`] to a listening server, or to a
//! finished one-shot command in standalone mode.
//!
//! # Server pipeline
//!
//! ```text
//! ServerAdapter → Application (module providers + router)
//!   → kernel hooks registered → AppRef::set
//!   → Created hooks → listen(APP_HOST, APP_PORT)
//!   → Listening hooks → shutdown armed
//! ```
//!
//! The server pipeline runs at most once per kernel. Every caller of
//! [`Kernel::init`] gets the same outcome, including concurrent callers that
//! arrive while it is still running. A failed bootstrap is logged and the
//! process exits with status `1`.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshestra_kernel::kernel::{self, KernelInitOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = KernelInitOptions::from_args(std::env::args());
//!     if let Ok(app) = kernel::bootstrap(AppModule, options).await {
//!         app.stopped().await;
//!     }
//! }
//! ```

mod adapter;
mod options;
mod provider;

pub use adapter::{
    CORRELATION_ID_HEADER, DEFAULT_BODY_LIMIT, DEFAULT_KEEP_ALIVE, MakeTraceId, ServerAdapter,
    TRACE_ID_HEADER, normalize_path,
};
pub use options::{AppMode, CLI_FLAG, KernelInitOptions, strip_cli_flag};
pub use provider::{KERNEL_HOOK_PRIORITY, KernelProvider, SECURITY_HEADERS};

use crate::command::CommandRunner;
use crate::config::{AppConfig, ConfigService};
use crate::di::Container;
use crate::error::{KernelError, Result};
use crate::lifecycle::{
    AppRef, Application, DEFAULT_SHUTDOWN_TIMEOUT, LifecycleRegistry, LifecycleState, Milestone,
    ShutdownHooks, ShutdownSequencer, panic_message, shutdown_signal,
};
use crate::module::Module;
use crate::process::{ProcessExit, ProcessTerminator};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Result of a bootstrap, shared by every caller that observes it.
pub type BootstrapOutcome = std::result::Result<Arc<Application>, Arc<KernelError>>;

type PendingBootstrap = Shared<BoxFuture<'static, BootstrapOutcome>>;

const SERVER_CONTEXT: &str = "Standard";
const STANDALONE_CONTEXT: &str = "Standalone";

static GLOBAL: OnceLock<Kernel> = OnceLock::new();

/// Bootstrap `module` on the process-wide kernel.
pub async fn bootstrap<M: Module>(module: M, options: KernelInitOptions) -> BootstrapOutcome {
    Kernel::global().init(module, options).await
}

/// The bootstrap coordinator
pub struct Kernel {
    inner: Arc<KernelInner>,
    bootstrap: OnceLock<PendingBootstrap>,
}

struct KernelInner {
    config: ConfigService,
    args: Vec<String>,
    exit: Arc<dyn ProcessExit>,
    shutdown_timeout: Duration,
    app_ref: Arc<AppRef>,
    registry: Arc<LifecycleRegistry>,
    shutdown_hooks: Arc<ShutdownHooks>,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    /// The process-wide kernel, configured from the environment and the
    /// process arguments on first use.
    pub fn global() -> &'static Kernel {
        GLOBAL.get_or_init(|| Kernel::builder().build())
    }

    pub fn registry(&self) -> &Arc<LifecycleRegistry> {
        &self.inner.registry
    }

    pub fn app_ref(&self) -> &Arc<AppRef> {
        &self.inner.app_ref
    }

    pub fn shutdown_hooks(&self) -> &Arc<ShutdownHooks> {
        &self.inner.shutdown_hooks
    }

    pub fn config(&self) -> &ConfigService {
        &self.inner.config
    }

    pub fn args(&self) -> &[String] {
        &self.inner.args
    }

    /// Current lifecycle state of the server application
    pub fn state(&self) -> LifecycleState {
        self.inner.registry.state()
    }

    /// Bootstrap `module` in the mode selected by `options`.
    ///
    /// Server mode is memoized: the first call spawns the pipeline on the
    /// current runtime and every call, including that one, awaits the same
    /// outcome. Dropping a caller neither cancels nor restarts the pipeline.
    /// Standalone mode runs anew on each call.
    pub async fn init<M: Module>(&self, module: M, options: KernelInitOptions) -> BootstrapOutcome {
        match options.mode {
            AppMode::Cli => {
                let outcome = self.inner.bootstrap_standalone(&module).await.map_err(|e| {
                    Arc::new(KernelError::bootstrap("Standalone bootstrap failed", e))
                });
                if let Err(e) = &outcome {
                    self.inner.handle_bootstrap_error(e, STANDALONE_CONTEXT);
                }
                outcome
            }
            AppMode::Server => {
                let pending = self
                    .bootstrap
                    .get_or_init(|| Arc::clone(&self.inner).spawn_server(module))
                    .clone();
                pending.await
            }
        }
    }
}

impl KernelInner {
    /// Start the server pipeline in its own task.
    ///
    /// Failures, panics included, are handled inside the task so the process
    /// exits even when no caller is left waiting.
    fn spawn_server<M: Module>(self: Arc<Self>, module: M) -> PendingBootstrap {
        let task = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(self.bootstrap_server(&module))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(KernelError::Internal(format!(
                        "Bootstrap panicked: {}",
                        panic_message(&*panic)
                    )))
                })
                .map_err(|e| Arc::new(KernelError::bootstrap("Bootstrap sequence failed", e)));
            if let Err(e) = &outcome {
                self.handle_bootstrap_error(e, SERVER_CONTEXT);
            }
            outcome
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(Arc::new(KernelError::Internal(format!(
                    "Bootstrap task ended abnormally: {e}"
                ))))
            })
        }
        .boxed()
        .shared()
    }

    async fn bootstrap_server<M: Module>(&self, module: &M) -> Result<Arc<Application>> {
        tracing::debug!("Bootstrapping {}", module.name());

        let adapter = ServerAdapter::default();
        let app = Arc::new(self.create_application(
            module,
            adapter,
            &self.app_ref,
            &self.registry,
            &self.shutdown_hooks,
        )?);

        KernelProvider::register(&self.registry);
        self.app_ref.set(Arc::clone(&app));

        self.registry.transition(Milestone::Created).await?;

        let config = AppConfig::from_config(&self.config)?;
        let port = config.socket_port()?;
        app.listen(&config.host, port).await?;

        self.registry.transition(Milestone::Listening).await?;

        self.arm_shutdown(Arc::clone(&app));
        Ok(app)
    }

    async fn bootstrap_standalone<M: Module>(&self, module: &M) -> Result<Arc<Application>> {
        let args = strip_cli_flag(self.args.clone());

        let app_ref = Arc::new(AppRef::new());
        let registry = Arc::new(LifecycleRegistry::new(Arc::clone(&app_ref)));
        let shutdown_hooks = Arc::new(ShutdownHooks::new());
        let app = Arc::new(self.create_application(
            module,
            ServerAdapter::default(),
            &app_ref,
            &registry,
            &shutdown_hooks,
        )?);
        app_ref.set(Arc::clone(&app));

        let commands = module.commands(app.container());
        CommandRunner::new(module.name(), commands)
            .run(Arc::clone(&app), args)
            .await?;

        Ok(app)
    }

    /// Build the application object from the module.
    ///
    /// The kernel's own services are registered first so the module can
    /// resolve them while registering its providers.
    fn create_application<M: Module>(
        &self,
        module: &M,
        adapter: ServerAdapter,
        app_ref: &Arc<AppRef>,
        registry: &Arc<LifecycleRegistry>,
        shutdown_hooks: &Arc<ShutdownHooks>,
    ) -> Result<Application> {
        let mut container = Container::new();
        container
            .register_shared(Arc::clone(app_ref))
            .register_shared(Arc::clone(registry))
            .register_shared(Arc::clone(shutdown_hooks))
            .register(self.config.clone());

        module.register(&mut container)?;
        let router = module.router(&container)?;

        Application::builder()
            .name(module.name())
            .container(container)
            .adapter(adapter)
            .router(router)
            .build()
    }

    /// Run the graceful shutdown once a signal or a programmatic request
    /// arrives.
    fn arm_shutdown(&self, app: Arc<Application>) {
        let sequencer =
            ShutdownSequencer::with_timeout(Arc::clone(&self.exit), self.shutdown_timeout);
        let hooks = Arc::clone(&self.shutdown_hooks);

        tokio::spawn(async move {
            let signal = tokio::select! {
                signal = shutdown_signal() => signal,
                signal = app.shutdown_requested() => signal,
            };

            sequencer
                .run(signal, async {
                    if let Err(e) = app.close().await {
                        tracing::error!("Failed to close the listener: {}", e);
                    }
                    hooks.run(Arc::clone(&app)).await;
                })
                .await;

            app.mark_stopped();
        });
    }

    fn handle_bootstrap_error(&self, err: &KernelError, context: &str) {
        tracing::error!("🚨 {} Kernel bootstrap failed!", context);
        tracing::error!("{}", err);
        self.exit.exit(1);
    }
}

/// Builder for [`Kernel`]
///
/// Unset values fall back to the process environment, the process
/// arguments, a real process exit and a 25 second shutdown window.
pub struct KernelBuilder {
    config: Option<ConfigService>,
    args: Option<Vec<String>>,
    exit: Option<Arc<dyn ProcessExit>>,
    shutdown_timeout: Duration,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            args: None,
            exit: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn config(mut self, config: ConfigService) -> Self {
        self.config = Some(config);
        self
    }

    /// Arguments seen by standalone commands; `args[0]` is the binary name
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn exit(mut self, exit: Arc<dyn ProcessExit>) -> Self {
        self.exit = Some(exit);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> Kernel {
        let app_ref = Arc::new(AppRef::new());
        let registry = Arc::new(LifecycleRegistry::new(Arc::clone(&app_ref)));

        Kernel {
            inner: Arc::new(KernelInner {
                config: self.config.unwrap_or_else(ConfigService::new),
                args: self.args.unwrap_or_else(|| std::env::args().collect()),
                exit: self.exit.unwrap_or_else(|| Arc::new(ProcessTerminator)),
                shutdown_timeout: self.shutdown_timeout,
                app_ref,
                registry,
                shutdown_hooks: Arc::new(ShutdownHooks::new()),
            }),
            bootstrap: OnceLock::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::config::{APP_HOST, APP_PORT};
    use crate::lifecycle::{Hook, Signal};
    use crate::process::RecordingExit;
    use async_trait::async_trait;
    use axum::Router;
    use axum::routing::get;
    use clap::{Arg, ArgMatches};
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Clone, Default)]
    struct TestModule {
        registrations: Arc<AtomicUsize>,
        log: Log,
        fail: bool,
        created_delay: Option<Duration>,
    }

    impl TestModule {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn slow_created(delay: Duration) -> Self {
            Self {
                created_delay: Some(delay),
                ..Self::default()
            }
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    struct Greet {
        log: Log,
    }

    #[async_trait]
    impl Command for Greet {
        fn definition(&self) -> clap::Command {
            clap::Command::new("greet").arg(Arg::new("name").required(true))
        }

        async fn run(&self, app: Arc<Application>, matches: &ArgMatches) -> anyhow::Result<()> {
            let name = matches
                .get_one::<String>("name")
                .ok_or_else(|| anyhow::anyhow!("name is required"))?;
            self.log
                .lock()
                .unwrap()
                .push(format!("greet:{name}:{}", app.local_addr().is_none()));
            Ok(())
        }
    }

    impl Module for TestModule {
        fn name(&self) -> &str {
            "test-app"
        }

        fn register(&self, container: &mut Container) -> Result<()> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(KernelError::module_registration("database unreachable"));
            }

            let registry = container.resolve::<LifecycleRegistry>()?;
            for (name, priority) in [("Y", 0), ("X", -10)] {
                let log = Arc::clone(&self.log);
                registry.register(
                    Milestone::Created,
                    Hook::sync(move |_| log.lock().unwrap().push(name.to_string())),
                    priority,
                );
            }

            if let Some(delay) = self.created_delay {
                let log = Arc::clone(&self.log);
                registry.on_created(Hook::new(move |_| {
                    let log = Arc::clone(&log);
                    async move {
                        tokio::time::sleep(delay).await;
                        log.lock().unwrap().push("slow".to_string());
                    }
                }));
            }

            let log = Arc::clone(&self.log);
            registry.on_listening(Hook::sync(move |app: Arc<Application>| {
                log.lock()
                    .unwrap()
                    .push(format!("listening:{}", app.url().is_some()));
            }));
            Ok(())
        }

        fn router(&self, _container: &Container) -> Result<Router> {
            Ok(Router::new().route("/items", get(|| async { "5" })))
        }

        fn commands(&self, _container: &Container) -> Vec<Arc<dyn Command>> {
            vec![Arc::new(Greet {
                log: Arc::clone(&self.log),
            })]
        }
    }

    fn kernel(exit: &RecordingExit, port: &str) -> Kernel {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Kernel::builder()
            .config(
                ConfigService::empty()
                    .with(APP_HOST, "127.0.0.1")
                    .with(APP_PORT, port),
            )
            .args(["test-app"])
            .exit(Arc::new(exit.clone()))
            .build()
    }

    async fn raw_get(addr: SocketAddr, path: &str, headers: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n{headers}\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn stop(app: &Application) {
        app.request_shutdown(Signal::Requested);
        app.stopped().await;
    }

    #[tokio::test]
    async fn concurrent_init_runs_the_pipeline_once() {
        let exit = RecordingExit::new();
        let kernel = kernel(&exit, "0");
        let module = TestModule::default();

        let (first, second) = tokio::join!(
            kernel.init(module.clone(), KernelInitOptions::server()),
            kernel.init(module.clone(), KernelInitOptions::server()),
        );
        let first = first.unwrap();
        let second = second.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(module.registrations.load(Ordering::SeqCst), 1);
        assert_eq!(kernel.state(), LifecycleState::Listening);
        assert!(Arc::ptr_eq(&kernel.app_ref().get().unwrap(), &first));

        let third = kernel
            .init(module.clone(), KernelInitOptions::default())
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(module.registrations.load(Ordering::SeqCst), 1);
        assert!(exit.codes().is_empty());

        stop(&first).await;
    }

    #[tokio::test]
    async fn abandoned_first_caller_does_not_restart_the_pipeline() {
        let exit = RecordingExit::new();
        let kernel = kernel(&exit, "0");
        let module = TestModule::slow_created(Duration::from_millis(200));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            kernel.init(module.clone(), KernelInitOptions::server()),
        )
        .await;
        assert!(abandoned.is_err());

        let app = kernel
            .init(module.clone(), KernelInitOptions::server())
            .await
            .unwrap();

        assert_eq!(module.registrations.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&kernel.app_ref().get().unwrap(), &app));
        assert_eq!(
            module.entries().iter().filter(|e| *e == "slow").count(),
            1
        );
        assert_eq!(kernel.state(), LifecycleState::Listening);
        assert!(exit.codes().is_empty());

        stop(&app).await;
    }

    #[tokio::test]
    async fn hooks_run_by_priority_then_listening() {
        let exit = RecordingExit::new();
        let kernel = kernel(&exit, "0");
        let module = TestModule::default();

        let app = kernel
            .init(module.clone(), KernelInitOptions::server())
            .await
            .unwrap();

        assert_eq!(module.entries(), vec!["X", "Y", "listening:true"]);
        stop(&app).await;
    }

    #[tokio::test]
    async fn served_routes_get_kernel_layers_and_normalized_paths() {
        let exit = RecordingExit::new();
        let kernel = kernel(&exit, "0");
        let app = kernel
            .init(TestModule::default(), KernelInitOptions::server())
            .await
            .unwrap();
        let addr = app.local_addr().unwrap();

        let response = raw_get(
            addr,
            "/items//",
            "Origin: https://example.com\r\nx-correlation-id: corr-7\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.ends_with("5"), "{response}");
        assert!(response.contains("access-control-allow-origin: *"), "{response}");
        assert!(response.contains("x-trace-id: corr-7"), "{response}");

        stop(&app).await;
    }

    #[tokio::test]
    async fn failed_bootstrap_exits_once_and_is_not_retried() {
        let exit = RecordingExit::new();
        let kernel = kernel(&exit, "0");
        let module = TestModule::failing();

        let first = kernel
            .init(module.clone(), KernelInitOptions::server())
            .await
            .unwrap_err();
        assert!(
            first
                .to_string()
                .starts_with("Bootstrap sequence failed: Module registration failed")
        );
        assert_eq!(exit.codes(), vec![1]);

        let second = kernel
            .init(module.clone(), KernelInitOptions::server())
            .await
            .unwrap_err();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(module.registrations.load(Ordering::SeqCst), 1);
        assert_eq!(exit.codes(), vec![1]);
        assert_eq!(kernel.state(), LifecycleState::NotReady);
    }

    #[tokio::test]
    async fn out_of_range_port_is_fatal_after_created() {
        let exit = RecordingExit::new();
        let kernel = kernel(&exit, "70000");

        let err = kernel
            .init(TestModule::default(), KernelInitOptions::server())
            .await
            .unwrap_err();

        assert!(err.to_string().contains(APP_PORT), "{err}");
        assert_eq!(exit.codes(), vec![1]);
        assert_eq!(kernel.state(), LifecycleState::Created);
    }

    #[tokio::test]
    async fn requested_shutdown_drains_and_runs_teardown_hooks() {
        let exit = RecordingExit::new();
        let kernel = kernel(&exit, "0");
        let torn_down = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&torn_down);
        kernel.shutdown_hooks().on_destroy(Hook::sync(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let app = kernel
            .init(TestModule::default(), KernelInitOptions::server())
            .await
            .unwrap();
        let addr = app.local_addr().unwrap();

        stop(&app).await;

        assert!(app.is_stopped());
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
        assert!(exit.codes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_teardown_is_forced_to_exit() {
        let exit = RecordingExit::new();
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let kernel = Kernel::builder()
            .config(
                ConfigService::empty()
                    .with(APP_HOST, "127.0.0.1")
                    .with(APP_PORT, "0"),
            )
            .args(["test-app"])
            .exit(Arc::new(exit.clone()))
            .shutdown_timeout(Duration::from_millis(50))
            .build();

        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        kernel.shutdown_hooks().on_shutdown(Hook::new(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let app = kernel
            .init(TestModule::default(), KernelInitOptions::server())
            .await
            .unwrap();

        app.request_shutdown(Signal::Terminate);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(exit.codes(), vec![1]);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(!app.is_stopped());
    }

    #[tokio::test]
    async fn standalone_runs_the_command_without_listening() {
        let exit = RecordingExit::new();
        let kernel = Kernel::builder()
            .config(ConfigService::empty())
            .args(["test-app", "--cli", "greet", "ada"])
            .exit(Arc::new(exit.clone()))
            .build();
        let module = TestModule::default();

        let first = kernel
            .init(module.clone(), KernelInitOptions::cli())
            .await
            .unwrap();
        let second = kernel
            .init(module.clone(), KernelInitOptions::cli())
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(module.registrations.load(Ordering::SeqCst), 2);
        assert_eq!(module.entries(), vec!["greet:ada:true", "greet:ada:true"]);
        assert_eq!(kernel.state(), LifecycleState::NotReady);
        assert!(!kernel.app_ref().is_set());
        assert!(exit.codes().is_empty());
    }

    #[tokio::test]
    async fn standalone_unknown_command_is_fatal() {
        let exit = RecordingExit::new();
        let kernel = Kernel::builder()
            .config(ConfigService::empty())
            .args(["test-app", "--cli", "deploy"])
            .exit(Arc::new(exit.clone()))
            .build();

        let err = kernel
            .init(TestModule::default(), KernelInitOptions::cli())
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("Standalone bootstrap failed"));
        assert_eq!(exit.codes(), vec![1]);
    }
}
