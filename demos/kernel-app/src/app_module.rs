use clap::{Args, FromArgMatches};
use meshestra_kernel::lifecycle::{OnModuleDestroy, ShutdownHooks};
use meshestra_kernel::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts served requests
#[derive(Default)]
pub struct Counter {
    hits: AtomicU64,
}

impl Counter {
    fn hit(&self) -> u64 {
        self.hits.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl OnCreated for Counter {
    async fn on_created(&self, app: Arc<Application>) -> anyhow::Result<()> {
        tracing::info!("Counter ready for {}", app.name());
        Ok(())
    }
}

#[async_trait]
impl OnModuleDestroy for Counter {
    async fn on_module_destroy(&self, _app: Arc<Application>) -> anyhow::Result<()> {
        tracing::info!("Served {} requests", self.hits.load(Ordering::Relaxed));
        Ok(())
    }
}

#[derive(Args, Debug)]
struct GreetArgs {
    /// Who to greet
    name: String,

    #[arg(short, long, default_value_t = 1)]
    times: u8,
}

struct GreetCommand;

#[async_trait]
impl Command for GreetCommand {
    fn definition(&self) -> clap::Command {
        GreetArgs::augment_args(clap::Command::new("greet").about("Print a greeting and exit"))
    }

    async fn run(&self, app: Arc<Application>, matches: &clap::ArgMatches) -> anyhow::Result<()> {
        let args = GreetArgs::from_arg_matches(matches)?;
        for _ in 0..args.times {
            println!("Hello, {}! (from {})", args.name, app.name());
        }
        Ok(())
    }
}

/// Root application module
pub struct AppModule;

impl Module for AppModule {
    fn name(&self) -> &str {
        "kernel-app"
    }

    fn register(&self, container: &mut Container) -> Result<()> {
        let counter = Arc::new(Counter::default());
        container.register_shared(Arc::clone(&counter));

        let registry = container.resolve::<LifecycleRegistry>()?;
        registry.register(
            Milestone::Created,
            Hook::sync(|_app| tracing::info!("Logger hook runs before the default priority"))
                .named("early-logger"),
            -10,
        );
        registry.register_created_service(Arc::clone(&counter), 0);

        container
            .resolve::<ShutdownHooks>()?
            .register_destroy_service(counter);
        Ok(())
    }

    fn router(&self, container: &Container) -> Result<Router> {
        let counter = container.resolve::<Counter>()?;
        Ok(Router::new().route(
            "/",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.hit();
                    "5"
                }
            }),
        ))
    }

    fn commands(&self, _container: &Container) -> Vec<Arc<dyn Command>> {
        vec![Arc::new(GreetCommand)]
    }
}
