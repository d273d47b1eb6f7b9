use meshestra_kernel::config::{AppConfig, ConfigService};
use meshestra_kernel::kernel::{self, AppMode, KernelInitOptions};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod app_module;

use app_module::AppModule;

fn init_tracing() {
    let level = AppConfig::from_config(&ConfigService::new())
        .map(|config| config.log_level.as_filter())
        .unwrap_or("info");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let options = KernelInitOptions::from_args(std::env::args());
    tracing::info!("🚀 Starting kernel-app ({} mode)", options.mode);

    let Ok(app) = kernel::bootstrap(AppModule, options).await else {
        return;
    };

    if options.mode == AppMode::Server {
        app.stopped().await;
        tracing::info!("👋 Server stopped");
    }
}
