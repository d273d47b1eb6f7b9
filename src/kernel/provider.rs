use crate::lifecycle::{Application, Hook, LifecycleRegistry, Milestone};
use crate::process::{format_memory_usage, resident_memory};
use axum::http::{HeaderName, HeaderValue};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

/// Runs before any hook registered at the default priority.
pub const KERNEL_HOOK_PRIORITY: i64 = -1_000;

/// Security headers added to every response that does not set them itself.
pub const SECURITY_HEADERS: &[(&str, &str)] = &[
    (
        "content-security-policy",
        "default-src 'self';base-uri 'self';font-src 'self' https: data:;\
         form-action 'self';frame-ancestors 'self';img-src 'self' data:;\
         object-src 'none';script-src 'self';script-src-attr 'none';\
         style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests",
    ),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

/// Lifecycle hooks every application gets from the kernel
///
/// - `Created`: permissive CORS, gzip/deflate response compression and the
///   [`SECURITY_HEADERS`].
/// - `Listening`: logs the URL, the runtime and the memory in use.
pub struct KernelProvider;

impl KernelProvider {
    pub fn register(registry: &LifecycleRegistry) {
        registry.register(
            Milestone::Created,
            Hook::sync(Self::install_http_layers).named("kernel:http-layers"),
            KERNEL_HOOK_PRIORITY,
        );
        registry.register(
            Milestone::Listening,
            Hook::sync(Self::report_ready).named("kernel:ready-report"),
            KERNEL_HOOK_PRIORITY,
        );
    }

    fn install_http_layers(app: Arc<Application>) -> crate::Result<()> {
        app.map_router(|router| {
            let router = router
                .layer(CompressionLayer::new().gzip(true).deflate(true))
                .layer(CorsLayer::permissive());
            SECURITY_HEADERS.iter().fold(router, |router, (name, value)| {
                router.layer(SetResponseHeaderLayer::if_not_present(
                    HeaderName::from_static(*name),
                    HeaderValue::from_static(*value),
                ))
            })
        })
    }

    fn report_ready(app: Arc<Application>) {
        if let Some(url) = app.url() {
            tracing::info!("Application is listening on {}", url);
        }

        let flavor = match tokio::runtime::Handle::try_current() {
            Ok(handle) => format!("{:?}", handle.runtime_flavor()),
            Err(_) => "none".to_string(),
        };
        tracing::debug!(
            "Runtime: Tokio ({}), {} {}",
            flavor,
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        );
        tracing::debug!("{}", format_memory_usage(resident_memory()));
    }
}
