//! Observability wiring for the authorization engine.
//!
//! # Purpose
//! Initializes tracing (with an optional OTLP exporter) and the Prometheus
//! recorder that backs the engine's `warden_*` metrics, and serves them on
//! `/metrics`.
//!
//! # Notes
//! Initialization is guarded by `OnceLock` to keep startup idempotent in tests.
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static OBS_INIT: OnceLock<()> = OnceLock::new();

pub fn init_observability(service_name: &str) -> Result<PrometheusHandle, BuildError> {
    OBS_INIT.get_or_init(|| {
        global::set_text_map_propagator(
            opentelemetry_sdk::propagation::TraceContextPropagator::new(),
        );

        let provider = build_tracer_provider(service_name);
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer();
        let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);
        if let Some(provider) = provider {
            let tracer = provider.tracer(service_name.to_string());
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
            let _ = registry.with(otel_layer).try_init();
        } else {
            let _ = registry.try_init();
        }
    });

    install_metrics_recorder()
}

// Spans are only exported when an OTLP endpoint is configured.
fn build_tracer_provider(
    service_name: &str,
) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    let resource = Resource::builder_empty()
        .with_attributes(resource_attributes(service_name))
        .build();
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .ok()?;
    Some(
        opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

fn resource_attributes(service_name: &str) -> Vec<KeyValue> {
    let mut attrs = vec![KeyValue::new("service.name", service_name.to_string())];
    if let Ok(value) =
        std::env::var("WARDEN_SERVICE_INSTANCE_ID").or_else(|_| std::env::var("HOSTNAME"))
    {
        attrs.push(KeyValue::new("service.instance.id", value));
    }
    if let Ok(value) = std::env::var("DEPLOYMENT_ENVIRONMENT") {
        attrs.push(KeyValue::new("deployment.environment", value));
    }
    attrs
}

pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    serve_metrics_with_shutdown(handle, addr, std::future::pending()).await
}

pub async fn serve_metrics_with_shutdown<F>(
    handle: PrometheusHandle,
    addr: SocketAddr,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_metrics_with_listener(handle, listener, shutdown).await
}

async fn serve_metrics_with_listener<F>(
    handle: PrometheusHandle,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}

fn install_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle.clone());
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuthzEngine;
    use crate::config::WardenConfig;
    use crate::rbac::grants::GrantUpdate;
    use crate::rbac::index::CasbinIndex;
    use crate::store::memory::InMemoryStore;
    use serial_test::serial;
    use std::sync::Arc;
    use warden_authz::{Permission, PrincipalId, RoleName};
    use std::time::{Duration, Instant};
    use tokio::sync::oneshot;

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn unset(key: &'static str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.prev {
                unsafe {
                    std::env::set_var(self.key, value);
                }
            }
        }
    }

    async fn engine() -> AuthzEngine {
        let seed = vec![(
            "content.story".parse().expect("resource"),
            vec![Permission::new("view").expect("perm")],
        )];
        AuthzEngine::bootstrap(
            Arc::new(InMemoryStore::new()),
            Arc::new(CasbinIndex::new().await.expect("index")),
            &WardenConfig::default(),
            seed,
        )
        .await
        .expect("bootstrap")
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn engine_operations_are_rendered() {
        let handle = init_observability("warden-test").expect("init");
        let engine = engine().await;
        engine
            .reconcile(vec![GrantUpdate::new(
                RoleName::new("reader").expect("role"),
                "content.story".parse().expect("resource"),
                [Permission::new("view").expect("perm")],
            )])
            .await
            .expect("reconcile");
        let user = PrincipalId::new(1);
        assert!(
            !engine
                .allowed(user, "content.story", &["view"])
                .await
                .expect("decision")
        );

        let rendered = handle.render();
        for name in [
            "warden_reconcile_total",
            "warden_rebuild_total",
            "warden_rebuild_principals_total",
            "warden_decisions_total",
        ] {
            assert!(rendered.contains(name), "missing {name}");
        }
    }

    #[test]
    #[serial]
    fn tracer_provider_requires_endpoint() {
        let _g = EnvGuard::unset("OTEL_EXPORTER_OTLP_ENDPOINT");
        assert!(build_tracer_provider("warden").is_none());
    }

    async fn wait_for_listen(addr: SocketAddr) -> Result<(), String> {
        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            if tokio::net::TcpStream::connect(addr).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(format!("server never became ready at {addr}"));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn init_observability_is_idempotent() {
        let handle1 = init_observability("warden-test").expect("init");
        let handle2 = init_observability("warden-test").expect("init again");
        let _ = (handle1.render(), handle2.render());
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn serve_metrics_exposes_engine_counters() {
        let handle = init_observability("warden-metrics-test").expect("init");
        let engine = engine().await;
        engine
            .allowed(PrincipalId::ANONYMOUS, "content.story", &["view"])
            .await
            .expect("decision");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve_metrics_with_listener(handle, listener, async move {
            let _ = shutdown_rx.await;
        }));
        wait_for_listen(addr).await.expect("server ready");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .no_proxy()
            .build()
            .expect("client");
        let body = client
            .get(format!("http://{addr}/metrics"))
            .send()
            .await
            .expect("GET /metrics")
            .error_for_status()
            .expect("metrics status")
            .text()
            .await
            .expect("body");
        assert!(body.contains("warden_decisions_total"));

        let _ = shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .expect("server shutdown");
    }
}
