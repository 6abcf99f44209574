//! Telemetry Guard API Server
//!
//! Ingest endpoint plus the ops surface (health, alerts, dead letters,
//! circuits, windows, Prometheus metrics) over one shared [`EventRouter`].

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use dead_letter::{DeadLetterStatus, MqttDeadLetterSink};
use dedup_guard::DedupStats;
use event_model::CriticalityTier;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use resilience::CircuitState;
use router::{Collaborators, CoreConfig, EventRouter, HandlerRegistration, MetricEventHandler, RouterStats};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub mod rate_limit;
pub mod routes;
mod settings;

pub use rate_limit::{create_governor_config, PeerGovernorConfig, RateLimitConfig};
pub use settings::{HttpConfig, LoggingConfig, ServiceConfig};

/// Application state shared across handlers
pub struct AppState {
    pub router: Arc<EventRouter>,
    /// Present once the Prometheus recorder is installed
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: std::time::Instant,
    ingest_offset: AtomicI64,
}

impl AppState {
    pub fn new(router: Arc<EventRouter>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            router,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
            ingest_offset: AtomicI64::new(0),
        }
    }

    /// Offset for HTTP-ingested envelopes that carry none
    pub fn next_offset(&self) -> i64 {
        self.ingest_offset.fetch_add(1, Ordering::Relaxed)
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentStatus,
    pub metrics: SystemMetrics,
}

/// Component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub circuits: Vec<ComponentHealth>,
}

/// Individual component health
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    pub failure_rate: f64,
}

/// System metrics
#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub routing: RouterStats,
    pub dedup: DedupStats,
    pub active_alerts: usize,
    pub dead_letters_pending: usize,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/events", post(routes::events::ingest))
        .route("/api/v1/alerts", get(routes::alerts::get_alerts))
        .route(
            "/api/v1/alerts/:subject/:metric/ack",
            post(routes::alerts::acknowledge_alert),
        )
        .route(
            "/api/v1/alerts/:subject/:metric/resolve",
            post(routes::alerts::resolve_alert),
        )
        .route("/api/v1/dead-letters", get(routes::dead_letters::get_dead_letters))
        .route("/api/v1/circuits", get(routes::ops::get_circuits))
        .route("/api/v1/windows/:subject/:metric", get(routes::ops::get_window))
        .route("/metrics", get(routes::ops::get_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Health check handler. Any circuit that is not closed degrades the status.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let router = &state.router;
    let circuits: Vec<ComponentHealth> = router
        .circuits()
        .into_iter()
        .map(|c| ComponentHealth {
            status: c.state.to_string(),
            failure_rate: c.failure_rate,
            name: c.name,
        })
        .collect();
    let degraded = circuits
        .iter()
        .any(|c| c.status != CircuitState::Closed.to_string());

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        timestamp: Utc::now().timestamp(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: ComponentStatus { circuits },
        metrics: SystemMetrics {
            routing: router.stats(),
            dedup: router.dedup().stats(),
            active_alerts: router.tracker().active().len(),
            dead_letters_pending: router
                .dead_letters()
                .count_by_status(DeadLetterStatus::RequiresManualIntervention),
        },
    })
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}

/// Install the global Prometheus recorder
pub fn install_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// In-memory collaborators, publishing dead letters over MQTT when enabled
pub fn build_collaborators(config: &CoreConfig) -> Collaborators {
    let mut collaborators = Collaborators::in_memory(config);
    if config.dead_letter.mqtt_enabled {
        let mut mqtt = config.dead_letter.mqtt.clone();
        mqtt.topic_suffix = config.dead_letter.topic_suffix.clone();
        collaborators.sink = Arc::new(MqttDeadLetterSink::connect(&mqtt));
    } else {
        warn!("MQTT dead-letter sink disabled, dead letters are kept in memory only");
    }
    collaborators
}

/// Capacity-monitoring handlers
pub fn register_default_handlers(router: &EventRouter) {
    router.register(
        "RESOURCE_UTILIZATION",
        HandlerRegistration::new(
            Arc::new(
                MetricEventHandler::new("resource_utilization", "utilization", 0.75)
                    .with_threshold_field("threshold")
                    .with_range(0.0, 1.0),
            ),
            "capacity",
        )
        .with_tier(CriticalityTier::Elevated),
    );
    router.register(
        "CPU_UTILIZATION",
        HandlerRegistration::new(
            Arc::new(
                MetricEventHandler::new("cpu_utilization", "cpuUsage", 80.0)
                    .with_threshold_field("threshold")
                    .with_range(0.0, 100.0),
            ),
            "capacity",
        ),
    );
    router.register(
        "CONTAINER_UTILIZATION",
        HandlerRegistration::new(
            Arc::new(
                MetricEventHandler::new("container_cpu_utilization", "cpuUsage", 80.0)
                    .with_range(0.0, 100.0),
            ),
            "capacity",
        ),
    );
}

/// Run the server until Ctrl-C
pub async fn run_server(
    addr: &str,
    state: Arc<AppState>,
    governor: Option<Arc<PeerGovernorConfig>>,
) -> std::io::Result<()> {
    let mut app = create_router(state);
    if let Some(config) = governor {
        info!("Per-peer rate limiting enabled");
        app = app.layer(GovernorLayer { config });
    }

    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    async fn spawn_app() -> (String, Arc<AppState>) {
        let config = CoreConfig::default();
        let collaborators = Collaborators::in_memory(&config);
        let router = Arc::new(EventRouter::new(config, collaborators).unwrap());
        register_default_handlers(&router);
        let state = Arc::new(AppState::new(router, None));

        let app = create_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), state)
    }

    async fn post_event(client: &reqwest::Client, base: &str, body: Value) -> (u16, Value) {
        let response = client
            .post(format!("{base}/api/v1/events"))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (base, _) = spawn_app().await;
        let body: Value = reqwest::get(format!("{base}/api/v1/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"]["circuits"][0]["name"], "capacity");
        assert_eq!(body["metrics"]["routing"]["received"], 0);
    }

    #[tokio::test]
    async fn test_ingest_and_duplicate() {
        let (base, state) = spawn_app().await;
        let client = reqwest::Client::new();
        let event = json!({
            "eventId": "evt-1",
            "subjectId": "node-7",
            "eventType": "CPU_UTILIZATION",
            "payload": {"cpuUsage": 42.0}
        });

        let (status, body) = post_event(&client, &base, event.clone()).await;
        assert_eq!(status, 200);
        assert_eq!(body["outcome"], "processed");

        let (status, body) = post_event(&client, &base, event).await;
        assert_eq!(status, 200);
        assert_eq!(body["outcome"], "duplicate");
        assert_eq!(body["key"], "id:evt-1");
        assert_eq!(state.router.stats().received, 2);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_dead_lettered() {
        let (base, _) = spawn_app().await;
        let client = reqwest::Client::new();

        let (status, body) = post_event(
            &client,
            &base,
            json!({"subjectId": "node-7", "eventType": "CPU_UTILIZATION", "payload": {"cpuUsage": 150}}),
        )
        .await;
        assert_eq!(status, 202);
        assert_eq!(body["outcome"], "failed");
        assert_eq!(body["failure_class"], "VALIDATION_FAILED");

        let body: Value = reqwest::get(format!(
            "{base}/api/v1/dead-letters?status=REQUIRES_MANUAL_INTERVENTION"
        ))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["attemptCount"], 1);
        assert_eq!(body["unreviewed_evictions"], 0);
    }

    #[tokio::test]
    async fn test_empty_subject_rejected() {
        let (base, _) = spawn_app().await;
        let client = reqwest::Client::new();
        let (status, body) = post_event(
            &client,
            &base,
            json!({"subjectId": " ", "eventType": "CPU_UTILIZATION"}),
        )
        .await;
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("subjectId"));
    }

    #[tokio::test]
    async fn test_alert_lifecycle_over_http() {
        let (base, _) = spawn_app().await;
        let client = reqwest::Client::new();

        let mut last = Value::Null;
        for value in [91.0, 93.0, 95.0] {
            let (_, body) = post_event(
                &client,
                &base,
                json!({"subjectId": "node-7", "eventType": "CPU_UTILIZATION", "payload": {"cpuUsage": value}}),
            )
            .await;
            last = body;
        }
        assert_eq!(last["transition"]["kind"], "ESCALATE");
        assert_eq!(last["notification"], "sent");

        let alerts: Value = reqwest::get(format!("{base}/api/v1/alerts"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(alerts["count"], 1);
        assert_eq!(alerts["data"][0]["severity"], "WARNING");
        assert_eq!(alerts["unacknowledged_count"], 1);

        let window: Value = reqwest::get(format!("{base}/api/v1/windows/node-7/cpu_utilization"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(window["summary"]["count"], 3);
        assert_eq!(window["summary"]["max"], 95.0);

        let ack = client
            .post(format!("{base}/api/v1/alerts/node-7/cpu_utilization/ack"))
            .send()
            .await
            .unwrap();
        assert_eq!(ack.status().as_u16(), 200);

        let resolve = client
            .post(format!("{base}/api/v1/alerts/node-7/cpu_utilization/resolve"))
            .send()
            .await
            .unwrap();
        assert_eq!(resolve.status().as_u16(), 200);

        let again = client
            .post(format!("{base}/api/v1/alerts/node-7/cpu_utilization/resolve"))
            .send()
            .await
            .unwrap();
        assert_eq!(again.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_metrics_without_exporter() {
        let (base, _) = spawn_app().await;
        let response = reqwest::get(format!("{base}/metrics")).await.unwrap();
        assert_eq!(response.status().as_u16(), 404);
    }
}
