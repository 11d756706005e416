//! Pet Classifier API Server
//!
//! HTTP boundary around the cat/dog inference pipeline.

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use inference_engine::{load_model_with, Predictor};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_governor::GovernorLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod error;
mod rate_limit;
pub mod routes;
mod settings;

pub use error::{ApiError, ServerError};
pub use rate_limit::{create_governor_config, RateLimitConfig};
pub use settings::{LogSettings, MetricsSettings, ModelSettings, ServerSettings, Settings};

/// Application state shared across handlers
pub struct AppState {
    /// Loaded classifier, immutable for the process lifetime
    pub predictor: Arc<Predictor>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
    /// Prometheus handle when metrics are enabled
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create new application state
    pub fn new(predictor: Predictor) -> Self {
        Self {
            predictor: Arc::new(predictor),
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
            metrics: None,
        }
    }

    /// Attach a metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Load the model artifact and build the application state.
///
/// Fails before anything is bound when the artifact is missing or corrupt.
pub fn build_state(settings: &Settings) -> Result<AppState, ServerError> {
    let path = settings.artifact_path();
    let predictor = load_model_with(&path, &settings.engine_config())?;
    Ok(AppState::new(predictor))
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer, ServerError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return Ok(layer.allow_origin(Any));
    }
    let origins = origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| ServerError::Config(format!("invalid CORS origin {}: {}", o, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

/// Create the application router
pub fn create_router(state: Arc<AppState>, settings: &Settings) -> Result<Router, ServerError> {
    let mut predict = Router::new().route("/predict", post(routes::predict::predict));
    if settings.rate_limit.enabled {
        let config = create_governor_config(&settings.rate_limit)
            .ok_or_else(|| ServerError::Config("invalid rate limit quota".to_string()))?;
        info!(
            "Rate limiting /predict: burst={}, replenish every {}s",
            settings.rate_limit.burst_size, settings.rate_limit.per_second
        );
        predict = predict.layer(GovernorLayer { config });
    }

    let mut router = Router::new()
        .route("/", get(routes::info::root))
        .route("/health", get(routes::info::health))
        .route("/ui", get(routes::info::ui))
        .route("/metrics", get(routes::info::metrics))
        .merge(predict)
        .layer(DefaultBodyLimit::max(settings.server.max_upload_bytes));

    if !settings.server.cors_allow_origins.is_empty() {
        router = router.layer(cors_layer(&settings.server.cors_allow_origins)?);
    }

    Ok(router.layer(TraceLayer::new_for_http()).with_state(state))
}

/// Initialize logging
pub fn init_logging(settings: &LogSettings) -> Result<(), ServerError> {
    let filter = EnvFilter::try_new(&settings.level)
        .map_err(|e| ServerError::Logging(format!("invalid level {:?}: {}", settings.level, e)))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| ServerError::Logging(e.to_string()))
}

/// Install the global Prometheus recorder
pub fn install_metrics() -> Result<PrometheusHandle, ServerError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Serve the router on an already bound listener
pub async fn serve(listener: TcpListener, app: Router) -> Result<(), ServerError> {
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Load the model, then bind and run the server
pub async fn run_server(settings: Settings) -> Result<(), ServerError> {
    let mut state = build_state(&settings)?;
    if settings.metrics.enabled {
        state = state.with_metrics(install_metrics()?);
    }
    let app = create_router(Arc::new(state), &settings)?;

    let addr = settings.bind_addr();
    info!("Starting API server on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    serve(listener, app).await
}
