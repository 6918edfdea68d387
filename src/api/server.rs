//! HTTP lookup API
//!
//! Thin axum routing over [`FeatureQueryService`](crate::service::FeatureQueryService).
//! Client-input errors become `400` responses carrying the supported feature
//! names; anything else is a bare `500`.

use crate::context::FeatureStoreContext;
use crate::engine::PassRun;
use crate::service::QueryError;
use crate::types::{value_to_json, EntityKey};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server address
    pub addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            addr: ([0, 0, 0, 0], 4000).into(),
        }
    }
}

/// API server state
#[derive(Clone)]
struct AppState {
    context: Arc<FeatureStoreContext>,
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    context: Arc<FeatureStoreContext>,
}

impl ApiServer {
    /// Create new API server
    pub fn new(config: ApiServerConfig, context: Arc<FeatureStoreContext>) -> Self {
        Self { config, context }
    }

    /// Build router
    pub fn router(context: Arc<FeatureStoreContext>) -> Router {
        Router::new()
            .route("/featureInference", post(feature_inference_handler))
            .route("/featureTraining", post(feature_training_handler))
            .route("/featureDiscovery", get(feature_discovery_handler))
            // Health check
            .route("/health", get(health_handler))
            // State
            .with_state(AppState { context })
            // Middleware
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` fires
    pub async fn serve(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let router = Self::router(self.context.clone());
        let listener = tokio::net::TcpListener::bind(self.config.addr).await?;
        info!("Feature store API listening on http://{}", self.config.addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Feature store API stopped");
        Ok(())
    }
}

/// Error body returned to callers
struct ApiError(QueryError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_client_error() {
            let body = json!({
                "error": self.0.to_string(),
                "supported": self.0.supported(),
            });
            (StatusCode::BAD_REQUEST, Json(body)).into_response()
        } else {
            let body = json!({ "error": "internal error" });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError(err)
    }
}

/// Lookup request fields, read leniently from any JSON body
///
/// Unreadable bodies and non-object bodies carry no fields. A `featureName`
/// that is not a string is kept in its JSON text form so it is reported as
/// an unsupported name.
#[derive(Debug, Default)]
struct LookupRequest {
    feature_name: Option<String>,
    base_feature: Option<Value>,
}

impl LookupRequest {
    fn from_body(body: Result<Json<Value>, JsonRejection>) -> Self {
        let fields = match body {
            Ok(Json(Value::Object(fields))) => fields,
            Ok(Json(other)) => {
                debug!("Lookup body is not a JSON object: {}", other);
                return Self::default();
            }
            Err(rejection) => {
                debug!("Unreadable lookup body: {}", rejection.body_text());
                return Self::default();
            }
        };

        let feature_name = match fields.get("featureName") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(other) => Some(other.to_string()),
        };
        Self {
            feature_name,
            base_feature: fields.get("baseFeature").cloned(),
        }
    }
}

/// Accept integer keys and their decimal string form
fn entity_key(value: Option<&Value>) -> Option<EntityKey> {
    match value? {
        Value::Number(n) => n.as_i64().map(EntityKey),
        Value::String(s) => s.trim().parse().ok().map(EntityKey),
        _ => None,
    }
}

/// Point lookup handler
async fn feature_inference_handler(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = LookupRequest::from_body(body);
    let value = state
        .context
        .queries
        .inference(req.feature_name.as_deref(), entity_key(req.base_feature.as_ref()))
        .await?;
    Ok(Json(json!({ "featureInference": value_to_json(value.as_ref()) })))
}

/// Namespace dump handler
async fn feature_training_handler(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = LookupRequest::from_body(body);
    let records = state
        .context
        .queries
        .training(req.feature_name.as_deref())
        .await?;

    let body: Map<String, Value> = records
        .iter()
        .map(|(key, value)| (key.to_string(), value_to_json(value.as_ref())))
        .collect();
    Ok(Json(json!({ "featureTraining": body })))
}

/// Discovery handler
async fn feature_discovery_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let names = state.context.queries.discovery().await?;
    Ok(Json(json!({ "feature_discovery": names })))
}

/// Health check handler
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    supported_features: usize,
    pass_running: bool,
    last_pass: Option<PassRun>,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let supported = state.context.queries.discovery().await.map(|n| n.len());
    Json(HealthResponse {
        status: if supported.is_ok() { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        supported_features: supported.unwrap_or(0),
        pass_running: state.context.engine.is_running(),
        last_pass: state.context.engine.last_run().await,
    })
}
