use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::cache::{CacheStore, DatasetService};
use crate::domain::{MetricDetail, Summary};
use crate::error::TransposeError;
use crate::fetch::Fetcher;

#[derive(Debug, Default, Deserialize)]
pub struct PlatformParams {
    platform: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub source: String,
    pub version: String,
}

/// Not-found errors map to 404, everything else to 500.
#[derive(Debug)]
pub struct ApiError(TransposeError);

impl From<TransposeError> for ApiError {
    fn from(err: TransposeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            error!(error = %self.0, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn build_router<F, C>(service: Arc<DatasetService<F, C>>) -> Router
where
    F: Fetcher + 'static,
    C: CacheStore + 'static,
{
    Router::new()
        .route("/datasets/{dataset}", get(dataset_summary::<F, C>))
        .route(
            "/datasets/{dataset}/{category}/{metric}",
            get(metric_detail::<F, C>),
        )
        .route("/__heartbeat__", get(heartbeat))
        .route("/__lbheartbeat__", get(heartbeat))
        .route("/__version__", get(version))
        .with_state(service)
}

async fn dataset_summary<F, C>(
    State(service): State<Arc<DatasetService<F, C>>>,
    Path(dataset): Path<String>,
    Query(params): Query<PlatformParams>,
) -> Result<Json<Summary>, ApiError>
where
    F: Fetcher + 'static,
    C: CacheStore + 'static,
{
    let summary = service
        .summary(&dataset, params.platform.as_deref())
        .await?;
    Ok(Json(summary))
}

async fn metric_detail<F, C>(
    State(service): State<Arc<DatasetService<F, C>>>,
    Path((dataset, category, metric)): Path<(String, String, String)>,
    Query(params): Query<PlatformParams>,
) -> Result<Json<MetricDetail>, ApiError>
where
    F: Fetcher + 'static,
    C: CacheStore + 'static,
{
    let detail = service
        .metric(&dataset, &category, &metric, params.platform.as_deref())
        .await?;
    Ok(Json(detail))
}

async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        source: env!("CARGO_PKG_REPOSITORY").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Binds `host:port` and serves until the process is stopped.
pub async fn run_server<F, C>(
    service: Arc<DatasetService<F, C>>,
    host: &str,
    port: u16,
) -> Result<(), TransposeError>
where
    F: Fetcher + 'static,
    C: CacheStore + 'static,
{
    let app = build_router(service);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|err| TransposeError::Server {
            addr: addr.clone(),
            message: err.to_string(),
        })?;
    tracing::info!(addr = %addr, "listening");
    axum::serve(listener, app)
        .await
        .map_err(|err| TransposeError::Server {
            addr,
            message: err.to_string(),
        })
}
