//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::errors::{DeployError, ErrorKind};
use crate::models::deployment::{DeployRequest, DeploymentResult, DeploymentSpec};
use crate::server::state::ServerState;
use crate::utils::version_info;

const MASKED_MESSAGE: &str = "An internal error occurred";

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    /// Seconds since the server started
    pub uptime: u64,
    pub version: String,
    pub active_deployments: usize,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        uptime: state.started_at.elapsed().as_secs(),
        version: version_info().version,
        active_deployments: state.service.active_deployments(),
    })
}

/// Successful deploy response
#[derive(Debug, Serialize)]
pub struct DeploySuccess {
    pub success: bool,
    pub deployment_id: String,
    pub data: DeploymentResult,
}

/// Error payload in failure responses
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
    pub logs: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorBody {
    /// Unclassified failures lose their message and payload in production
    pub fn from_error(err: &DeployError, production: bool) -> Self {
        let masked = production && err.kind() == ErrorKind::System;
        Self {
            code: err.kind().code().to_string(),
            message: if masked {
                MASKED_MESSAGE.to_string()
            } else {
                err.message().to_string()
            },
            details: if masked { None } else { err.details().cloned() },
            logs: if masked { Vec::new() } else { err.logs().to_vec() },
            timestamp: err.timestamp(),
        }
    }
}

/// Failed deploy response
#[derive(Debug, Serialize)]
pub struct DeployFailure {
    pub success: bool,
    pub deployment_id: Option<String>,
    pub error: ErrorBody,
}

/// An error on its way out, with the status its kind maps to
pub struct ApiError {
    deployment_id: Option<String>,
    error: DeployError,
    production: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.kind().status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = DeployFailure {
            success: false,
            deployment_id: self.deployment_id,
            error: ErrorBody::from_error(&self.error, self.production),
        };
        (status, Json(body)).into_response()
    }
}

/// Deploy handler
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<DeployRequest>, JsonRejection>,
) -> Result<Json<DeploySuccess>, ApiError> {
    let reject = |deployment_id: Option<String>, error: DeployError| ApiError {
        deployment_id,
        error,
        production: state.production,
    };

    let Json(request) = payload.map_err(|e| {
        reject(
            None,
            DeployError::invalid_input(format!("Invalid request body: {}", e.body_text())),
        )
    })?;
    let spec = DeploymentSpec::from_request(&request).map_err(|e| reject(None, e))?;
    let deployment_id = spec.id.clone();

    match state.service.deploy(spec).await {
        Ok(data) => Ok(Json(DeploySuccess {
            success: true,
            deployment_id,
            data,
        })),
        Err(e) => {
            error!("Deployment {} failed: {}", deployment_id, e);
            Err(reject(Some(deployment_id), e))
        }
    }
}

/// Status handler
pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> Response {
    match state.service.status(&deployment_id) {
        Some(status) => Json(status).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "success": false,
                "message": format!("Deployment {} not found", deployment_id),
            })),
        )
            .into_response(),
    }
}
