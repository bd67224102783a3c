//! HTTP API.
//!
//! Thin axum wrapper over the monitor and the recharge flow. Runs are
//! synchronous: the response carries the terminal outcome, and completed
//! runs stay queryable in memory by run id for the life of the process.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::captcha::CaptchaOracle;
use crate::config::Config;
use crate::driver::DriverFactory;
use crate::flow::{self, RechargeRequest};
use crate::monitor::PaymentMonitor;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 18790,
        }
    }
}

/// Shared handler state.
pub struct AppState {
    pub config: Config,
    pub factory: Arc<dyn DriverFactory>,
    pub oracle: Option<Arc<dyn CaptchaOracle>>,
    pub runs: Mutex<HashMap<Uuid, Value>>,
}

impl AppState {
    pub fn new(
        config: Config,
        factory: Arc<dyn DriverFactory>,
        oracle: Option<Arc<dyn CaptchaOracle>>,
    ) -> Self {
        Self {
            config,
            factory,
            oracle,
            runs: Mutex::new(HashMap::new()),
        }
    }
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/monitor", post(start_monitor))
        .route("/api/v1/recharge", post(start_recharge))
        .route("/api/v1/runs/{id}", get(get_run))
        .fallback(not_found)
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(state: Arc<AppState>) -> Result<(), ServerError> {
    let addr = format!("{}:{}", state.config.server.bind, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ServerError::Bind(addr.clone(), e))?;
    tracing::info!(addr = %addr, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "paywatch",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonitorBody {
    payment_url: String,
    timeout_seconds: Option<u64>,
}

async fn start_monitor(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MonitorBody>,
) -> (StatusCode, Json<Value>) {
    if body.payment_url.is_empty() {
        return bad_request("paymentUrl is required");
    }

    let mut settings = state.config.monitor.clone();
    if let Some(timeout) = body.timeout_seconds {
        settings.timeout_seconds = timeout;
    }

    let mut driver = match state.factory.sampling().await {
        Ok(driver) => driver,
        Err(err) => {
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "success": false, "error": err.to_string() })),
            )
        }
    };

    let monitor = PaymentMonitor::new(settings, state.config.classifier.clone());
    let report = monitor.run(driver.as_mut(), &body.payment_url).await;

    let run_id = Uuid::new_v4();
    let response = json!({
        "success": report.outcome.is_success(),
        "runId": run_id,
        "outcome": report.outcome,
        "events": report.events.len(),
    });
    state.runs.lock().insert(run_id, response.clone());
    (StatusCode::OK, Json(response))
}

async fn start_recharge(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RechargeRequest>,
) -> (StatusCode, Json<Value>) {
    let mut missing = Vec::new();
    if request.username.is_empty() {
        missing.push("username");
    }
    if request.password.is_empty() {
        missing.push("password");
    }
    if request.beneficiary.is_empty() {
        missing.push("beneficiary");
    }
    if !missing.is_empty() {
        return bad_request(&format!("missing required fields: {}", missing.join(", ")));
    }
    if request.amount.is_none() && request.voucher_code.is_none() {
        return bad_request("either amount or voucherCode is required");
    }
    if request.amount == Some(0) {
        return bad_request("amount must be a positive integer");
    }

    let report = flow::recharge_and_monitor(
        state.factory.as_ref(),
        state.oracle.as_deref(),
        &request,
        &state.config,
    )
    .await;

    let run_id = Uuid::new_v4();
    let mut response = match serde_json::to_value(&report) {
        Ok(value) => value,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": err.to_string() })),
            )
        }
    };
    if let Value::Object(map) = &mut response {
        map.insert("runId".to_string(), json!(run_id));
    }
    state.runs.lock().insert(run_id, response.clone());

    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(response))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<Value>) {
    match state.runs.lock().get(&id) {
        Some(report) => (StatusCode::OK, Json(report.clone())),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "run not found" })),
        ),
    }
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "endpoint not found",
            "availableEndpoints": [
                "GET /health",
                "POST /api/v1/monitor",
                "POST /api/v1/recharge",
                "GET /api/v1/runs/{id}",
            ],
        })),
    )
}

fn bad_request(message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": message })),
    )
}
