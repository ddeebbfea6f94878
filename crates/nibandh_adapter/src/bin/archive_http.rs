#![forbid(unsafe_code)]

use std::{
    env,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use nibandh_adapter::{ArchiveAdapterRuntime, DispatchError};
use nibandh_contracts::wire::{GatewayErrorResponse, GatewayRequest};
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bind = env::var("NIBANDH_HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let addr: SocketAddr = bind.parse()?;

    let runtime = Arc::new(Mutex::new(ArchiveAdapterRuntime::default_from_env()?));
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/archive", post(dispatch))
        .with_state(runtime);

    println!("nibandh_archive_http listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz(
    State(runtime): State<Arc<Mutex<ArchiveAdapterRuntime>>>,
) -> (StatusCode, Json<Value>) {
    let runtime = match runtime.lock() {
        Ok(runtime) => runtime,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_body("adapter runtime lock poisoned")),
            );
        }
    };
    match serde_json::to_value(runtime.health()) {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(error_body(&err.to_string())),
        ),
    }
}

async fn dispatch(
    State(runtime): State<Arc<Mutex<ArchiveAdapterRuntime>>>,
    Json(request): Json<GatewayRequest>,
) -> (StatusCode, Json<Value>) {
    let mut runtime = match runtime.lock() {
        Ok(runtime) => runtime,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_body("adapter runtime lock poisoned")),
            );
        }
    };
    match runtime.dispatch(&request) {
        Ok(response) => match serde_json::to_value(&response) {
            Ok(body) => (StatusCode::OK, Json(body)),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(error_body(&err.to_string())),
            ),
        },
        Err(DispatchError::BadRequest(reason)) => {
            (StatusCode::BAD_REQUEST, Json(error_body(&reason)))
        }
        Err(DispatchError::Internal(reason)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(error_body(&reason)),
        ),
    }
}

fn error_body(reason: &str) -> Value {
    serde_json::to_value(GatewayErrorResponse {
        error: reason.to_string(),
    })
    .unwrap_or_else(|_| Value::String(reason.to_string()))
}
