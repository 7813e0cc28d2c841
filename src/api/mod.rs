pub mod payment;

use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Json, Router,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing,
};
use serde_json::json;
use tokio::net::TcpListener;

use crate::{db::PaymentStore, payment::ValidationError, worker::Scheduler};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PaymentStore>,
    pub scheduler: Scheduler,
}

pub fn router(state: AppState) -> Router {
    let layer = tower_http::trace::TraceLayer::new_for_http()
        .on_request(|request: &Request<_>, _: &tracing::Span| {
            tracing::debug!(method = ?request.method(), url = ?request.uri(), "req");
        })
        .on_response(
            |response: &axum::http::Response<_>, latency: Duration, _: &tracing::Span| {
                tracing::debug!(status = ?response.status(), ?latency, "res");
            },
        );

    Router::new()
        .route("/health", routing::get(health))
        .route("/payments", routing::post(payment::create))
        .route("/payments/{payment_id}", routing::get(payment::get))
        .layer(layer)
        .with_state(state)
}

pub async fn serve(port: u16, state: AppState) -> Result<()> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    tracing::info!("api listening on {port}");

    axum::serve(listener, router(state)).await?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("payment not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(ValidationError(errors)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "detail": errors })))
                    .into_response()
            }
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "detail": "payment not found" })),
            )
                .into_response(),
            ApiError::Internal(err) => {
                tracing::error!(?err, "api_err");

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}
