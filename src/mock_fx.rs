use std::net::Ipv4Addr;

use anyhow::Result;
use axum::{Json, Router, extract::State, routing};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Stand-in upstream answering every pair with a fixed rate.
pub fn router(rate: Decimal) -> Router {
    Router::new()
        .route("/rate", routing::get(rate_handler))
        .with_state(rate)
}

async fn rate_handler(State(rate): State<Decimal>) -> Json<Value> {
    Json(json!({ "rate": rate }))
}

pub async fn serve(port: u16, rate: Decimal) -> Result<()> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    tracing::info!(%rate, "mock fx listening on {port}");

    axum::serve(listener, router(rate)).await?;

    Ok(())
}
