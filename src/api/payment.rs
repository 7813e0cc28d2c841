use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use chrono::SecondsFormat;
use rust_decimal::Decimal;

use crate::{
    api::{ApiError, AppState},
    db::PaymentStore,
    payment::{self, Payment, PaymentRequest, PaymentStatus},
};

const IDEMPOTENCY_HEADERS: [&str; 2] = ["idempotency-key", "idempotency_key"];

#[tracing::instrument(skip_all)]
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<PaymentView>), ApiError> {
    let raw_key = IDEMPOTENCY_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok());

    let key = payment::idempotency_key(raw_key)?;
    let new = request.validate()?;

    let created = payment::create(state.store.as_ref(), new, key).await?;

    if created.scheduled {
        state.scheduler.schedule(created.payment.id.clone());
    }

    Ok((StatusCode::ACCEPTED, Json(PaymentView::from(&created.payment))))
}

#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentView>, ApiError> {
    let payment = state
        .store
        .get(&payment_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(PaymentView::from(&payment)))
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct PaymentView {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub amount: Decimal,
    pub source_currency: String,
    pub destination_currency: String,
    pub status: PaymentStatus,
    pub fx_rate: Option<Decimal>,
    pub payout_amount: Option<Decimal>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub attempt_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Payment> for PaymentView {
    fn from(p: &Payment) -> Self {
        PaymentView {
            id: p.id.clone(),
            sender: p.sender.clone(),
            receiver: p.receiver.clone(),
            amount: p.amount,
            source_currency: p.source_currency.clone(),
            destination_currency: p.destination_currency.clone(),
            status: p.status,
            fx_rate: p.fx_rate,
            payout_amount: p.payout_amount,
            error_code: p.error_code.clone(),
            error_message: p.error_message.clone(),
            attempt_count: p.attempt_count,
            created_at: p.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            updated_at: p.updated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}
