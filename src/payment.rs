use std::{fmt, str::FromStr};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::db::PaymentStore;

pub const PAYOUT_SCALE: u32 = 6;
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

const MAX_LABEL_LEN: usize = 128;
const MAX_KEY_LEN: usize = 128;
const MAX_ERROR_MESSAGE_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Succeeded => "SUCCEEDED",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCEEDED" => Ok(PaymentStatus::Succeeded),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(anyhow::anyhow!("unknown payment status {other:?}")),
        }
    }
}

/// A cross-currency payment and where it is in its lifecycle.
///
/// `fx_rate`/`payout_amount` are only set once SUCCEEDED and
/// `error_code`/`error_message` only once FAILED.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: String,
    pub idempotency_key: Option<String>,
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
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Same-currency payments need no rate and are settled on creation.
    pub fn new(new: NewPayment, idempotency_key: Option<String>) -> Self {
        let now = Utc::now();

        let mut payment = Payment {
            id: uuid::Uuid::new_v4().to_string(),
            idempotency_key,
            sender: new.sender,
            receiver: new.receiver,
            amount: new.amount,
            source_currency: new.source_currency,
            destination_currency: new.destination_currency,
            status: PaymentStatus::Pending,
            fx_rate: None,
            payout_amount: None,
            error_code: None,
            error_message: None,
            attempt_count: 0,
            last_attempt_at: None,
            created_at: now,
            updated_at: now,
        };

        if payment.source_currency == payment.destination_currency {
            payment.fx_rate = Some(Decimal::ONE);
            payment.payout_amount = Some(payment.amount);
            payment.status = PaymentStatus::Succeeded;
        }

        payment
    }

    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }

    pub fn begin_attempt(&mut self) {
        let now = Utc::now();

        self.attempt_count += 1;
        self.last_attempt_at = Some(now);
        self.updated_at = now;
    }

    pub fn succeed(&mut self, rate: Decimal, payout: Decimal) {
        self.status = PaymentStatus::Succeeded;
        self.fx_rate = Some(rate);
        self.payout_amount = Some(payout);
        self.error_code = None;
        self.error_message = None;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, code: &str, message: &str) {
        self.status = PaymentStatus::Failed;
        self.fx_rate = None;
        self.payout_amount = None;
        self.error_code = Some(code.to_string());
        self.error_message = Some(message.chars().take(MAX_ERROR_MESSAGE_LEN).collect());
        self.updated_at = Utc::now();
    }
}

/// `amount * rate`, rounded half-up to six places. `None` on overflow.
pub fn payout(amount: Decimal, rate: Decimal) -> Option<Decimal> {
    let raw = amount.checked_mul(rate)?;

    let mut rounded =
        raw.round_dp_with_strategy(PAYOUT_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(PAYOUT_SCALE);

    Some(rounded)
}

/// Creation request as received from the API.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    pub sender: String,
    pub receiver: String,
    pub amount: Decimal,
    pub source_currency: String,
    pub destination_currency: String,
}

/// A creation request that passed validation; labels trimmed, codes upper-cased.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub sender: String,
    pub receiver: String,
    pub amount: Decimal,
    pub source_currency: String,
    pub destination_currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid payment request: {}", join(.0))]
pub struct ValidationError(pub Vec<FieldError>);

fn join(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(FieldError::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl PaymentRequest {
    pub fn validate(self) -> Result<NewPayment, ValidationError> {
        let mut errors = Vec::new();

        let mut check = |field: &'static str, result: Result<String, String>| match result {
            Ok(value) => value,
            Err(message) => {
                errors.push(FieldError { field, message });
                String::new()
            }
        };

        let sender = check("sender", label(&self.sender));
        let receiver = check("receiver", label(&self.receiver));
        let source_currency = check("source_currency", currency(&self.source_currency));
        let destination_currency =
            check("destination_currency", currency(&self.destination_currency));

        if self.amount <= Decimal::ZERO {
            errors.push(FieldError {
                field: "amount",
                message: "must be greater than 0".to_string(),
            });
        }

        if !errors.is_empty() {
            return Err(ValidationError(errors));
        }

        Ok(NewPayment {
            sender,
            receiver,
            amount: self.amount,
            source_currency,
            destination_currency,
        })
    }
}

fn label(raw: &str) -> Result<String, String> {
    let value = raw.trim();

    if value.is_empty() {
        return Err("must not be blank".to_string());
    }

    if value.chars().count() > MAX_LABEL_LEN {
        return Err(format!("must be at most {MAX_LABEL_LEN} characters"));
    }

    Ok(value.to_string())
}

/// ISO 4217 plus longer crypto-style codes: 3 to 8 uppercase letters.
fn currency(raw: &str) -> Result<String, String> {
    let value = raw.trim().to_ascii_uppercase();

    let valid = (3..=8).contains(&value.len()) && value.bytes().all(|b| b.is_ascii_uppercase());

    if !valid {
        return Err(
            "currency must be uppercase letters (3-8 chars), e.g., USD, EUR, XRP".to_string(),
        );
    }

    Ok(value)
}

pub fn idempotency_key(raw: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(key) = raw.map(str::trim).filter(|k| !k.is_empty()) else {
        return Ok(None);
    };

    if key.chars().count() > MAX_KEY_LEN {
        return Err(ValidationError(vec![FieldError {
            field: "idempotency_key",
            message: format!("must be at most {MAX_KEY_LEN} characters"),
        }]));
    }

    Ok(Some(key.to_string()))
}

pub struct Created {
    pub payment: Payment,
    /// Whether the payment still needs a rate and should be handed to a worker.
    pub scheduled: bool,
}

#[tracing::instrument(skip_all, fields(idempotency_key = ?idempotency_key))]
pub async fn create(
    store: &dyn PaymentStore,
    new: NewPayment,
    idempotency_key: Option<String>,
) -> Result<Created> {
    if let Some(key) = &idempotency_key
        && let Some(existing) = store.find_by_idempotency_key(key).await?
    {
        tracing::debug!(payment_id = %existing.id, "idempotent_replay");

        return Ok(Created {
            payment: existing,
            scheduled: false,
        });
    }

    let payment = Payment::new(new, idempotency_key);

    if let Err(err) = store.insert(&payment).await {
        // a concurrent request with the same key may have won the insert
        if let Some(key) = &payment.idempotency_key
            && let Some(existing) = store.find_by_idempotency_key(key).await?
        {
            return Ok(Created {
                payment: existing,
                scheduled: false,
            });
        }

        return Err(err);
    }

    tracing::info!(payment_id = %payment.id, status = %payment.status, "payment_created");

    let scheduled = payment.is_pending();

    Ok(Created { payment, scheduled })
}
