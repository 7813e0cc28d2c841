use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::fx::FxError;

const RATE_KEYS: [&str; 3] = ["rate", "fx_rate", "fxRate"];
const NESTED_KEY: &str = "result";

/// Shape of an upstream response body once decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum RateBody {
    /// Bare number or string, either from JSON or the raw trimmed text.
    Scalar(String),
    Object(Map<String, Value>),
    Null,
    /// Anything else JSON can hold; keeps the type name for the error.
    Other(&'static str),
}

impl RateBody {
    /// Decodes as JSON, falling back to the trimmed text when that fails.
    pub fn decode(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => value.into(),
            Err(_) => RateBody::Scalar(text.trim().to_string()),
        }
    }
}

impl From<Value> for RateBody {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RateBody::Null,
            Value::Number(n) => RateBody::Scalar(n.to_string()),
            Value::String(s) => RateBody::Scalar(s),
            Value::Object(map) => RateBody::Object(map),
            Value::Bool(_) => RateBody::Other("boolean"),
            Value::Array(_) => RateBody::Other("array"),
        }
    }
}

pub fn parse_rate(body: &RateBody) -> Result<Decimal, FxError> {
    match body {
        RateBody::Null => Err(FxError::invalid_response("FX response is null")),
        RateBody::Scalar(raw) => {
            let rate = parse_decimal(raw).ok_or_else(|| {
                FxError::invalid_response(format!("FX rate is not numeric: {raw}"))
            })?;

            if rate <= Decimal::ZERO {
                return Err(FxError::invalid_response(format!(
                    "FX rate must be > 0, got {rate}"
                )));
            }

            Ok(rate)
        }
        RateBody::Object(map) => candidates(map)
            .filter_map(candidate_rate)
            .find(|rate| *rate > Decimal::ZERO)
            .ok_or_else(|| {
                FxError::invalid_response(format!(
                    "Could not find a numeric 'rate' in FX response: {}",
                    Value::Object(map.clone())
                ))
            }),
        RateBody::Other(kind) => Err(FxError::invalid_response(format!(
            "Unrecognized FX response type: {kind}"
        ))),
    }
}

/// Top-level keys first, then the same keys under `result`.
fn candidates(map: &Map<String, Value>) -> impl Iterator<Item = &Value> {
    let nested = match map.get(NESTED_KEY) {
        Some(Value::Object(inner)) => Some(inner),
        _ => None,
    };

    let keys: &'static [&str] = &RATE_KEYS;

    let top = keys.iter().filter_map(move |key| map.get(*key));
    let inner = nested
        .into_iter()
        .flat_map(move |inner| keys.iter().filter_map(move |key| inner.get(*key)));

    top.chain(inner)
}

fn candidate_rate(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();

    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}
