mod backoff;
mod error;
mod parse;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;

pub use backoff::{Backoff, Sleeper, TokioSleeper};
pub use error::{FxError, FxErrorCode};
pub use parse::{RateBody, parse_rate};

#[cfg(test)]
pub use backoff::testing::RecordingSleeper;

/// A resolved rate for one currency pair. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RateQuotation {
    pub source: String,
    pub destination: String,
    pub rate: Decimal,
}

#[async_trait]
pub trait RateSource: Send + Sync {
    async fn quote(&self, source: &str, destination: &str) -> Result<RateQuotation, FxError>;
}

#[derive(Debug, Clone)]
pub struct FxConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Backoff,
}

pub struct FxClient {
    http: Client,
    base_url: String,
    max_retries: u32,
    backoff: Backoff,
    sleeper: Arc<dyn Sleeper>,
}

enum AttemptError {
    Transient(String),
    Fatal(FxError),
}

impl FxClient {
    pub fn new(config: FxConfig) -> Result<Self> {
        Self::with_sleeper(config, Arc::new(TokioSleeper))
    }

    /// Backoff delays go through `sleeper` instead of the tokio timer.
    pub fn with_sleeper(config: FxConfig, sleeper: Arc<dyn Sleeper>) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            backoff: config.backoff,
            sleeper,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_rate(&self, source: &str, destination: &str) -> Result<Decimal, FxError> {
        let url = format!("{}/rate", self.base_url);

        let mut last_cause = None;

        for attempt in 1..=self.max_retries {
            match self.attempt(&url, source, destination).await {
                Ok(rate) => {
                    tracing::debug!(attempt, %rate, "fx_rate_ok");
                    return Ok(rate);
                }
                Err(AttemptError::Fatal(err)) => {
                    tracing::warn!(
                        attempt,
                        code = %err.code,
                        details = ?err.details,
                        "fx_rate_err"
                    );
                    return Err(err);
                }
                Err(AttemptError::Transient(cause)) => {
                    tracing::warn!(attempt, %cause, "fx_rate_retry");
                    last_cause = Some(cause);

                    if attempt < self.max_retries {
                        let delay = self.backoff.next_delay(attempt);
                        tracing::debug!(attempt, ?delay, "fx_backoff");
                        self.sleeper.sleep(delay).await;
                    }
                }
            }
        }

        Err(
            FxError::new(FxErrorCode::Timeout, "FX request timed out after retries").with_detail(
                "cause",
                last_cause.unwrap_or_else(|| "no attempt was made".to_string()),
            ),
        )
    }

    async fn attempt(
        &self,
        url: &str,
        source: &str,
        destination: &str,
    ) -> Result<Decimal, AttemptError> {
        let res = self
            .http
            .get(url)
            .query(&[("source", source), ("destination", destination)])
            .send()
            .await
            .map_err(|err| AttemptError::Transient(err.to_string()))?;

        let status = res.status();

        let body = res
            .text()
            .await
            .map_err(|err| AttemptError::Transient(err.to_string()))?;

        tracing::debug!(fx_status = ?status);

        if status.as_u16() >= 500 {
            let err = FxError::new(
                FxErrorCode::UpstreamError,
                format!("FX service 5xx: {}", status.as_u16()),
            )
            .with_detail("body", body);

            return Err(AttemptError::Transient(err.to_string()));
        }

        if status.is_client_error() {
            let err = FxError::new(
                FxErrorCode::BadRequest,
                format!("FX service 4xx: {}", status.as_u16()),
            )
            .with_detail("body", body);

            return Err(AttemptError::Fatal(err));
        }

        parse_rate(&RateBody::decode(&body)).map_err(AttemptError::Fatal)
    }
}

#[async_trait]
impl RateSource for FxClient {
    async fn quote(&self, source: &str, destination: &str) -> Result<RateQuotation, FxError> {
        let rate = self.get_rate(source, destination).await?;

        Ok(RateQuotation {
            source: source.to_string(),
            destination: destination.to_string(),
            rate,
        })
    }
}
