use anyhow::{Result, anyhow};
use rust_decimal::Decimal;

use crate::{
    db::PaymentStore,
    fx::{FxError, RateSource},
    payment::{self, Payment, UNKNOWN_ERROR},
};

/// Resolves the rate for one PENDING payment and records the outcome.
///
/// Missing or already settled payments are left untouched. Failures end up on
/// the payment record; store errors are logged.
#[tracing::instrument(skip(store, rates))]
pub async fn process(store: &dyn PaymentStore, rates: &dyn RateSource, payment_id: &str) {
    if let Err(err) = handle(store, rates, payment_id).await {
        tracing::error!(?err, "process_payment_err");
    }
}

async fn handle(store: &dyn PaymentStore, rates: &dyn RateSource, payment_id: &str) -> Result<()> {
    let Some(mut payment) = store.get(payment_id).await? else {
        tracing::debug!("payment not found");
        return Ok(());
    };

    if !payment.is_pending() {
        tracing::debug!(status = %payment.status, "payment already handled");
        return Ok(());
    }

    payment.begin_attempt();

    match convert(rates, &payment).await {
        Ok((rate, payout)) => payment.succeed(rate, payout),
        Err(err) => match err.downcast_ref::<FxError>() {
            Some(fx) => payment.fail(fx.code.as_str(), &fx.message),
            None => payment.fail(UNKNOWN_ERROR, &err.to_string()),
        },
    }

    if !store.complete(&payment).await? {
        tracing::warn!("payment was completed concurrently, result dropped");
        return Ok(());
    }

    tracing::info!(
        status = %payment.status,
        attempt_count = payment.attempt_count,
        error_code = ?payment.error_code,
        "payment_processed"
    );

    Ok(())
}

async fn convert(rates: &dyn RateSource, payment: &Payment) -> Result<(Decimal, Decimal)> {
    let quotation = rates
        .quote(&payment.source_currency, &payment.destination_currency)
        .await?;

    tracing::debug!(
        source = %quotation.source,
        destination = %quotation.destination,
        rate = %quotation.rate,
        "rate_quoted"
    );

    let payout = payment::payout(payment.amount, quotation.rate).ok_or_else(|| {
        anyhow!(
            "payout overflow: {} x {}",
            payment.amount,
            quotation.rate
        )
    })?;

    Ok((quotation.rate, payout))
}


#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::{
        testing::{FailingStore, FixedRates},
        *,
    };
    use crate::{
        db::SqliteStore,
        fx::FxErrorCode,
        payment::{NewPayment, PaymentStatus},
    };

    async fn pending(store: &SqliteStore, amount: Decimal) -> Payment {
        let payment = Payment::new(
            NewPayment {
                sender: "alice".into(),
                receiver: "bob".into(),
                amount,
                source_currency: "USD".into(),
                destination_currency: "EUR".into(),
            },
            None,
        );

        store.insert(&payment).await.unwrap();

        payment
    }

    #[tokio::test]
    async fn test_success_sets_rate_and_rounded_payout() {
        let cases = [
            (dec!(100), dec!(1.1), dec!(110.000000)),
            (dec!(10), dec!(0.12345675), dec!(1.234568)),
            (dec!(0.01), dec!(0.00000005), dec!(0.000000)),
            (dec!(3), dec!(0.3333335), dec!(1.000001)),
            (dec!(123456.789), dec!(151.25), dec!(18672839.336250)),
        ];

        for (amount, rate, expected) in cases {
            let store = SqliteStore::in_memory().unwrap();
            let payment = pending(&store, amount).await;
            let rates = FixedRates::ok(rate);

            process(&store, &rates, &payment.id).await;

            let stored = store.get(&payment.id).await.unwrap().unwrap();
            assert_eq!(stored.status, PaymentStatus::Succeeded);
            assert_eq!(stored.fx_rate, Some(rate));
            assert_eq!(stored.payout_amount, Some(expected), "{amount} x {rate}");
            assert_eq!(stored.error_code, None);
            assert_eq!(stored.error_message, None);
            assert_eq!(stored.attempt_count, 1);
            assert!(stored.last_attempt_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_fx_error_is_recorded() {
        let store = SqliteStore::in_memory().unwrap();
        let payment = pending(&store, dec!(50)).await;
        let rates = FixedRates::err(FxError::new(
            FxErrorCode::Timeout,
            "FX request timed out after retries",
        ));

        process(&store, &rates, &payment.id).await;

        let stored = store.get(&payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.error_code.as_deref(), Some("FX_TIMEOUT"));
        assert_eq!(
            stored.error_message.as_deref(),
            Some("FX request timed out after retries")
        );
        assert_eq!(stored.fx_rate, None);
        assert_eq!(stored.payout_amount, None);
        assert_eq!(stored.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_unexpected_failure_is_unknown_error() {
        let store = SqliteStore::in_memory().unwrap();
        let payment = pending(&store, Decimal::MAX).await;
        let rates = FixedRates::ok(dec!(2));

        process(&store, &rates, &payment.id).await;

        let stored = store.get(&payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.error_code.as_deref(), Some(UNKNOWN_ERROR));
        assert!(stored.error_message.unwrap().starts_with("payout overflow"));
    }

    #[tokio::test]
    async fn test_settled_payments_are_left_alone() {
        let store = SqliteStore::in_memory().unwrap();
        let succeeded = pending(&store, dec!(10)).await;
        let failed = pending(&store, dec!(10)).await;

        process(&store, &FixedRates::ok(dec!(2)), &succeeded.id).await;
        process(
            &store,
            &FixedRates::err(FxError::invalid_response("bad")),
            &failed.id,
        )
        .await;

        let before_ok = store.get(&succeeded.id).await.unwrap().unwrap();
        let before_failed = store.get(&failed.id).await.unwrap().unwrap();

        let rates = FixedRates::ok(dec!(3));
        process(&store, &rates, &succeeded.id).await;
        process(&store, &rates, &failed.id).await;

        assert_eq!(rates.calls(), 0);
        assert_eq!(store.get(&succeeded.id).await.unwrap().unwrap(), before_ok);
        assert_eq!(store.get(&failed.id).await.unwrap().unwrap(), before_failed);
    }

    #[tokio::test]
    async fn test_missing_payment_is_ignored() {
        let store = SqliteStore::in_memory().unwrap();
        let rates = FixedRates::ok(dec!(1.5));

        process(&store, &rates, "does-not-exist").await;

        assert_eq!(rates.calls(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_logged_not_raised() {
        let rates = FixedRates::ok(dec!(1.5));

        process(&FailingStore, &rates, "any-id").await;

        assert_eq!(rates.calls(), 0);
    }
}
