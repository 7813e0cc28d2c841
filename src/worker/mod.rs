mod processor;

use std::sync::Arc;

use crate::{db::PaymentStore, fx::RateSource};

pub use processor::process;

#[cfg(test)]
pub use processor::testing;

/// Hands payment ids to the worker pool.
#[derive(Clone)]
pub struct Scheduler {
    tx: flume::Sender<String>,
}

impl Scheduler {
    pub fn schedule(&self, payment_id: String) {
        if let Err(err) = self.tx.send(payment_id) {
            tracing::error!(payment_id = %err.0, "schedule_err: worker queue closed");
        }
    }
}

#[tracing::instrument(skip_all)]
pub fn start(
    store: Arc<dyn PaymentStore>,
    rates: Arc<dyn RateSource>,
    workers: usize,
) -> Scheduler {
    let (tx, rx) = flume::unbounded::<String>();

    let workers = workers.max(1);
    tracing::info!(workers, "starting payment workers");

    for worker in 0..workers {
        let rx = rx.clone();
        let store = store.clone();
        let rates = rates.clone();

        tokio::spawn(async move {
            while let Ok(payment_id) = rx.recv_async().await {
                process(store.as_ref(), rates.as_ref(), &payment_id).await;
            }

            tracing::debug!(worker, "worker stopped");
        });
    }

    Scheduler { tx }
}
