//! The ledger transfer workload for the driver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pacer::{BoxError, Workload};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::batch::create_transfers;
use crate::error::LedgerError;
use crate::model::{account_key, Account, Transfer};
use crate::retry::{retry, RetryPolicy};
use crate::sink::{Sink, SinkError, TransactWrite, WriteItem, TRANSACTION_ITEM_LIMIT};

/// Drives batches of ledger transfers against a [`Sink`].
///
/// Each iteration mints one batch of transfers between randomly paired
/// accounts and submits it as a single idempotent transactional write, so
/// `items_per_iteration` is the batch size. Account pairing is seeded per
/// iteration, which keeps runs reproducible without shared rng state.
#[derive(TypedBuilder)]
pub struct TransferWorkload<S> {
    sink: Arc<S>,
    #[builder(default = 1)]
    ledger: u32,
    #[builder(default = 64)]
    account_count: u64,
    #[builder(default = 8)]
    transfers_per_batch: usize,
    #[builder(default)]
    retry_policy: RetryPolicy,
    #[builder(default = 0)]
    seed: u64,
    #[builder(default, setter(skip))]
    telemetry: Telemetry,
}

#[derive(Debug, Default)]
struct Telemetry {
    iterations: AtomicU64,
    attempts: AtomicU64,
    retry_delay_micros: AtomicU64,
    conflicts: AtomicU64,
}

impl<S: Sink> TransferWorkload<S> {
    fn mint_batch(&self, iteration: u64) -> Vec<Transfer> {
        let mut rng = SmallRng::seed_from_u64(
            self.seed ^ iteration.wrapping_mul(0x9e37_79b9_7f4a_7c15),
        );
        (0..self.transfers_per_batch)
            .map(|_| {
                let debit = rng.gen_range(1..=self.account_count);
                let mut credit = rng.gen_range(1..=self.account_count);
                if credit == debit {
                    credit = credit % self.account_count + 1;
                }
                let amount = rng.gen_range(1..=1_000);
                Transfer::new(debit, credit, amount, self.ledger)
            })
            .collect()
    }
}

#[async_trait]
impl<S: Sink + 'static> Workload for TransferWorkload<S> {
    /// Provision the account set through the same transactional write
    /// surface the transfers use. Accounts that already exist are fine: a
    /// rerun against a warm sink is not an error.
    async fn setup(&self) -> Result<(), BoxError> {
        tracing::info!(
            accounts = self.account_count,
            ledger = self.ledger,
            "creating ledger accounts"
        );
        let ids: Vec<u64> = (1..=self.account_count).collect();
        for chunk in ids.chunks(TRANSACTION_ITEM_LIMIT) {
            let mut items = Vec::with_capacity(chunk.len());
            for &id in chunk {
                items.push(WriteItem::PutIfAbsent {
                    key: account_key(id),
                    body: serde_json::to_value(Account::new(id, self.ledger))?,
                });
            }
            let write = TransactWrite {
                request_token: Uuid::new_v4(),
                items,
            };

            let submitted = retry(&self.retry_policy, || {
                let write = write.clone();
                async move { self.sink.transact_write(write).await }
            })
            .await;
            match submitted {
                Ok(_) => {}
                Err(exhausted) => match exhausted.error {
                    SinkError::Conflict(_) => {
                        tracing::debug!("accounts already provisioned");
                    }
                    other => return Err(Box::new(other)),
                },
            }
        }
        Ok(())
    }

    async fn teardown(&self) -> Result<(), BoxError> {
        tracing::info!(
            iterations = self.telemetry.iterations.load(Ordering::Relaxed),
            attempts = self.telemetry.attempts.load(Ordering::Relaxed),
            conflicts = self.telemetry.conflicts.load(Ordering::Relaxed),
            "ledger workload finished"
        );
        Ok(())
    }

    async fn perform_iteration(&self) -> Result<(), BoxError> {
        let iteration = self.telemetry.iterations.fetch_add(1, Ordering::Relaxed);
        let transfers = self.mint_batch(iteration);

        match create_transfers(self.sink.as_ref(), &self.retry_policy, &transfers).await {
            Ok(result) => {
                self.telemetry
                    .attempts
                    .fetch_add(result.attempts as u64, Ordering::Relaxed);
                self.telemetry
                    .retry_delay_micros
                    .fetch_add(result.retry_delay.as_micros() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                if matches!(err, LedgerError::Conflict(_)) {
                    self.telemetry.conflicts.fetch_add(1, Ordering::Relaxed);
                }
                Err(Box::new(err))
            }
        }
    }

    fn items_per_iteration(&self) -> u32 {
        self.transfers_per_batch as u32
    }

    fn test_run_data(&self) -> Value {
        json!({
            "workload": "ledger-transfers",
            "ledger": self.ledger,
            "accounts": self.account_count,
            "transfersPerBatch": self.transfers_per_batch,
            "retryAttempts": self.telemetry.attempts.load(Ordering::Relaxed),
            "retryDelayMillis":
                self.telemetry.retry_delay_micros.load(Ordering::Relaxed) as f64 / 1_000.0,
            "conflicts": self.telemetry.conflicts.load(Ordering::Relaxed),
        })
    }
}
