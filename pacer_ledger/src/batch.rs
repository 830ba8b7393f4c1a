//! Transaction batch builder for transfer writes.
//!
//! A batch of transfers becomes a single transactional write: one
//! put-if-absent per transfer, keyed by the transfer id, plus exactly one
//! balance update per *distinct* account touched. Updates are coalesced — an
//! account debited or credited by several transfers in the batch gets one
//! increment item whose amounts are the sums of its contributions. With the
//! 33-transfer batch cap, the worst case of 33 puts and 66 updates still
//! fits the sink's 100-item transaction boundary.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;

use uuid::Uuid;

use crate::error::LedgerError;
use crate::model::{account_key, Transfer};
use crate::retry::{retry, RetryPolicy};
use crate::sink::{Sink, SinkError, TransactWrite, WriteItem};

/// Maximum transfers per batch.
pub const MAX_TRANSFERS_PER_BATCH: usize = 33;

const DEBITS_POSTED: &str = "debits_posted";
const CREDITS_POSTED: &str = "credits_posted";

/// Outcome of a submitted transfer batch, including retry telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferResult {
    /// Length of the write's item list: puts plus coalesced updates.
    pub items_written: usize,
    pub consumed_capacity: f64,
    pub attempts: u32,
    pub retry_delay: Duration,
}

/// Build the transactional write for a batch of transfers.
///
/// Items appear in processing order: each transfer's put, followed by update
/// items for any account the batch has not touched before. Later transfers
/// touching a known account fold their amounts into the existing update.
pub fn build_transfer_write(
    transfers: &[Transfer],
    request_token: Uuid,
) -> Result<TransactWrite, LedgerError> {
    if transfers.is_empty() {
        return Err(LedgerError::EmptyBatch);
    }
    if transfers.len() > MAX_TRANSFERS_PER_BATCH {
        return Err(LedgerError::BatchTooLarge {
            len: transfers.len(),
            max: MAX_TRANSFERS_PER_BATCH,
        });
    }

    let mut items = Vec::with_capacity(transfers.len() * 3);
    let mut updates: HashMap<u64, usize> = HashMap::new();

    for transfer in transfers {
        items.push(WriteItem::PutIfAbsent {
            key: transfer.key(),
            body: serde_json::to_value(transfer)?,
        });
        coalesce(
            &mut items,
            &mut updates,
            transfer.debit_account_id,
            DEBITS_POSTED,
            transfer.amount,
        );
        coalesce(
            &mut items,
            &mut updates,
            transfer.credit_account_id,
            CREDITS_POSTED,
            transfer.amount,
        );
    }

    Ok(TransactWrite {
        request_token,
        items,
    })
}

/// Fold `amount` into the account's update item, creating it on first touch.
fn coalesce(
    items: &mut Vec<WriteItem>,
    updates: &mut HashMap<u64, usize>,
    account: u64,
    field: &'static str,
    amount: u64,
) {
    match updates.entry(account) {
        Entry::Occupied(entry) => {
            if let WriteItem::Increment { fields, .. } = &mut items[*entry.get()] {
                for (name, value) in fields.iter_mut() {
                    if name == field {
                        *value += amount;
                    }
                }
            }
        }
        Entry::Vacant(entry) => {
            let debits = if field == DEBITS_POSTED { amount } else { 0 };
            let credits = if field == CREDITS_POSTED { amount } else { 0 };
            entry.insert(items.len());
            items.push(WriteItem::Increment {
                key: account_key(account),
                fields: vec![
                    (DEBITS_POSTED.to_owned(), debits),
                    (CREDITS_POSTED.to_owned(), credits),
                ],
            });
        }
    }
}

/// Submit a batch of transfers as one idempotent transactional write.
///
/// The write is built once with a fresh request token, so every retry under
/// `policy` resubmits the same logical operation; a sink that already applied
/// the token treats the resubmission as a no-op. A conflicting transfer id
/// surfaces as [`LedgerError::Conflict`] with no balances changed.
pub async fn create_transfers<S: Sink>(
    sink: &S,
    policy: &RetryPolicy,
    transfers: &[Transfer],
) -> Result<TransferResult, LedgerError> {
    let write = build_transfer_write(transfers, Uuid::new_v4())?;

    match retry(policy, || {
        let write = write.clone();
        async move { sink.transact_write(write).await }
    })
    .await
    {
        Ok(submitted) => Ok(TransferResult {
            items_written: submitted.value.items_written,
            consumed_capacity: submitted.value.consumed_capacity,
            attempts: submitted.attempts,
            retry_delay: submitted.total_delay,
        }),
        Err(exhausted) => match exhausted.error {
            SinkError::Conflict(key) => Err(LedgerError::Conflict(key)),
            other => Err(LedgerError::Sink(other)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn transfer(debit: u64, credit: u64, amount: u64) -> Transfer {
        Transfer::new(debit, credit, amount, 1)
    }

    fn puts(write: &TransactWrite) -> usize {
        write
            .items
            .iter()
            .filter(|item| matches!(item, WriteItem::PutIfAbsent { .. }))
            .count()
    }

    fn update_fields<'a>(write: &'a TransactWrite, account: u64) -> Option<&'a [(String, u64)]> {
        write.items.iter().find_map(|item| match item {
            WriteItem::Increment { key, fields } if *key == account_key(account) => {
                Some(fields.as_slice())
            }
            _ => None,
        })
    }

    fn field(fields: &[(String, u64)], name: &str) -> u64 {
        fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    }

    #[test]
    fn three_transfers_coalesce_across_accounts() {
        // 1→2:10, 2→1:20, 1→3:30
        let transfers = vec![transfer(1, 2, 10), transfer(2, 1, 20), transfer(1, 3, 30)];
        let write = build_transfer_write(&transfers, Uuid::new_v4()).unwrap();

        assert_eq!(write.items.len(), 6);
        assert_eq!(puts(&write), 3);

        let one = update_fields(&write, 1).unwrap();
        assert_eq!(field(one, DEBITS_POSTED), 40);
        assert_eq!(field(one, CREDITS_POSTED), 20);

        let two = update_fields(&write, 2).unwrap();
        assert_eq!(field(two, DEBITS_POSTED), 20);
        assert_eq!(field(two, CREDITS_POSTED), 10);

        let three = update_fields(&write, 3).unwrap();
        assert_eq!(field(three, DEBITS_POSTED), 0);
        assert_eq!(field(three, CREDITS_POSTED), 30);
    }

    #[test]
    fn single_pair_batch_coalesces_to_two_updates() {
        let transfers: Vec<Transfer> =
            (1..=5).map(|amount| transfer(1, 2, amount)).collect();
        let write = build_transfer_write(&transfers, Uuid::new_v4()).unwrap();

        assert_eq!(puts(&write), 5);
        assert_eq!(write.items.len(), 7);

        let one = update_fields(&write, 1).unwrap();
        assert_eq!(field(one, DEBITS_POSTED), 15);
        assert_eq!(field(one, CREDITS_POSTED), 0);

        let two = update_fields(&write, 2).unwrap();
        assert_eq!(field(two, DEBITS_POSTED), 0);
        assert_eq!(field(two, CREDITS_POSTED), 15);
    }

    #[test]
    fn item_count_is_puts_plus_distinct_accounts() {
        let transfers = vec![
            transfer(1, 2, 1),
            transfer(3, 4, 1),
            transfer(5, 6, 1),
            transfer(1, 6, 1),
        ];
        let write = build_transfer_write(&transfers, Uuid::new_v4()).unwrap();

        assert_eq!(puts(&write), 4);
        // accounts {1,2,3,4,5,6}
        assert_eq!(write.items.len(), 4 + 6);
        assert!(write.items.len() <= 3 * transfers.len());
    }

    #[test]
    fn empty_and_oversized_batches_are_rejected() {
        assert!(matches!(
            build_transfer_write(&[], Uuid::new_v4()),
            Err(LedgerError::EmptyBatch)
        ));

        let transfers: Vec<Transfer> = (0..34).map(|_| transfer(1, 2, 1)).collect();
        assert!(matches!(
            build_transfer_write(&transfers, Uuid::new_v4()),
            Err(LedgerError::BatchTooLarge { len: 34, max: 33 })
        ));
    }

    #[tokio::test]
    async fn create_transfers_applies_balances() {
        let sink = MemorySink::new();
        seed_accounts(&sink, &[1, 2, 3]).await;

        let transfers = vec![transfer(1, 2, 10), transfer(2, 1, 20), transfer(1, 3, 30)];
        let result = create_transfers(&sink, &RetryPolicy::default(), &transfers)
            .await
            .unwrap();

        assert_eq!(result.items_written, 6);
        assert_eq!(result.attempts, 1);
        assert_eq!(sink.counter(&account_key(1), DEBITS_POSTED), 40);
        assert_eq!(sink.counter(&account_key(1), CREDITS_POSTED), 20);
        assert_eq!(sink.counter(&account_key(2), DEBITS_POSTED), 20);
        assert_eq!(sink.counter(&account_key(2), CREDITS_POSTED), 10);
        assert_eq!(sink.counter(&account_key(3), CREDITS_POSTED), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_rejection_succeeds_on_second_attempt() {
        let sink = MemorySink::new();
        seed_accounts(&sink, &[1, 2]).await;
        sink.inject_throttles(1);

        let result = create_transfers(&sink, &RetryPolicy::default(), &[transfer(1, 2, 10)])
            .await
            .unwrap();

        assert_eq!(result.attempts, 2);
        assert!(result.retry_delay > Duration::ZERO);
        assert_eq!(sink.counter(&account_key(2), CREDITS_POSTED), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_transfer_ids_conflict_without_balance_changes() {
        let sink = MemorySink::new();
        seed_accounts(&sink, &[1, 2]).await;

        let transfers = vec![transfer(1, 2, 10)];
        create_transfers(&sink, &RetryPolicy::default(), &transfers)
            .await
            .unwrap();

        // Same transfer ids under a new request token: the put-if-absent
        // condition rejects the write atomically.
        let err = create_transfers(&sink, &RetryPolicy::default(), &transfers)
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Conflict(_)));
        assert_eq!(sink.counter(&account_key(1), DEBITS_POSTED), 10);
        assert_eq!(sink.counter(&account_key(2), CREDITS_POSTED), 10);
    }

    #[tokio::test]
    async fn resubmitting_the_same_write_is_a_noop() {
        let sink = MemorySink::new();
        seed_accounts(&sink, &[1, 2]).await;

        let write = build_transfer_write(&[transfer(1, 2, 10)], Uuid::new_v4()).unwrap();
        let first = sink.transact_write(write.clone()).await.unwrap();
        let second = sink.transact_write(write).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(sink.counter(&account_key(1), DEBITS_POSTED), 10);
        assert_eq!(sink.counter(&account_key(2), CREDITS_POSTED), 10);
    }

    async fn seed_accounts(sink: &MemorySink, ids: &[u64]) {
        let items = ids
            .iter()
            .map(|&id| WriteItem::PutIfAbsent {
                key: account_key(id),
                body: serde_json::to_value(crate::model::Account::new(id, 1)).unwrap(),
            })
            .collect();
        sink.transact_write(TransactWrite {
            request_token: Uuid::new_v4(),
            items,
        })
        .await
        .unwrap();
    }
}
