//! Sink contract for the ledger workload, plus an in-memory reference
//! implementation.
//!
//! The sink must support an atomic multi-item write with two item kinds:
//! *put-if-absent* keyed by a string, and *numeric increment* on named fields
//! of a keyed item. Every write carries an idempotency token; resubmitting a
//! token the sink has already applied is a no-op that returns the original
//! outcome.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Maximum number of items in one transactional write.
pub const TRANSACTION_ITEM_LIMIT: usize = 100;

/// An atomic multi-item write.
#[derive(Debug, Clone)]
pub struct TransactWrite {
    /// Client request token: resubmissions with the same token are the same
    /// logical operation.
    pub request_token: Uuid,
    pub items: Vec<WriteItem>,
}

/// One item of a transactional write.
#[derive(Debug, Clone)]
pub enum WriteItem {
    /// Conditional insert that succeeds only if no record exists at `key`.
    PutIfAbsent { key: String, body: Value },
    /// Add `by` to each named numeric field of the record at `key`.
    Increment { key: String, fields: Vec<(String, u64)> },
}

impl WriteItem {
    pub fn key(&self) -> &str {
        match self {
            WriteItem::PutIfAbsent { key, .. } => key,
            WriteItem::Increment { key, .. } => key,
        }
    }
}

/// Result of an applied write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    /// Length of the write's item list.
    pub items_written: usize,
    /// Capacity-unit telemetry reported by the sink.
    pub consumed_capacity: f64,
}

#[derive(Debug, Error)]
pub enum SinkError {
    /// A put-if-absent condition failed; nothing in the write was applied.
    #[error("conditional check failed for key '{0}'")]
    Conflict(String),
    #[error("increment target '{0}' does not exist")]
    MissingKey(String),
    #[error("key '{0}' appears more than once in one transaction")]
    DuplicateKey(String),
    #[error("transaction of {len} items exceeds the {limit}-item limit")]
    TooManyItems { len: usize, limit: usize },
    /// Transient capacity rejection; safe to retry.
    #[error("write throttled, retry later")]
    Throttled,
}

/// The transactional write surface the ledger workload runs against.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn transact_write(&self, write: TransactWrite) -> Result<WriteOutcome, SinkError>;
}

#[derive(Debug, Default)]
struct StoredItem {
    body: Value,
    counters: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct SinkState {
    items: HashMap<String, StoredItem>,
    applied: HashMap<Uuid, WriteOutcome>,
}

/// In-memory reference sink.
///
/// Writes are validated in full before anything is applied, so a rejected
/// write leaves no trace. Useful both as the test double for the driver and
/// as the executable definition of the sink contract.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<SinkState>,
    throttles: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail with [`SinkError::Throttled`].
    pub fn inject_throttles(&self, n: u32) {
        self.throttles.store(n, Ordering::SeqCst);
    }

    /// Current value of a numeric field, 0 if absent.
    pub fn counter(&self, key: &str, field: &str) -> u64 {
        let state = self.state.lock().expect("sink state poisoned");
        state
            .items
            .get(key)
            .and_then(|item| item.counters.get(field).copied())
            .unwrap_or(0)
    }

    pub fn contains(&self, key: &str) -> bool {
        let state = self.state.lock().expect("sink state poisoned");
        state.items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().expect("sink state poisoned");
        state.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn transact_write(&self, write: TransactWrite) -> Result<WriteOutcome, SinkError> {
        if write.items.len() > TRANSACTION_ITEM_LIMIT {
            return Err(SinkError::TooManyItems {
                len: write.items.len(),
                limit: TRANSACTION_ITEM_LIMIT,
            });
        }

        if self
            .throttles
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SinkError::Throttled);
        }

        let mut state = self.state.lock().expect("sink state poisoned");

        // Token replay: the earlier write already happened, don't redo it.
        if let Some(previous) = state.applied.get(&write.request_token) {
            return Ok(previous.clone());
        }

        // Validate every item before touching anything.
        let mut seen = HashSet::new();
        for item in &write.items {
            if !seen.insert(item.key().to_owned()) {
                return Err(SinkError::DuplicateKey(item.key().to_owned()));
            }
            match item {
                WriteItem::PutIfAbsent { key, .. } => {
                    if state.items.contains_key(key) {
                        return Err(SinkError::Conflict(key.clone()));
                    }
                }
                WriteItem::Increment { key, .. } => {
                    if !state.items.contains_key(key) {
                        return Err(SinkError::MissingKey(key.clone()));
                    }
                }
            }
        }

        let items_written = write.items.len();
        for item in write.items {
            match item {
                WriteItem::PutIfAbsent { key, body } => {
                    state.items.insert(
                        key,
                        StoredItem {
                            body,
                            counters: BTreeMap::new(),
                        },
                    );
                }
                WriteItem::Increment { key, fields } => {
                    let stored = state.items.get_mut(&key).expect("increment validated above");
                    for (field, by) in fields {
                        *stored.counters.entry(field).or_insert(0) += by;
                    }
                }
            }
        }

        let outcome = WriteOutcome {
            items_written,
            consumed_capacity: items_written as f64,
        };
        state.applied.insert(write.request_token, outcome.clone());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn put(key: &str) -> WriteItem {
        WriteItem::PutIfAbsent {
            key: key.to_owned(),
            body: json!({}),
        }
    }

    fn bump(key: &str, field: &str, by: u64) -> WriteItem {
        WriteItem::Increment {
            key: key.to_owned(),
            fields: vec![(field.to_owned(), by)],
        }
    }

    fn write(items: Vec<WriteItem>) -> TransactWrite {
        TransactWrite {
            request_token: Uuid::new_v4(),
            items,
        }
    }

    #[tokio::test]
    async fn put_then_increment() {
        let sink = MemorySink::new();
        sink.transact_write(write(vec![put("a/1")])).await.unwrap();
        let outcome = sink
            .transact_write(write(vec![bump("a/1", "debits_posted", 40)]))
            .await
            .unwrap();

        assert_eq!(outcome.items_written, 1);
        assert_eq!(sink.counter("a/1", "debits_posted"), 40);
    }

    #[tokio::test]
    async fn conflicting_put_rejects_the_whole_write() {
        let sink = MemorySink::new();
        sink.transact_write(write(vec![put("a/1"), put("t/1")]))
            .await
            .unwrap();

        // Same transfer key again: the put condition fails and the increment
        // that rode along must not be applied either.
        let err = sink
            .transact_write(write(vec![put("t/1"), bump("a/1", "debits_posted", 99)]))
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::Conflict(key) if key == "t/1"));
        assert_eq!(sink.counter("a/1", "debits_posted"), 0);
    }

    #[tokio::test]
    async fn replaying_a_token_is_a_noop() {
        let sink = MemorySink::new();
        sink.transact_write(write(vec![put("a/1")])).await.unwrap();

        let repeated = TransactWrite {
            request_token: Uuid::new_v4(),
            items: vec![bump("a/1", "credits_posted", 5)],
        };
        let first = sink.transact_write(repeated.clone()).await.unwrap();
        let second = sink.transact_write(repeated).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(sink.counter("a/1", "credits_posted"), 5);
    }

    #[tokio::test]
    async fn increment_on_missing_key_fails() {
        let sink = MemorySink::new();
        let err = sink
            .transact_write(write(vec![bump("a/9", "debits_posted", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::MissingKey(_)));
    }

    #[tokio::test]
    async fn duplicate_keys_in_one_write_are_rejected() {
        let sink = MemorySink::new();
        sink.transact_write(write(vec![put("a/1")])).await.unwrap();
        let err = sink
            .transact_write(write(vec![
                bump("a/1", "debits_posted", 1),
                bump("a/1", "credits_posted", 1),
            ]))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn oversized_transactions_are_rejected() {
        let sink = MemorySink::new();
        let items: Vec<WriteItem> = (0..=TRANSACTION_ITEM_LIMIT)
            .map(|i| put(&format!("k/{i}")))
            .collect();
        let err = sink.transact_write(write(items)).await.unwrap_err();
        assert!(matches!(err, SinkError::TooManyItems { .. }));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn injected_throttles_fail_then_clear() {
        let sink = MemorySink::new();
        sink.inject_throttles(2);

        for _ in 0..2 {
            let err = sink.transact_write(write(vec![put("a/1")])).await.unwrap_err();
            assert!(matches!(err, SinkError::Throttled));
        }
        assert!(sink.transact_write(write(vec![put("a/1")])).await.is_ok());
    }
}
