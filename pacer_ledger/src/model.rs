use std::sync::{LazyLock, Mutex};

use serde::{Deserialize, Serialize};
use uuid::{ContextV7, Timestamp, Uuid};

/// Shared v7 context so ids minted within the same millisecond still sort in
/// creation order.
static ID_CONTEXT: LazyLock<Mutex<ContextV7>> = LazyLock::new(|| Mutex::new(ContextV7::new()));

fn next_transfer_id() -> Uuid {
    Uuid::new_v7(Timestamp::now(&*ID_CONTEXT.lock().unwrap()))
}

/// A double-entry transfer between two ledger accounts.
///
/// Transfer ids are v7 uuids: 128-bit, timestamp-prefixed, and therefore
/// lexicographically monotonic in their fixed-width hex encoding. The sink
/// key doubles as deduplication when clients retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub debit_account_id: u64,
    pub credit_account_id: u64,
    pub amount: u64,
    pub ledger: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Transfer {
    /// New posted transfer with a freshly minted monotonic id.
    pub fn new(debit_account_id: u64, credit_account_id: u64, amount: u64, ledger: u32) -> Self {
        Self {
            id: next_transfer_id(),
            debit_account_id,
            credit_account_id,
            amount,
            ledger,
            code: None,
            flags: None,
            user_data: None,
            pending_id: None,
            timeout: None,
            timestamp: None,
        }
    }

    /// Sink key for the transfer record.
    pub fn key(&self) -> String {
        format!("t/{}", self.id.as_simple())
    }
}

/// A ledger account with its four balance counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    pub ledger: u32,
    pub debits_pending: u64,
    pub debits_posted: u64,
    pub credits_pending: u64,
    pub credits_posted: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Account {
    /// New account with zeroed balances.
    pub fn new(id: u64, ledger: u32) -> Self {
        Self {
            id,
            ledger,
            debits_pending: 0,
            debits_posted: 0,
            credits_pending: 0,
            credits_posted: 0,
            code: None,
            flags: None,
            user_data: None,
            timestamp: None,
        }
    }

    pub fn key(&self) -> String {
        account_key(self.id)
    }
}

/// Fixed-width sink key for an account id.
pub fn account_key(id: u64) -> String {
    format!("a/{id:016x}")
}
