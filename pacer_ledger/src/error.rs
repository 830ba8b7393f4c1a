use thiserror::Error;

use crate::sink::SinkError;

/// Errors surfaced by the ledger batch pipeline.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transfer batch of {len} exceeds the {max}-transfer limit")]
    BatchTooLarge { len: usize, max: usize },
    #[error("transfer batch is empty")]
    EmptyBatch,
    /// A transfer id in the batch already exists at the sink; the write was
    /// rejected atomically and no balance changed.
    #[error("transfer already exists at '{0}'")]
    Conflict(String),
    #[error("failed to encode item body")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Sink(#[from] SinkError),
}
