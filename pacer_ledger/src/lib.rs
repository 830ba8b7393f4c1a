pub mod batch;
pub mod error;
pub mod model;
pub mod retry;
pub mod sink;
pub mod workload;

pub use batch::{build_transfer_write, create_transfers, TransferResult, MAX_TRANSFERS_PER_BATCH};
pub use error::LedgerError;
pub use model::{account_key, Account, Transfer};
pub use retry::{retry, Retried, RetryExhausted, RetryPolicy};
pub use sink::{
    MemorySink, Sink, SinkError, TransactWrite, WriteItem, WriteOutcome, TRANSACTION_ITEM_LIMIT,
};
pub use workload::TransferWorkload;
