//! Runs the ledger transfer workload against the in-memory reference sink
//! and prints the final report as JSON.

use std::sync::Arc;
use std::time::Duration;

use pacer::{Driver, DriverConfig};
use pacer_ledger::{MemorySink, TransferWorkload};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let sink = Arc::new(MemorySink::new());
    let workload = TransferWorkload::builder()
        .sink(Arc::clone(&sink))
        .account_count(128)
        .transfers_per_batch(4)
        .build();

    let config = DriverConfig::builder()
        .concurrency(8)
        .target_items_per_second(400.0)
        .duration(Duration::from_secs(5))
        .build();

    let report = Driver::new(config, workload).run().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
