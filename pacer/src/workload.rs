use async_trait::async_trait;
use serde_json::Value;

use crate::error::BoxError;

/// The capability set a workload exposes to the driver.
///
/// The driver is generic over any implementer. `setup` runs once before any
/// worker starts and its failure aborts the run; `teardown` runs once after
/// all workers finish, even when iterations erred. `perform_iteration` must
/// be independently callable: workers invoke it concurrently through a shared
/// reference.
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    /// One-shot preparation before any worker starts.
    async fn setup(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// One-shot finalization after all workers finish.
    async fn teardown(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Perform one unit of work against the system under test.
    async fn perform_iteration(&self) -> Result<(), BoxError>;

    /// How many work items a single iteration represents.
    ///
    /// The configured target rate is in items; the driver divides by this to
    /// derive its iteration scheduling interval.
    fn items_per_iteration(&self) -> u32 {
        1
    }

    /// Opaque configuration embedded verbatim in the final report.
    fn test_run_data(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }
}
