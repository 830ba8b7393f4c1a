use thiserror::Error;

/// Boxed error type carried across the workload trait seam.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The only failing exits of [`crate::Driver::run`].
///
/// Iteration failures never surface here; they are counted into the report.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("workload setup failed: {0}")]
    Setup(#[source] BoxError),
    #[error("workload teardown failed: {0}")]
    Teardown(#[source] BoxError),
}
