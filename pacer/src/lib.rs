pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod histogram;
mod metrics;
pub mod report;
mod scheduler;
pub mod workload;

pub use clock::Clock;
pub use config::DriverConfig;
pub use driver::Driver;
pub use error::{BoxError, DriverError};
pub use histogram::LatencyHistogram;
pub use report::Report;
pub use workload::Workload;
