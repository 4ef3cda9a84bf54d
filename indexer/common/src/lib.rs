pub mod checkpoint;
mod cli;
mod configuration;
pub mod client;
mod error;
mod metrics;
pub mod projection;
pub mod sync;

pub use self::cli::*;
pub use self::configuration::*;
pub use self::error::*;
pub use self::metrics::IndexerMetrics;
