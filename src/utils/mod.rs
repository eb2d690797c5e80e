/// Service configuration (TOML + environment overrides)
pub mod config;
/// Error taxonomy and result alias
pub mod error;
/// Statistics kernel (p95 filter, OLS trend, CV, lagged Pearson)
pub mod stats;

pub use config::TriageConfig;
pub use error::{TriageError, TriageResult};
