/// Deterministic alert correlation into clusters
pub mod correlation;
/// Alert data model
pub mod model;
/// Validation and canonicalization of raw alerts
pub mod normalizer;

pub use correlation::{AlertCluster, CorrelationEngine, CorrelationSettings};
pub use model::{NormalizedAlert, RawAlert, Severity, ValidationStatus};
pub use normalizer::AlertNormalizer;
