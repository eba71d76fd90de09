//! ---
//! fl_section: "06-sla-compliance"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "SLA contract loading and evaluation."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the SLA crate.
pub type Result<T> = std::result::Result<T, SlaError>;

/// Error type for contract loading and evaluation.
#[derive(Debug, Error)]
pub enum SlaError {
    /// The contract document could not be found or read.
    #[error("sla contract {path} is missing: {source}")]
    ConfigMissing {
        /// Location that was inspected.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The contract document is not valid JSON of the expected shape.
    #[error("sla contract is malformed: {0}")]
    ConfigMalformed(#[from] serde_json::Error),
    /// A metric declares a minimum above its maximum, or a non-finite bound.
    #[error("sla metric '{metric}' has invalid bounds: {reason}")]
    InvalidBounds {
        /// Metric name as written in the contract.
        metric: String,
        /// Human-readable description of the problem.
        reason: String,
    },
    /// The queried metric has no entry in the loaded contract.
    #[error("sla metric '{0}' is not configured in the contract")]
    MetricUnavailable(String),
}

impl SlaError {
    /// Whether this error belongs to the fatal configuration class.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SlaError::ConfigMissing { .. }
                | SlaError::ConfigMalformed(_)
                | SlaError::InvalidBounds { .. }
        )
    }
}
