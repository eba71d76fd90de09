//! ---
//! fl_section: "07-resilience-fault-tolerance"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Reactive recovery and SLA enforcement."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use faultline_sla::SlaError;
use thiserror::Error;

use crate::engine::{CloudletId, HostId, VmId};

/// Result alias for controller, resolver, and injector calls.
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Failure reported by a [`crate::engine::CloudEngine`] operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// The host identifier is not part of the datacenter.
    #[error("unknown host {0}")]
    UnknownHost(HostId),
    /// The VM identifier was never created.
    #[error("unknown vm {0}")]
    UnknownVm(VmId),
    /// The cloudlet identifier was never created.
    #[error("unknown cloudlet {0}")]
    UnknownCloudlet(CloudletId),
    /// No live host can accommodate the requested VM.
    #[error("no host can accommodate vm {vm} ({pes} PEs, {ram} RAM)")]
    NoCapacity {
        /// Identifier the VM would have received.
        vm: VmId,
        /// Requested processing elements.
        pes: u32,
        /// Requested memory.
        ram: u64,
    },
    /// An explicit identifier collides with an existing entity.
    #[error("identifier {0} is already in use")]
    DuplicateId(u64),
}

impl EngineError {
    /// Whether the error means a clone could not be placed.
    pub fn is_placement_failure(&self) -> bool {
        matches!(
            self,
            EngineError::NoCapacity { .. } | EngineError::DuplicateId(_)
        )
    }
}

/// Error type of the resilience crate.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// An engine operation failed outside the recorded placement path.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Contract evaluation failed with a non-recoverable error.
    #[error(transparent)]
    Sla(#[from] SlaError),
    /// Metric families could not be registered.
    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
    /// Parameters rejected at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),
}
