//! ---
//! fl_section: "07-resilience-fault-tolerance"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Reactive recovery and SLA enforcement."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
//! Reactive recovery for simulated cloud workloads: stochastic host failure
//! injection, fault impact resolution by cloning, and the per-tick controller
//! that enforces an SLA contract.
#![warn(missing_docs)]

pub mod aggregator;
pub mod controller;
pub mod engine;
pub mod error;
pub mod injector;
pub mod metrics;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{FaultRecord, FaultScope, MetricsAggregator, ReactiveSnapshot};
pub use controller::{
    ControllerState, ControllerStats, ReactiveController, ResubmissionReport, StateTransition,
    TickOutcome, Violation,
};
pub use engine::{
    CloudEngine, CloudletId, CloudletSpec, CloudletStatus, CloudletView, HostId, OwnerId,
    SimEvent, SimulationListener, UtilizationProfile, VmId, VmSpec, VmStatus, VmView,
};
pub use error::{EngineError, ResilienceError, Result};
pub use injector::{FailureEvent, FailureInjector, FaultTimeline, TargetPolicy};
pub use metrics::ReactiveMetrics;
pub use resolver::{
    CloneCause, CloudletCloneMapping, FaultImpactResolver, PlacementFailure, ResolutionReport,
    SimpleVmCloner, VmCloneMapping, VmCloner, CLONE_ID_MULTIPLIER,
};

/// Crate prelude collecting the types a scenario driver needs.
pub mod prelude {
    pub use super::controller::ReactiveController;
    pub use super::engine::{CloudEngine, SimEvent, SimulationListener};
    pub use super::injector::{FailureInjector, FaultTimeline};
    pub use super::metrics::ReactiveMetrics;
    pub use super::resolver::{SimpleVmCloner, VmCloner};
}
