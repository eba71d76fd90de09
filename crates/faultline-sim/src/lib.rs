//! ---
//! fl_section: "11-simulation-test-harness"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Deterministic datacenter engine and scenario runner."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
//! In-process datacenter engine driven by a planned failure timeline.
//!
//! [`ScenarioRunner`] wires a [`Scenario`] to the reactive controller and
//! produces a [`RunSummary`].

pub mod arrivals;
pub mod datacenter;
pub mod runner;
pub mod scenario;
pub mod timeline;

pub use arrivals::{ArrivalBatch, ArrivalPlan};
pub use datacenter::{Datacenter, DatacenterConfig, HostSpec};
pub use runner::{RunSummary, ScenarioRunner};
pub use scenario::{Scenario, BROKER_ID};
pub use timeline::FailureTimeline;
