//! ---
//! fl_section: "06-sla-compliance"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "SLA contract loading and evaluation."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
//! Declarative service-level contracts and the evaluator that checks observed
//! values against them.
#![warn(missing_docs)]

pub mod compliance;
pub mod contract;
pub mod error;
pub mod evaluator;

pub use compliance::{assess, ComplianceInput, ComplianceReport, MetricCheck, WorkloadOutcome};
pub use contract::{names, BoundKind, SlaContract, SlaDimension};
pub use error::{Result, SlaError};
pub use evaluator::{Evaluation, SlaEvaluator, Verdict};
