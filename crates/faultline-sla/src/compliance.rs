//! ---
//! fl_section: "06-sla-compliance"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Post-run SLA compliance assessment."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use serde::Serialize;
use tracing::{info, warn};

use crate::contract::names;
use crate::error::SlaError;
use crate::evaluator::{Evaluation, SlaEvaluator};

/// Timing of one finished workload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WorkloadOutcome {
    /// Workload identifier.
    pub id: u64,
    /// Simulation time at which execution started, in seconds.
    pub exec_start: f64,
    /// Simulation time at which execution finished, in seconds.
    pub finish: f64,
}

impl WorkloadOutcome {
    /// Wall time spent executing, in seconds.
    pub fn completion_time(&self) -> f64 {
        self.finish - self.exec_start
    }
}

/// Aggregate observations of a finished run.
#[derive(Debug, Clone, Copy)]
pub struct ComplianceInput<'a> {
    /// Faults of any scope recorded during the run.
    pub total_faults: u64,
    /// Availability in percent.
    pub availability_pct: f64,
    /// Highest datacenter CPU utilization seen, in percent.
    pub peak_cpu_pct: f64,
    /// Workloads that reached the finished state.
    pub workloads: &'a [WorkloadOutcome],
}

/// Result of checking one contract metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCheck {
    /// The contract has no entry for the metric.
    NotEvaluated,
    /// Within bounds.
    Compliant,
    /// Outside bounds.
    Violated,
}

impl MetricCheck {
    /// Whether this check breached the contract.
    pub fn is_violated(&self) -> bool {
        matches!(self, MetricCheck::Violated)
    }

    fn from_evaluation(result: Result<Evaluation, SlaError>) -> Self {
        match result {
            Ok(eval) if eval.is_violated() => MetricCheck::Violated,
            Ok(_) => MetricCheck::Compliant,
            Err(SlaError::MetricUnavailable(_)) => MetricCheck::NotEvaluated,
            Err(err) => {
                warn!(target: "faultline::sla::compliance", error = %err, "metric check failed");
                MetricCheck::NotEvaluated
            }
        }
    }
}

/// Post-run compliance summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceReport {
    /// Workloads whose completion time exceeded the contract.
    pub task_completion_violations: usize,
    /// Task completion verdict across all workloads.
    pub task_completion: MetricCheck,
    /// Total fault count against the tolerance level.
    pub fault_tolerance: MetricCheck,
    /// Availability percentage against its minimum.
    pub availability: MetricCheck,
    /// Peak CPU utilization against its bounds.
    pub cpu_utilization: MetricCheck,
    /// True when any evaluated metric was violated.
    pub contract_violated: bool,
}

/// Evaluate a finished run against the contract.
pub fn assess(evaluator: &SlaEvaluator, input: &ComplianceInput<'_>) -> ComplianceReport {
    let (task_completion, task_completion_violations) =
        if evaluator.contract().is_configured(names::TASK_COMPLETION_TIME) {
            let violations = input
                .workloads
                .iter()
                .filter(|workload| {
                    matches!(
                        evaluator.evaluate(names::TASK_COMPLETION_TIME, workload.completion_time()),
                        Ok(ref eval) if eval.is_violated()
                    )
                })
                .count();
            let check = if violations > 0 {
                MetricCheck::Violated
            } else {
                MetricCheck::Compliant
            };
            (check, violations)
        } else {
            (MetricCheck::NotEvaluated, 0)
        };

    let fault_tolerance =
        MetricCheck::from_evaluation(evaluator.evaluate_fault_tolerance(input.total_faults));
    let availability =
        MetricCheck::from_evaluation(evaluator.evaluate(names::AVAILABILITY, input.availability_pct));
    let cpu_utilization = MetricCheck::from_evaluation(
        evaluator.evaluate(names::CPU_UTILIZATION, input.peak_cpu_pct),
    );

    let contract_violated = [task_completion, fault_tolerance, availability, cpu_utilization]
        .iter()
        .any(MetricCheck::is_violated);

    info!(
        target: "faultline::sla::compliance",
        task_completion_violations,
        contract_violated,
        "sla compliance assessed"
    );

    ComplianceReport {
        task_completion_violations,
        task_completion,
        fault_tolerance,
        availability,
        cpu_utilization,
        contract_violated,
    }
}
