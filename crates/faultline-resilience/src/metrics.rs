//! ---
//! fl_section: "07-resilience-fault-tolerance"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Reactive recovery and SLA enforcement."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use faultline_metrics::SharedRegistry;
use prometheus::{IntCounter, IntCounterVec, Opts};

use crate::aggregator::FaultScope;
use crate::controller::ControllerState;
use crate::error::Result;

/// Metrics published by the reactive core.
#[derive(Clone)]
pub struct ReactiveMetrics {
    registry: SharedRegistry,
    faults_total: IntCounterVec,
    clones_total: IntCounterVec,
    placement_errors_total: IntCounter,
    resubmissions_total: IntCounter,
    retry_exhausted_total: IntCounter,
    sla_violations_total: IntCounterVec,
    controller_transitions_total: IntCounterVec,
}

impl ReactiveMetrics {
    /// Register the metric families against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let faults_total = IntCounterVec::new(
            Opts::new("faultline_faults_total", "Faults delivered, by scope"),
            &["scope"],
        )?;
        registry.register(Box::new(faults_total.clone()))?;

        let clones_total = IntCounterVec::new(
            Opts::new(
                "faultline_clones_total",
                "Replacement VMs and cloudlets created after host faults",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(clones_total.clone()))?;

        let placement_errors_total = IntCounter::new(
            "faultline_placement_errors_total",
            "Clone VMs that could not be placed on any host",
        )?;
        registry.register(Box::new(placement_errors_total.clone()))?;

        let resubmissions_total = IntCounter::new(
            "faultline_resubmissions_total",
            "Failed cloudlets resubmitted by the controller",
        )?;
        registry.register(Box::new(resubmissions_total.clone()))?;

        let retry_exhausted_total = IntCounter::new(
            "faultline_retry_exhausted_total",
            "Cloudlets abandoned after reaching the resubmission cap",
        )?;
        registry.register(Box::new(retry_exhausted_total.clone()))?;

        let sla_violations_total = IntCounterVec::new(
            Opts::new(
                "faultline_sla_violations_total",
                "Controller ticks that observed a violated bound, by metric",
            ),
            &["metric"],
        )?;
        registry.register(Box::new(sla_violations_total.clone()))?;

        let controller_transitions_total = IntCounterVec::new(
            Opts::new(
                "faultline_controller_transitions_total",
                "Reactive controller state transitions",
            ),
            &["from", "to"],
        )?;
        registry.register(Box::new(controller_transitions_total.clone()))?;

        Ok(Self {
            registry,
            faults_total,
            clones_total,
            placement_errors_total,
            resubmissions_total,
            retry_exhausted_total,
            sla_violations_total,
            controller_transitions_total,
        })
    }

    /// Expose the underlying shared registry for convenience.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub(crate) fn record_fault(&self, scope: FaultScope) {
        self.faults_total.with_label_values(&[scope.as_str()]).inc();
    }

    pub(crate) fn record_clone(&self, kind: &str) {
        self.clones_total.with_label_values(&[kind]).inc();
    }

    pub(crate) fn record_placement_error(&self) {
        self.placement_errors_total.inc();
    }

    pub(crate) fn record_resubmissions(&self, count: usize) {
        self.resubmissions_total.inc_by(count as u64);
    }

    pub(crate) fn record_retry_exhausted(&self, count: usize) {
        self.retry_exhausted_total.inc_by(count as u64);
    }

    pub(crate) fn record_sla_violation(&self, metric: &str) {
        self.sla_violations_total.with_label_values(&[metric]).inc();
    }

    pub(crate) fn record_transition(&self, from: ControllerState, to: ControllerState) {
        self.controller_transitions_total
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
    }
}

impl std::fmt::Debug for ReactiveMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_metrics::{encode_text, new_registry};

    #[test]
    fn families_are_exported() {
        let registry = new_registry();
        let metrics = ReactiveMetrics::new(registry.clone()).unwrap();
        metrics.record_fault(FaultScope::Host);
        metrics.record_clone("vm");
        metrics.record_transition(ControllerState::Idle, ControllerState::Alerted);
        let text = encode_text(&registry).unwrap();
        assert!(text.contains("faultline_faults_total{scope=\"host\"} 1"));
        assert!(text.contains("faultline_clones_total{kind=\"vm\"} 1"));
        assert!(text.contains("faultline_controller_transitions_total{from=\"idle\",to=\"alerted\"} 1"));
    }

    #[test]
    fn double_registration_fails() {
        let registry = new_registry();
        ReactiveMetrics::new(registry.clone()).unwrap();
        assert!(ReactiveMetrics::new(registry).is_err());
    }
}
