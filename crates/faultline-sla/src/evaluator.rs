//! ---
//! fl_section: "06-sla-compliance"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "SLA contract loading and evaluation."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use serde::Serialize;
use tracing::trace;

use crate::contract::{names, BoundKind, SlaContract, SlaDimension};
use crate::error::{Result, SlaError};

/// Outcome of a single threshold check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Observed value is within every declared bound.
    Compliant,
    /// Observed value is strictly outside one of the bounds.
    Violated,
}

/// Evaluation of one observed value against the contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    /// Metric that was checked.
    pub metric: String,
    /// Value supplied by the caller.
    pub observed: f64,
    /// Result of the check.
    pub verdict: Verdict,
    /// Bound that was breached, when the verdict is [`Verdict::Violated`].
    pub breached: Option<SlaDimension>,
}

impl Evaluation {
    /// Shorthand for `verdict == Verdict::Violated`.
    pub fn is_violated(&self) -> bool {
        self.verdict == Verdict::Violated
    }

    fn compliant(metric: &str, observed: f64) -> Self {
        Self {
            metric: metric.to_owned(),
            observed,
            verdict: Verdict::Compliant,
            breached: None,
        }
    }

    fn violated(dimension: SlaDimension, observed: f64) -> Self {
        Self {
            metric: dimension.metric_name.clone(),
            observed,
            verdict: Verdict::Violated,
            breached: Some(dimension),
        }
    }
}

/// Stateless checker over a loaded [`SlaContract`].
#[derive(Debug, Clone)]
pub struct SlaEvaluator {
    contract: SlaContract,
}

impl SlaEvaluator {
    /// Wrap a validated contract.
    pub fn new(contract: SlaContract) -> Self {
        Self { contract }
    }

    /// Contract backing this evaluator.
    pub fn contract(&self) -> &SlaContract {
        &self.contract
    }

    /// Check an observed value against both bounds of a metric.
    ///
    /// Values equal to a bound are compliant. A metric missing from the
    /// contract yields [`SlaError::MetricUnavailable`], never a verdict.
    pub fn evaluate(&self, metric: &str, observed: f64) -> Result<Evaluation> {
        if !self.contract.is_configured(metric) {
            return Err(SlaError::MetricUnavailable(metric.to_owned()));
        }
        for kind in [BoundKind::Max, BoundKind::Min] {
            if let Some(dimension) = self.contract.dimension(metric, kind) {
                if dimension.is_violated_by(observed) {
                    trace!(
                        target: "faultline::sla::evaluator",
                        metric,
                        observed,
                        bound = %kind,
                        threshold = dimension.threshold,
                        "sla bound breached"
                    );
                    return Ok(Evaluation::violated(dimension, observed));
                }
            }
        }
        Ok(Evaluation::compliant(metric, observed))
    }

    /// Boolean form of [`SlaEvaluator::evaluate`].
    pub fn is_violated(&self, metric: &str, observed: f64) -> Result<bool> {
        self.evaluate(metric, observed).map(|eval| eval.is_violated())
    }

    /// Check a fault count against `faultToleranceLevel`.
    ///
    /// The level is the number of faults tolerated; it is read from
    /// `maxValue`, falling back to `minValue`. A count strictly above the
    /// level violates the contract.
    pub fn evaluate_fault_tolerance(&self, fault_count: u64) -> Result<Evaluation> {
        let metric = names::FAULT_TOLERANCE_LEVEL;
        if !self.contract.is_configured(metric) {
            return Err(SlaError::MetricUnavailable(metric.to_owned()));
        }
        let observed = fault_count as f64;
        let level = self
            .contract
            .dimension(metric, BoundKind::Max)
            .or_else(|| self.contract.dimension(metric, BoundKind::Min));
        match level {
            Some(level) if observed > level.threshold => Ok(Evaluation::violated(
                SlaDimension {
                    bound_kind: BoundKind::Max,
                    ..level
                },
                observed,
            )),
            _ => Ok(Evaluation::compliant(metric, observed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator(json: &str) -> SlaEvaluator {
        SlaEvaluator::new(json.parse().unwrap())
    }

    #[test]
    fn max_bound_is_inclusive() {
        let eval = evaluator(r#"{ "taskCompletionTime": { "maxValue": 9000 } }"#);
        assert!(!eval.is_violated(names::TASK_COMPLETION_TIME, 9000.0).unwrap());
        let breach = eval.evaluate(names::TASK_COMPLETION_TIME, 9000.01).unwrap();
        assert!(breach.is_violated());
        assert_eq!(breach.breached.unwrap().bound_kind, BoundKind::Max);
    }

    #[test]
    fn min_bound_is_inclusive() {
        let eval = evaluator(r#"{ "availability": { "minValue": 99.5 } }"#);
        assert!(!eval.is_violated(names::AVAILABILITY, 99.5).unwrap());
        assert!(eval.is_violated(names::AVAILABILITY, 99.49).unwrap());
        assert!(!eval.is_violated(names::AVAILABILITY, 100.0).unwrap());
    }

    #[test]
    fn both_bounds_are_checked() {
        let eval = evaluator(r#"{ "cpuUtilization": { "minValue": 10, "maxValue": 80 } }"#);
        assert!(eval.is_violated(names::CPU_UTILIZATION, 5.0).unwrap());
        assert!(eval.is_violated(names::CPU_UTILIZATION, 85.0).unwrap());
        assert!(!eval.is_violated(names::CPU_UTILIZATION, 50.0).unwrap());
    }

    #[test]
    fn unconfigured_metric_is_unavailable() {
        let eval = evaluator(r#"{ "availability": { "minValue": 99 } }"#);
        let err = eval.evaluate(names::CPU_UTILIZATION, 10.0).unwrap_err();
        assert!(matches!(err, SlaError::MetricUnavailable(ref m) if m == "cpuUtilization"));
        assert!(!err.is_config_error());
    }

    #[test]
    fn fault_tolerance_counts_above_level_violate() {
        let eval = evaluator(r#"{ "faultToleranceLevel": { "minValue": 3 } }"#);
        assert!(!eval.evaluate_fault_tolerance(0).unwrap().is_violated());
        assert!(!eval.evaluate_fault_tolerance(3).unwrap().is_violated());
        let breach = eval.evaluate_fault_tolerance(4).unwrap();
        assert!(breach.is_violated());
        assert_eq!(breach.breached.unwrap().threshold, 3.0);
    }

    #[test]
    fn fault_tolerance_prefers_max_value() {
        let eval = evaluator(r#"{ "faultToleranceLevel": { "minValue": 1, "maxValue": 5 } }"#);
        assert!(!eval.evaluate_fault_tolerance(5).unwrap().is_violated());
        assert!(eval.evaluate_fault_tolerance(6).unwrap().is_violated());
    }
}
