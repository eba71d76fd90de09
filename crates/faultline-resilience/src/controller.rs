//! ---
//! fl_section: "07-resilience-fault-tolerance"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Reactive controller state machine."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};
use std::fmt;

use faultline_common::config::ControllerConfig;
use faultline_sla::{names, SlaError, SlaEvaluator};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::aggregator::{MetricsAggregator, ReactiveSnapshot};
use crate::engine::{CloudEngine, CloudletId, OwnerId, SimEvent, SimulationListener};
use crate::error::{ResilienceError, Result};
use crate::injector::FailureEvent;
use crate::metrics::ReactiveMetrics;
use crate::resolver::{FaultImpactResolver, ResolutionReport, VmCloner};

/// Label used for fault count deltas in metrics and logs.
const FAULT_COUNT_METRIC: &str = "faultCount";

/// Alert state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// No outstanding violation.
    Idle,
    /// Violation flagged, remediation pending.
    Alerted,
    /// A recovery action is in flight.
    Remediating,
}

impl ControllerState {
    /// Static label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::Alerted => "alerted",
            ControllerState::Remediating => "remediating",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Violation observed on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Availability percentage fell below the contract minimum.
    AvailabilityBelowMin {
        /// Observed percentage.
        observed_pct: f64,
        /// Contract minimum.
        threshold_pct: f64,
    },
    /// New faults were delivered since the previous tick.
    FaultCountIncreased {
        /// Total faults at the previous tick.
        previous: u64,
        /// Total faults now.
        current: u64,
        /// Host faults at the previous tick.
        host_previous: u64,
        /// Host faults now.
        host_current: u64,
    },
}

impl Violation {
    /// Metric label of the violation.
    pub fn metric(&self) -> &'static str {
        match self {
            Violation::AvailabilityBelowMin { .. } => names::AVAILABILITY,
            Violation::FaultCountIncreased { .. } => FAULT_COUNT_METRIC,
        }
    }
}

/// A state change and the instant it happened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateTransition {
    /// Simulated time.
    pub time: f64,
    /// Previous state.
    pub from: ControllerState,
    /// New state.
    pub to: ControllerState,
}

/// Cloudlets touched by one resubmission pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResubmissionReport {
    /// Submitted again as one batch, execution state reset.
    pub resubmitted: Vec<CloudletId>,
    /// Reached the attempt cap and were abandoned.
    pub exhausted: Vec<CloudletId>,
}

impl ResubmissionReport {
    /// Whether the pass touched nothing.
    pub fn is_empty(&self) -> bool {
        self.resubmitted.is_empty() && self.exhausted.is_empty()
    }
}

/// Result of one clock tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickOutcome {
    /// Snapshot the decisions were based on.
    pub snapshot: ReactiveSnapshot,
    /// Violations seen on this tick.
    pub violations: Vec<Violation>,
    /// State after the tick.
    pub state: ControllerState,
    /// Transitions taken during the tick, in order.
    pub transitions: Vec<StateTransition>,
    /// Resubmission triggered by an availability violation.
    pub remediation: Option<ResubmissionReport>,
    /// Resubmission performed by the periodic scan.
    pub scan: Option<ResubmissionReport>,
}

/// Run-level counters surfaced in the final report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ControllerStats {
    /// Clock ticks processed.
    pub ticks: u64,
    /// Ticks with at least one violation.
    pub violation_ticks: u64,
    /// State transitions taken.
    pub transitions: u64,
    /// Clone VMs created.
    pub vm_clones: u64,
    /// Clone cloudlets created.
    pub cloudlet_clones: u64,
    /// Clone VMs that could not be placed.
    pub placement_errors: u64,
    /// Cloudlets resubmitted.
    pub resubmissions: u64,
    /// Cloudlets that reached the resubmission cap.
    pub retry_exhausted: u64,
}

/// Orchestrator invoked on every simulated clock tick.
///
/// Owns the [`MetricsAggregator`], the [`FaultImpactResolver`], and the
/// [`SlaEvaluator`] of one run. All calls happen on the engine's control
/// thread, so no state is shared.
#[derive(Debug)]
pub struct ReactiveController {
    control_interval: f64,
    max_resubmissions: u32,
    state: ControllerState,
    aggregator: MetricsAggregator,
    resolver: FaultImpactResolver,
    evaluator: SlaEvaluator,
    metrics: Option<ReactiveMetrics>,
    previous_counts: (u64, u64),
    next_scan_at: f64,
    attempts: HashMap<CloudletId, u32>,
    abandoned: HashSet<CloudletId>,
    stats: ControllerStats,
}

impl ReactiveController {
    /// Build a controller in the `Idle` state.
    pub fn new(
        config: &ControllerConfig,
        evaluator: SlaEvaluator,
        metrics: Option<ReactiveMetrics>,
    ) -> Result<Self> {
        if !(config.control_interval_secs > 0.0 && config.control_interval_secs.is_finite()) {
            return Err(ResilienceError::Config(format!(
                "control_interval_secs must be positive, got {}",
                config.control_interval_secs
            )));
        }
        Ok(Self {
            control_interval: config.control_interval_secs,
            max_resubmissions: config.max_resubmissions,
            state: ControllerState::Idle,
            aggregator: MetricsAggregator::new(),
            resolver: FaultImpactResolver::new(metrics.clone()),
            evaluator,
            metrics,
            previous_counts: (0, 0),
            next_scan_at: config.control_interval_secs,
            attempts: HashMap::new(),
            abandoned: HashSet::new(),
            stats: ControllerStats::default(),
        })
    }

    /// Register a cloning policy for the VMs of `owner`.
    pub fn register_cloner(&mut self, owner: OwnerId, cloner: Box<dyn VmCloner>) {
        self.resolver.register_cloner(owner, cloner);
    }

    /// Reset every per-run structure. Counters only ever reset here.
    pub fn start_run(&mut self, now: f64) {
        self.aggregator.reset(now);
        self.resolver.reset();
        self.state = ControllerState::Idle;
        self.previous_counts = (0, 0);
        self.next_scan_at = now + self.control_interval;
        self.attempts.clear();
        self.abandoned.clear();
        self.stats = ControllerStats::default();
        info!(
            target: "faultline::resilience::controller",
            now,
            control_interval = self.control_interval,
            max_resubmissions = self.max_resubmissions,
            "reactive controller started"
        );
    }

    /// Current alert state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Fault bookkeeping of the run.
    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.aggregator
    }

    /// Contract evaluator.
    pub fn evaluator(&self) -> &SlaEvaluator {
        &self.evaluator
    }

    /// Run-level counters.
    pub fn stats(&self) -> ControllerStats {
        self.stats
    }

    /// Whether `cloudlet` is excluded from automatic handling.
    pub fn is_abandoned(&self, cloudlet: CloudletId) -> bool {
        self.abandoned.contains(&cloudlet)
    }

    /// Resubmissions performed for `cloudlet` so far.
    pub fn attempts(&self, cloudlet: CloudletId) -> u32 {
        self.attempts.get(&cloudlet).copied().unwrap_or(0)
    }

    /// Time of the next periodic scan.
    pub fn next_scan_at(&self) -> f64 {
        self.next_scan_at
    }

    /// Resolve a delivered host fault.
    pub fn handle_host_fault(
        &mut self,
        event: &FailureEvent,
        engine: &mut dyn CloudEngine,
    ) -> Result<ResolutionReport> {
        let report = self.resolver.handle_host_fault(
            event.target_host,
            event.time,
            engine,
            &mut self.aggregator,
        )?;
        self.stats.vm_clones += report.vm_clones.len() as u64;
        self.stats.cloudlet_clones += report.cloudlet_clones.len() as u64;
        self.stats.placement_errors += report.placement_failures.len() as u64;
        self.abandoned.extend(report.abandoned.iter().copied());
        Ok(report)
    }

    /// Evaluate the snapshot, drive the alert state machine, and run the
    /// periodic resubmission scan when it is due.
    pub fn tick(&mut self, now: f64, engine: &mut dyn CloudEngine) -> Result<TickOutcome> {
        self.stats.ticks += 1;
        let snapshot = self.aggregator.snapshot(now);
        let violations = self.detect_violations(&snapshot)?;
        let mut transitions = Vec::new();
        let mut remediation = None;
        let mut touched: HashSet<CloudletId> = HashSet::new();

        if violations.is_empty() {
            self.transition(ControllerState::Idle, now, &mut transitions);
        } else {
            self.stats.violation_ticks += 1;
            for violation in &violations {
                warn!(
                    target: "faultline::resilience::controller",
                    now,
                    metric = violation.metric(),
                    violation = ?violation,
                    "sla violation observed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_sla_violation(violation.metric());
                }
            }
            if self.state == ControllerState::Idle {
                self.transition(ControllerState::Alerted, now, &mut transitions);
            }
            let availability_breached = violations
                .iter()
                .any(|v| matches!(v, Violation::AvailabilityBelowMin { .. }));
            if availability_breached {
                self.transition(ControllerState::Remediating, now, &mut transitions);
                let report = self.resubmit_failed(engine, &touched)?;
                touched.extend(report.resubmitted.iter().copied());
                touched.extend(report.exhausted.iter().copied());
                remediation = Some(report);
                self.transition(ControllerState::Idle, now, &mut transitions);
            } else {
                debug!(
                    target: "faultline::resilience::controller",
                    now,
                    "fault count increase has no automatic remediation"
                );
            }
        }

        let scan = if now >= self.next_scan_at {
            while self.next_scan_at <= now {
                self.next_scan_at += self.control_interval;
            }
            Some(self.resubmit_failed(engine, &touched)?)
        } else {
            None
        };

        self.previous_counts = (snapshot.fault_count, snapshot.host_fault_count);
        Ok(TickOutcome {
            snapshot,
            violations,
            state: self.state,
            transitions,
            remediation,
            scan,
        })
    }

    fn detect_violations(&self, snapshot: &ReactiveSnapshot) -> Result<Vec<Violation>> {
        let mut violations = Vec::new();
        let observed_pct = snapshot.availability * 100.0;
        match self.evaluator.evaluate(names::AVAILABILITY, observed_pct) {
            Ok(eval) => {
                if let Some(bound) = eval.breached {
                    violations.push(Violation::AvailabilityBelowMin {
                        observed_pct,
                        threshold_pct: bound.threshold,
                    });
                }
            }
            Err(SlaError::MetricUnavailable(metric)) => {
                trace!(
                    target: "faultline::resilience::controller",
                    metric = %metric,
                    "availability not in contract; check skipped"
                );
            }
            Err(err) => return Err(err.into()),
        }
        let (previous, host_previous) = self.previous_counts;
        if snapshot.fault_count > previous {
            violations.push(Violation::FaultCountIncreased {
                previous,
                current: snapshot.fault_count,
                host_previous,
                host_current: snapshot.host_fault_count,
            });
        }
        Ok(violations)
    }

    fn transition(
        &mut self,
        to: ControllerState,
        now: f64,
        transitions: &mut Vec<StateTransition>,
    ) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.stats.transitions += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(from, to);
        }
        debug!(
            target: "faultline::resilience::controller",
            now,
            from = %from,
            to = %to,
            "controller state transition"
        );
        transitions.push(StateTransition {
            time: now,
            from,
            to,
        });
    }

    /// Resubmit every failed cloudlet not yet abandoned nor in `exclude`.
    fn resubmit_failed(
        &mut self,
        engine: &mut dyn CloudEngine,
        exclude: &HashSet<CloudletId>,
    ) -> Result<ResubmissionReport> {
        let mut report = ResubmissionReport::default();
        let failed: Vec<CloudletId> = engine
            .submitted_cloudlets()
            .into_iter()
            .filter(|cloudlet| cloudlet.status.is_failed())
            .map(|cloudlet| cloudlet.id)
            .filter(|id| !self.abandoned.contains(id) && !exclude.contains(id))
            .collect();

        for id in failed {
            let attempts = self.attempts.entry(id).or_insert(0);
            if *attempts >= self.max_resubmissions {
                engine.fail_cloudlet(id)?;
                self.abandoned.insert(id);
                report.exhausted.push(id);
            } else {
                *attempts += 1;
                report.resubmitted.push(id);
            }
        }

        if !report.resubmitted.is_empty() {
            engine.submit_cloudlet_batch(&report.resubmitted)?;
            info!(
                target: "faultline::resilience::controller",
                count = report.resubmitted.len(),
                cloudlets = ?report.resubmitted,
                "failed cloudlets resubmitted"
            );
        }
        if !report.exhausted.is_empty() {
            warn!(
                target: "faultline::resilience::controller",
                cloudlets = ?report.exhausted,
                max_resubmissions = self.max_resubmissions,
                "resubmission attempts exhausted"
            );
        }
        self.stats.resubmissions += report.resubmitted.len() as u64;
        self.stats.retry_exhausted += report.exhausted.len() as u64;
        if let Some(metrics) = &self.metrics {
            metrics.record_resubmissions(report.resubmitted.len());
            metrics.record_retry_exhausted(report.exhausted.len());
        }
        Ok(report)
    }
}

impl SimulationListener for ReactiveController {
    fn on_event(&mut self, event: &SimEvent, engine: &mut dyn CloudEngine) -> Result<()> {
        match event {
            SimEvent::HostFault(failure) => {
                self.handle_host_fault(failure, engine)?;
            }
            SimEvent::VmStarted { vm, time } => {
                self.resolver.on_vm_started(*vm, *time, &mut self.aggregator);
            }
            SimEvent::HostRepaired { host, time } => {
                self.aggregator
                    .complete_fault(crate::aggregator::FaultScope::Host, *host, *time);
            }
        }
        Ok(())
    }

    fn on_clock_tick(&mut self, now: f64, engine: &mut dyn CloudEngine) -> Result<()> {
        self.tick(now, engine).map(|_| ())
    }
}
