//! ---
//! fl_section: "07-resilience-fault-tolerance"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Fault bookkeeping and derived reliability metrics."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, trace};

/// Level at which a fault was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultScope {
    /// A physical host failed.
    Host,
    /// A VM was destroyed as a consequence of a host failure.
    Vm,
}

impl FaultScope {
    /// Static label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultScope::Host => "host",
            FaultScope::Vm => "vm",
        }
    }
}

impl fmt::Display for FaultScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fault and, once known, the time it was repaired.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultRecord {
    /// Host or VM scope.
    pub scope: FaultScope,
    /// Host or VM identifier, depending on the scope.
    pub target: u64,
    /// Time the fault was delivered.
    pub start_time: f64,
    /// Time the replacement became operational; never before `start_time`.
    pub repair_time: Option<f64>,
}

impl FaultRecord {
    /// Repair duration in seconds once the record is complete.
    pub fn repair_duration(&self) -> Option<f64> {
        self.repair_time.map(|repair| repair - self.start_time)
    }
}

/// Per-tick view used by the reactive controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReactiveSnapshot {
    /// Time the snapshot was computed at.
    pub time: f64,
    /// Availability fraction in `[0, 1]`.
    pub availability: f64,
    /// Faults of every scope so far.
    pub fault_count: u64,
    /// Host faults so far.
    pub host_fault_count: u64,
}

/// Owns the fault counters and downtime intervals of one run.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    run_start: f64,
    total_faults: u64,
    host_faults: u64,
    records: Vec<FaultRecord>,
    open: HashMap<(FaultScope, u64), usize>,
}

impl MetricsAggregator {
    /// Fresh aggregator whose run starts at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard every counter and record; the only way counters decrease.
    pub fn reset(&mut self, run_start: f64) {
        self.run_start = run_start;
        self.total_faults = 0;
        self.host_faults = 0;
        self.records.clear();
        self.open.clear();
        debug!(target: "faultline::resilience::aggregator", run_start, "aggregator reset");
    }

    /// Open a fault record. A target already holding an open record of the
    /// same scope keeps the earlier start time but is still counted.
    pub fn record_fault(&mut self, scope: FaultScope, target: u64, at: f64) {
        self.total_faults += 1;
        if scope == FaultScope::Host {
            self.host_faults += 1;
        }
        if !self.open.contains_key(&(scope, target)) {
            self.open.insert((scope, target), self.records.len());
            self.records.push(FaultRecord {
                scope,
                target,
                start_time: at,
                repair_time: None,
            });
        }
        trace!(
            target: "faultline::resilience::aggregator",
            scope = %scope,
            target_id = target,
            at,
            total_faults = self.total_faults,
            "fault recorded"
        );
    }

    /// Close the open record for `target`. Returns `false` when none was open.
    pub fn complete_fault(&mut self, scope: FaultScope, target: u64, at: f64) -> bool {
        let Some(index) = self.open.remove(&(scope, target)) else {
            return false;
        };
        let record = &mut self.records[index];
        let repaired = at.max(record.start_time);
        record.repair_time = Some(repaired);
        trace!(
            target: "faultline::resilience::aggregator",
            scope = %scope,
            target_id = target,
            repair_secs = repaired - record.start_time,
            "fault repaired"
        );
        true
    }

    /// Faults of every scope.
    pub fn total_faults(&self) -> u64 {
        self.total_faults
    }

    /// Host-level faults.
    pub fn host_faults(&self) -> u64 {
        self.host_faults
    }

    /// Faults that were not host-level.
    pub fn vm_faults(&self) -> u64 {
        self.total_faults - self.host_faults
    }

    /// Every record opened since the last reset.
    pub fn records(&self) -> &[FaultRecord] {
        &self.records
    }

    /// Records of `scope` still waiting for a repair.
    pub fn open_faults(&self, scope: FaultScope) -> usize {
        self.open.keys().filter(|(s, _)| *s == scope).count()
    }

    /// Mean repair duration in seconds over completed records of `scope`.
    pub fn mttr(&self, scope: FaultScope) -> Option<f64> {
        let durations: Vec<f64> = self
            .records
            .iter()
            .filter(|record| record.scope == scope)
            .filter_map(FaultRecord::repair_duration)
            .collect();
        if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<f64>() / durations.len() as f64)
        }
    }

    /// Observed time divided by the number of faults of `scope`, in seconds.
    pub fn mtbf(&self, scope: FaultScope, now: f64) -> Option<f64> {
        let count = match scope {
            FaultScope::Host => self.host_faults,
            FaultScope::Vm => self.vm_faults(),
        };
        if count == 0 {
            return None;
        }
        Some(self.observed_time(now) / count as f64)
    }

    /// One minus the summed VM downtime over the observed time.
    ///
    /// Every VM outage counts on its own, so two VMs down together cost
    /// twice. Open records run until `now`.
    pub fn availability(&self, now: f64) -> f64 {
        let total = self.observed_time(now);
        if total <= 0.0 {
            return 1.0;
        }
        let downtime: f64 = self
            .records
            .iter()
            .filter(|record| record.scope == FaultScope::Vm)
            .map(|record| {
                let start = record.start_time.clamp(self.run_start, now);
                let end = record.repair_time.unwrap_or(now).clamp(start, now);
                end - start
            })
            .sum();
        (1.0 - downtime / total).clamp(0.0, 1.0)
    }

    /// Snapshot for the controller; recomputed on every call.
    pub fn snapshot(&self, now: f64) -> ReactiveSnapshot {
        ReactiveSnapshot {
            time: now,
            availability: self.availability(now),
            fault_count: self.total_faults,
            host_fault_count: self.host_faults,
        }
    }

    fn observed_time(&self, now: f64) -> f64 {
        (now - self.run_start).max(0.0)
    }
}
