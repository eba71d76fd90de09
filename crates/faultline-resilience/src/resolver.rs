//! ---
//! fl_section: "07-resilience-fault-tolerance"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Host fault impact resolution by cloning."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::aggregator::{FaultScope, MetricsAggregator};
use crate::engine::{
    CloudEngine, CloudletId, CloudletSpec, CloudletStatus, CloudletView, HostId, OwnerId, VmId,
    VmSpec, VmStatus, VmView,
};
use crate::error::Result;
use crate::metrics::ReactiveMetrics;

/// Clone identifiers are the source identifier times this factor.
pub const CLONE_ID_MULTIPLIER: u64 = 10;

/// Why a clone was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloneCause {
    /// The source VM lived on a host that failed.
    HostFault {
        /// Failed host.
        host: HostId,
    },
}

/// Source VM and the clone replacing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VmCloneMapping {
    /// Destroyed VM.
    pub source_id: VmId,
    /// Replacement VM.
    pub clone_id: VmId,
    /// Trigger of the clone.
    pub cause: CloneCause,
}

/// Source cloudlet and the restarted copy replacing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CloudletCloneMapping {
    /// Interrupted cloudlet, now canceled.
    pub source_id: CloudletId,
    /// Fresh cloudlet with progress reset to zero.
    pub clone_id: CloudletId,
    /// Trigger of the clone.
    pub cause: CloneCause,
}

/// A clone VM that could not be placed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacementFailure {
    /// VM whose replacement failed.
    pub source_vm: VmId,
    /// Cloudlets marked permanently failed as a consequence.
    pub cloudlets: Vec<CloudletId>,
    /// Engine explanation.
    pub reason: String,
}

/// Everything the resolver did for one host fault.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolutionReport {
    /// Failed host, `None` for an empty report.
    pub host: Option<HostId>,
    /// True when the host was already handled at the same instant.
    pub duplicate: bool,
    /// VMs destroyed by the fault.
    pub destroyed_vms: Vec<VmId>,
    /// VMs destroyed with no cloning policy for their owner.
    pub unprotected_vms: Vec<VmId>,
    /// Clone VMs created.
    pub vm_clones: Vec<VmCloneMapping>,
    /// Clone cloudlets created and submitted.
    pub cloudlet_clones: Vec<CloudletCloneMapping>,
    /// Clones that could not be placed.
    pub placement_failures: Vec<PlacementFailure>,
    /// Cloudlets excluded from further automatic handling.
    pub abandoned: Vec<CloudletId>,
}

/// Cloning policy for the VMs of one owner.
pub trait VmCloner: std::fmt::Debug {
    /// Specification of a replacement for `source`.
    fn clone_vm(&self, source: &VmView) -> VmSpec;

    /// Specification of a fresh copy of `source` bound to `clone_vm`.
    fn clone_cloudlet(&self, source: &CloudletView, clone_vm: VmId) -> CloudletSpec;
}

/// Identical capacity and utilization, identifiers scaled by [`CLONE_ID_MULTIPLIER`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleVmCloner;

impl VmCloner for SimpleVmCloner {
    fn clone_vm(&self, source: &VmView) -> VmSpec {
        VmSpec {
            id: Some(source.id * CLONE_ID_MULTIPLIER),
            description: Some(format!("clone of vm {}", source.id)),
            ..source.spec.clone()
        }
    }

    fn clone_cloudlet(&self, source: &CloudletView, clone_vm: VmId) -> CloudletSpec {
        CloudletSpec {
            id: Some(source.id * CLONE_ID_MULTIPLIER),
            vm: Some(clone_vm),
            ..source.spec.clone()
        }
    }
}

/// Handles host faults: destroys the affected VMs and clones them, along
/// with their unfinished cloudlets, onto available capacity.
#[derive(Debug, Default)]
pub struct FaultImpactResolver {
    cloners: IndexMap<OwnerId, Box<dyn VmCloner>>,
    handled_vms: HashSet<VmId>,
    tick_hosts: HashSet<HostId>,
    tick_time: Option<f64>,
    /// Booting clone -> VMs whose fault it repairs, oldest first.
    pending_recoveries: HashMap<VmId, Vec<VmId>>,
    metrics: Option<ReactiveMetrics>,
}

impl FaultImpactResolver {
    /// Resolver with no cloning policies.
    pub fn new(metrics: Option<ReactiveMetrics>) -> Self {
        Self {
            metrics,
            ..Default::default()
        }
    }

    /// Register the cloning policy for the VMs of `owner`.
    pub fn register_cloner(&mut self, owner: OwnerId, cloner: Box<dyn VmCloner>) {
        self.cloners.insert(owner, cloner);
    }

    /// Forget every marker; cloning policies are kept.
    pub fn reset(&mut self) {
        self.handled_vms.clear();
        self.tick_hosts.clear();
        self.tick_time = None;
        self.pending_recoveries.clear();
    }

    /// Clone VMs that have not finished booting yet.
    pub fn pending_recoveries(&self) -> usize {
        self.pending_recoveries.len()
    }

    /// Resolve a host fault delivered at `now`.
    ///
    /// Records the host fault and one VM fault per destroyed VM in
    /// `aggregator`. A second delivery for the same host at the same instant
    /// is reported as a duplicate and changes nothing.
    pub fn handle_host_fault(
        &mut self,
        host: HostId,
        now: f64,
        engine: &mut dyn CloudEngine,
        aggregator: &mut MetricsAggregator,
    ) -> Result<ResolutionReport> {
        if self.tick_time != Some(now) {
            self.tick_time = Some(now);
            self.tick_hosts.clear();
        }
        let mut report = ResolutionReport {
            host: Some(host),
            ..Default::default()
        };
        if self.tick_hosts.contains(&host) {
            debug!(
                target: "faultline::resilience::resolver",
                host,
                now,
                "host fault already handled at this instant"
            );
            report.duplicate = true;
            return Ok(report);
        }

        let vms = engine.vms_on_host(host)?;
        self.tick_hosts.insert(host);
        aggregator.record_fault(FaultScope::Host, host, now);
        if let Some(metrics) = &self.metrics {
            metrics.record_fault(FaultScope::Host);
        }
        warn!(
            target: "faultline::resilience::resolver",
            host,
            now,
            vms = vms.len(),
            "host fault delivered"
        );

        for vm_id in vms {
            if !self.handled_vms.insert(vm_id) {
                continue;
            }
            let Some(view) = engine.vm(vm_id) else {
                continue;
            };
            if view.status == VmStatus::Destroyed {
                continue;
            }
            self.resolve_vm(&view, host, now, engine, aggregator, &mut report)?;
        }

        info!(
            target: "faultline::resilience::resolver",
            host,
            destroyed = report.destroyed_vms.len(),
            vm_clones = report.vm_clones.len(),
            cloudlet_clones = report.cloudlet_clones.len(),
            placement_failures = report.placement_failures.len(),
            "host fault resolved"
        );
        Ok(report)
    }

    /// Close the VM faults a booted clone was replacing. Returns the VM it
    /// was cloned from.
    ///
    /// A clone destroyed while booting hands its pending faults to its own
    /// clone, so every fault in the chain closes here.
    pub fn on_vm_started(
        &mut self,
        vm: VmId,
        at: f64,
        aggregator: &mut MetricsAggregator,
    ) -> Option<VmId> {
        let sources = self.pending_recoveries.remove(&vm)?;
        for source in &sources {
            aggregator.complete_fault(FaultScope::Vm, *source, at);
        }
        let source = sources.last().copied()?;
        debug!(
            target: "faultline::resilience::resolver",
            source_vm = source,
            clone_vm = vm,
            at,
            "clone vm operational"
        );
        Some(source)
    }

    fn resolve_vm(
        &mut self,
        view: &VmView,
        host: HostId,
        now: f64,
        engine: &mut dyn CloudEngine,
        aggregator: &mut MetricsAggregator,
        report: &mut ResolutionReport,
    ) -> Result<()> {
        let interrupted: Vec<CloudletView> = engine
            .cloudlets_on_vm(view.id)
            .into_iter()
            .filter(|cloudlet| {
                !matches!(
                    cloudlet.status,
                    CloudletStatus::Finished | CloudletStatus::Canceled
                )
            })
            .collect();

        engine.destroy_vm(view.id)?;
        let mut sources = self.pending_recoveries.remove(&view.id).unwrap_or_default();
        sources.push(view.id);
        aggregator.record_fault(FaultScope::Vm, view.id, now);
        if let Some(metrics) = &self.metrics {
            metrics.record_fault(FaultScope::Vm);
        }
        report.destroyed_vms.push(view.id);

        let Some(cloner) = self.cloners.get(&view.spec.owner) else {
            debug!(
                target: "faultline::resilience::resolver",
                vm = view.id,
                owner = view.spec.owner,
                "no cloning policy for owner; vm lost"
            );
            report.unprotected_vms.push(view.id);
            return Ok(());
        };

        let cause = CloneCause::HostFault { host };
        let clone_id = match engine.create_vm(cloner.clone_vm(view)) {
            Ok(id) => id,
            Err(err) if err.is_placement_failure() => {
                error!(
                    target: "faultline::resilience::resolver",
                    vm = view.id,
                    error = %err,
                    "clone vm could not be placed; cloudlets abandoned"
                );
                let mut cloudlets = Vec::with_capacity(interrupted.len());
                for cloudlet in &interrupted {
                    engine.fail_cloudlet(cloudlet.id)?;
                    cloudlets.push(cloudlet.id);
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_placement_error();
                }
                report.abandoned.extend(cloudlets.iter().copied());
                report.placement_failures.push(PlacementFailure {
                    source_vm: view.id,
                    cloudlets,
                    reason: err.to_string(),
                });
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        self.pending_recoveries.insert(clone_id, sources);
        report.vm_clones.push(VmCloneMapping {
            source_id: view.id,
            clone_id,
            cause,
        });
        if let Some(metrics) = &self.metrics {
            metrics.record_clone("vm");
        }

        let mut batch = Vec::with_capacity(interrupted.len());
        for cloudlet in &interrupted {
            match engine.create_cloudlet(cloner.clone_cloudlet(cloudlet, clone_id)) {
                Ok(id) => {
                    batch.push(id);
                    report.cloudlet_clones.push(CloudletCloneMapping {
                        source_id: cloudlet.id,
                        clone_id: id,
                        cause,
                    });
                }
                Err(err) => {
                    warn!(
                        target: "faultline::resilience::resolver",
                        cloudlet = cloudlet.id,
                        error = %err,
                        "clone cloudlet rejected; original abandoned"
                    );
                    engine.fail_cloudlet(cloudlet.id)?;
                    report.abandoned.push(cloudlet.id);
                }
            }
        }
        if !batch.is_empty() {
            engine.submit_cloudlet_batch(&batch)?;
        }
        for mapping in report
            .cloudlet_clones
            .iter()
            .filter(|mapping| batch.contains(&mapping.clone_id))
        {
            engine.cancel_cloudlet(mapping.source_id)?;
            if let Some(metrics) = &self.metrics {
                metrics.record_clone("cloudlet");
            }
        }
        info!(
            target: "faultline::resilience::resolver",
            source_vm = view.id,
            clone_vm = clone_id,
            cloudlets = batch.len(),
            "vm cloned after host fault"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedEngine;

    fn engine_with_host_load() -> ScriptedEngine {
        let mut engine = ScriptedEngine::new(&[1, 2]);
        engine.add_vm(1, 1, 7);
        engine.add_vm(2, 1, 7);
        engine.add_cloudlet(1, 1, CloudletStatus::Running);
        engine.add_cloudlet(2, 1, CloudletStatus::Finished);
        engine.add_cloudlet(3, 2, CloudletStatus::Queued);
        engine
    }

    fn resolver() -> FaultImpactResolver {
        let mut resolver = FaultImpactResolver::new(None);
        resolver.register_cloner(7, Box::new(SimpleVmCloner));
        resolver
    }

    #[test]
    fn clones_use_the_documented_multiplier() {
        let mut engine = engine_with_host_load();
        let mut agg = MetricsAggregator::new();
        let report = resolver()
            .handle_host_fault(1, 100.0, &mut engine, &mut agg)
            .unwrap();

        let vm_pairs: Vec<_> = report
            .vm_clones
            .iter()
            .map(|m| (m.source_id, m.clone_id))
            .collect();
        assert_eq!(vm_pairs, vec![(1, 10), (2, 20)]);
        let cloudlet_pairs: Vec<_> = report
            .cloudlet_clones
            .iter()
            .map(|m| (m.source_id, m.clone_id))
            .collect();
        assert_eq!(cloudlet_pairs, vec![(1, 10), (3, 30)]);

        assert_eq!(engine.vms[&1].status, VmStatus::Destroyed);
        assert_eq!(engine.vms[&10].spec.ram, engine.vms[&1].spec.ram);
        assert_eq!(engine.vms[&10].spec.mips, engine.vms[&1].spec.mips);
        assert_eq!(engine.status(1), CloudletStatus::Canceled);
        assert_eq!(engine.status(2), CloudletStatus::Finished);
        assert_eq!(engine.status(10), CloudletStatus::Queued);
        assert_eq!(engine.cloudlets[&10].finished_length, 0.0);
        assert_eq!(engine.cloudlets[&10].vm, Some(10));
        assert_eq!(agg.host_faults(), 1);
        assert_eq!(agg.vm_faults(), 2);
    }

    #[test]
    fn duplicate_delivery_in_same_tick_clones_once() {
        let mut engine = engine_with_host_load();
        engine.sticky_vms = true;
        let mut agg = MetricsAggregator::new();
        let mut resolver = resolver();
        let first = resolver
            .handle_host_fault(1, 50.0, &mut engine, &mut agg)
            .unwrap();
        let second = resolver
            .handle_host_fault(1, 50.0, &mut engine, &mut agg)
            .unwrap();
        assert_eq!(first.vm_clones.len(), 2);
        assert!(second.duplicate);
        assert!(second.vm_clones.is_empty());
        assert_eq!(engine.vms.len(), 4);
        assert_eq!(agg.total_faults(), 3);
    }

    #[test]
    fn handled_marker_survives_later_ticks() {
        let mut engine = engine_with_host_load();
        engine.sticky_vms = true;
        let mut agg = MetricsAggregator::new();
        let mut resolver = resolver();
        resolver
            .handle_host_fault(1, 50.0, &mut engine, &mut agg)
            .unwrap();
        let later = resolver
            .handle_host_fault(1, 60.0, &mut engine, &mut agg)
            .unwrap();
        assert!(!later.duplicate);
        assert!(later.vm_clones.is_empty());
        assert_eq!(agg.host_faults(), 2);
        assert_eq!(agg.vm_faults(), 2);
    }

    #[test]
    fn placement_failure_abandons_cloudlets() {
        let mut engine = engine_with_host_load();
        engine.vm_slots = Some(1);
        let mut agg = MetricsAggregator::new();
        let report = resolver()
            .handle_host_fault(1, 10.0, &mut engine, &mut agg)
            .unwrap();
        assert_eq!(report.vm_clones.len(), 1);
        assert_eq!(report.placement_failures.len(), 1);
        assert_eq!(report.placement_failures[0].source_vm, 2);
        assert_eq!(report.abandoned, vec![3]);
        assert_eq!(engine.status(3), CloudletStatus::Failed);
    }

    #[test]
    fn owner_without_policy_loses_vm() {
        let mut engine = engine_with_host_load();
        let mut agg = MetricsAggregator::new();
        let report = FaultImpactResolver::new(None)
            .handle_host_fault(1, 10.0, &mut engine, &mut agg)
            .unwrap();
        assert_eq!(report.unprotected_vms, vec![1, 2]);
        assert!(report.vm_clones.is_empty());
        assert_eq!(engine.status(1), CloudletStatus::Failed);
    }

    #[test]
    fn started_clone_completes_vm_fault() {
        let mut engine = engine_with_host_load();
        let mut agg = MetricsAggregator::new();
        let mut resolver = resolver();
        resolver
            .handle_host_fault(1, 100.0, &mut engine, &mut agg)
            .unwrap();
        assert_eq!(resolver.pending_recoveries(), 2);
        assert_eq!(resolver.on_vm_started(10, 160.0, &mut agg), Some(1));
        assert_eq!(resolver.on_vm_started(10, 170.0, &mut agg), None);
        assert_eq!(agg.mttr(FaultScope::Vm), Some(60.0));
    }

    #[test]
    fn clone_lost_while_booting_hands_its_faults_on() {
        let mut engine = ScriptedEngine::new(&[1, 2]);
        engine.add_vm(1, 1, 7);
        engine.add_cloudlet(1, 1, CloudletStatus::Running);
        let mut agg = MetricsAggregator::new();
        let mut resolver = resolver();

        resolver
            .handle_host_fault(1, 100.0, &mut engine, &mut agg)
            .unwrap();
        let report = resolver
            .handle_host_fault(2, 120.0, &mut engine, &mut agg)
            .unwrap();
        assert_eq!(report.destroyed_vms, vec![10]);
        assert_eq!(resolver.pending_recoveries(), 1);

        assert_eq!(resolver.on_vm_started(100, 150.0, &mut agg), Some(10));
        assert_eq!(agg.open_faults(FaultScope::Vm), 0);
        assert_eq!(agg.mttr(FaultScope::Vm), Some(40.0));
    }

    #[test]
    fn unknown_host_is_an_engine_error() {
        let mut engine = engine_with_host_load();
        let mut agg = MetricsAggregator::new();
        assert!(resolver()
            .handle_host_fault(99, 1.0, &mut engine, &mut agg)
            .is_err());
        assert_eq!(agg.total_faults(), 0);
    }
}
