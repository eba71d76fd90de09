//! ---
//! fl_section: "11-simulation-test-harness"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Deterministic in-process datacenter engine."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};

use faultline_resilience::engine::{
    CloudEngine, CloudletId, CloudletSpec, CloudletStatus, CloudletView, HostId, OwnerId,
    SimEvent, VmId, VmSpec, VmStatus, VmView,
};
use faultline_resilience::EngineError;
use indexmap::IndexMap;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, trace};

/// Capacity of one physical host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostSpec {
    pub pes: u32,
    pub mips_per_pe: f64,
    pub ram: u64,
    pub bw: u64,
    pub storage: u64,
}

/// Engine-level tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatacenterConfig {
    /// Upper bound of the uniformly sampled boot delay of VMs created mid-run.
    pub max_vm_recovery_secs: f64,
    /// Time a failed host stays down; `None` keeps it down.
    pub host_repair_secs: Option<f64>,
    /// Seed of the boot delay sampler.
    pub seed: u64,
}

fn tolerance(clock: f64) -> f64 {
    1e-9_f64.max(clock.abs() * 1e-12)
}

#[derive(Debug)]
struct Host {
    spec: HostSpec,
    down_since: Option<f64>,
    repair_at: Option<f64>,
    free_pes: u32,
    free_ram: u64,
    free_bw: u64,
    free_storage: u64,
}

impl Host {
    fn new(spec: HostSpec) -> Self {
        Self {
            spec,
            down_since: None,
            repair_at: None,
            free_pes: spec.pes,
            free_ram: spec.ram,
            free_bw: spec.bw,
            free_storage: spec.storage,
        }
    }

    fn is_up(&self) -> bool {
        self.down_since.is_none()
    }

    fn fits(&self, vm: &VmSpec) -> bool {
        self.is_up()
            && vm.pes <= self.free_pes
            && vm.mips <= self.spec.mips_per_pe
            && vm.ram <= self.free_ram
            && vm.bw <= self.free_bw
            && vm.storage <= self.free_storage
    }

    fn reserve(&mut self, vm: &VmSpec) {
        self.free_pes -= vm.pes;
        self.free_ram -= vm.ram;
        self.free_bw -= vm.bw;
        self.free_storage -= vm.storage;
    }

    fn release(&mut self, vm: &VmSpec) {
        self.free_pes = (self.free_pes + vm.pes).min(self.spec.pes);
        self.free_ram = (self.free_ram + vm.ram).min(self.spec.ram);
        self.free_bw = (self.free_bw + vm.bw).min(self.spec.bw);
        self.free_storage = (self.free_storage + vm.storage).min(self.spec.storage);
    }

    fn capacity_mips(&self) -> f64 {
        self.spec.pes as f64 * self.spec.mips_per_pe
    }
}

#[derive(Debug)]
struct Vm {
    host: Option<HostId>,
    status: VmStatus,
    spec: VmSpec,
    ready_at: Option<f64>,
}

#[derive(Debug)]
struct Cloudlet {
    spec: CloudletSpec,
    status: CloudletStatus,
    vm: Option<VmId>,
    exec_start: Option<f64>,
    finish_time: Option<f64>,
    finished_length: f64,
    submissions: u32,
}

impl Cloudlet {
    fn is_active(&self) -> bool {
        matches!(
            self.status,
            CloudletStatus::Queued | CloudletStatus::Running
        )
    }
}

/// Hosts, VMs, and cloudlets of one simulated datacenter.
///
/// Cloudlets on a VM share its capacity: each asks for
/// `vm_mips * min(cloudlet_pes, vm_pes) * cpu_share`, and every demand is
/// scaled down proportionally when the VM is oversubscribed. Time only moves
/// through [`Datacenter::advance_to`].
#[derive(Debug)]
pub struct Datacenter {
    clock: f64,
    hosts: IndexMap<HostId, Host>,
    vms: IndexMap<VmId, Vm>,
    cloudlets: IndexMap<CloudletId, Cloudlet>,
    next_host_id: HostId,
    next_vm_id: VmId,
    next_cloudlet_id: CloudletId,
    host_repair_secs: Option<f64>,
    boot_delay: Uniform<f64>,
    rng: StdRng,
}

impl Datacenter {
    pub fn new(config: DatacenterConfig) -> Self {
        let upper = config.max_vm_recovery_secs.max(1.0);
        Self {
            clock: 0.0,
            hosts: IndexMap::new(),
            vms: IndexMap::new(),
            cloudlets: IndexMap::new(),
            next_host_id: 1,
            next_vm_id: 1,
            next_cloudlet_id: 1,
            host_repair_secs: config.host_repair_secs,
            boot_delay: Uniform::new_inclusive(1.0, upper),
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Add a host; identifiers start at 1.
    pub fn add_host(&mut self, spec: HostSpec) -> HostId {
        let id = self.next_host_id;
        self.next_host_id += 1;
        self.hosts.insert(id, Host::new(spec));
        id
    }

    /// Place a VM that is usable immediately (initial fleet).
    pub fn provision_vm(&mut self, spec: VmSpec) -> Result<VmId, EngineError> {
        self.place(spec, None)
    }

    /// Take a host down at `at`. Returns `false` when it was already down.
    pub fn fail_host(&mut self, host: HostId, at: f64) -> Result<bool, EngineError> {
        let repair = self.host_repair_secs;
        let entry = self
            .hosts
            .get_mut(&host)
            .ok_or(EngineError::UnknownHost(host))?;
        if !entry.is_up() {
            return Ok(false);
        }
        entry.down_since = Some(at);
        entry.repair_at = repair.map(|secs| at + secs);
        debug!(
            target: "faultline::sim::datacenter",
            host,
            at,
            repair_at = ?entry.repair_at,
            "host failed"
        );
        Ok(true)
    }

    /// Time the host went down, `None` while it is up.
    pub fn host_down_since(&self, host: HostId) -> Result<Option<f64>, EngineError> {
        self.hosts
            .get(&host)
            .map(|entry| entry.down_since)
            .ok_or(EngineError::UnknownHost(host))
    }

    /// View of one cloudlet.
    pub fn cloudlet(&self, id: CloudletId) -> Option<CloudletView> {
        self.cloudlets
            .get(&id)
            .map(|cloudlet| Self::view_cloudlet(id, cloudlet))
    }

    /// Cloudlets that completed, in creation order.
    pub fn finished_cloudlets(&self) -> Vec<CloudletView> {
        self.cloudlets
            .iter()
            .filter(|(_, cloudlet)| cloudlet.status == CloudletStatus::Finished)
            .map(|(id, cloudlet)| Self::view_cloudlet(*id, cloudlet))
            .collect()
    }

    /// Whether a clone VM is still waiting for its boot delay.
    pub fn has_booting_vms(&self) -> bool {
        self.vms
            .values()
            .any(|vm| vm.status == VmStatus::Booting)
    }

    /// Earliest boot completion, host repair, or cloudlet completion.
    pub fn next_internal_event(&self) -> Option<f64> {
        let boots = self.vms.values().filter_map(|vm| match vm.status {
            VmStatus::Booting => vm.ready_at,
            _ => None,
        });
        let repairs = self.hosts.values().filter_map(|host| host.repair_at);
        let rates = self.rates();
        let completions = rates.iter().filter_map(|(id, rate)| {
            let cloudlet = self.cloudlets.get(id)?;
            let remaining = cloudlet.spec.length as f64 - cloudlet.finished_length;
            Some(self.clock + remaining.max(0.0) / rate)
        });
        boots
            .chain(repairs)
            .chain(completions)
            .fold(None, |acc: Option<f64>, t| {
                Some(acc.map_or(t, |best| best.min(t)))
            })
    }

    /// Move the clock to `target`, processing every internal event on the way.
    ///
    /// Returns VM boot completions and host repairs, boots first.
    pub fn advance_to(&mut self, target: f64) -> Vec<SimEvent> {
        let target = target.max(self.clock);
        let mut events = Vec::new();
        loop {
            let next = self
                .next_internal_event()
                .filter(|t| *t <= target + tolerance(target));
            let stop = next.map_or(target, |t| t.clamp(self.clock, target));
            self.progress(stop);
            events.extend(self.apply_due());
            self.dispatch();
            if next.is_none() {
                break;
            }
        }
        events
    }

    fn place(&mut self, spec: VmSpec, ready_at: Option<f64>) -> Result<VmId, EngineError> {
        let id = match spec.id {
            Some(id) if self.vms.contains_key(&id) => return Err(EngineError::DuplicateId(id)),
            Some(id) => id,
            None => self.allocate_vm_id(),
        };
        let Some((host_id, host)) = self.hosts.iter_mut().find(|(_, host)| host.fits(&spec)) else {
            return Err(EngineError::NoCapacity {
                vm: id,
                pes: spec.pes,
                ram: spec.ram,
            });
        };
        host.reserve(&spec);
        let host_id = *host_id;
        let status = if ready_at.is_some() {
            VmStatus::Booting
        } else {
            VmStatus::Running
        };
        trace!(
            target: "faultline::sim::datacenter",
            vm = id,
            host = host_id,
            ready_at = ?ready_at,
            "vm placed"
        );
        self.vms.insert(
            id,
            Vm {
                host: Some(host_id),
                status,
                spec: VmSpec {
                    id: Some(id),
                    ..spec
                },
                ready_at,
            },
        );
        Ok(id)
    }

    fn allocate_vm_id(&mut self) -> VmId {
        while self.vms.contains_key(&self.next_vm_id) {
            self.next_vm_id += 1;
        }
        let id = self.next_vm_id;
        self.next_vm_id += 1;
        id
    }

    fn allocate_cloudlet_id(&mut self) -> CloudletId {
        while self.cloudlets.contains_key(&self.next_cloudlet_id) {
            self.next_cloudlet_id += 1;
        }
        let id = self.next_cloudlet_id;
        self.next_cloudlet_id += 1;
        id
    }

    fn vm_usable(&self, id: VmId) -> bool {
        self.vms.get(&id).is_some_and(|vm| {
            vm.status == VmStatus::Running
                && vm
                    .host
                    .and_then(|host| self.hosts.get(&host))
                    .is_some_and(Host::is_up)
        })
    }

    /// Execution rate of every running cloudlet on a usable VM, in creation order.
    fn rates(&self) -> IndexMap<CloudletId, f64> {
        let mut demands: IndexMap<CloudletId, (VmId, f64)> = IndexMap::new();
        let mut per_vm: IndexMap<VmId, f64> = IndexMap::new();
        for (id, cloudlet) in &self.cloudlets {
            if cloudlet.status != CloudletStatus::Running {
                continue;
            }
            let Some(vm_id) = cloudlet.vm.filter(|vm| self.vm_usable(*vm)) else {
                continue;
            };
            let vm = &self.vms[&vm_id];
            let pes = cloudlet.spec.pes.min(vm.spec.pes) as f64;
            let demand = vm.spec.mips * pes * cloudlet.spec.utilization.cpu;
            if demand <= 0.0 {
                continue;
            }
            demands.insert(*id, (vm_id, demand));
            *per_vm.entry(vm_id).or_insert(0.0) += demand;
        }
        demands
            .into_iter()
            .map(|(id, (vm_id, demand))| {
                let vm = &self.vms[&vm_id];
                let capacity = vm.spec.mips * vm.spec.pes as f64;
                let scale = (capacity / per_vm[&vm_id]).min(1.0);
                (id, demand * scale)
            })
            .collect()
    }

    fn progress(&mut self, to: f64) {
        let start = self.clock;
        let dt = (to - start).max(0.0);
        let rates = self.rates();
        let eps = tolerance(to);
        for (id, cloudlet) in self.cloudlets.iter_mut() {
            let Some(rate) = rates.get(id) else {
                continue;
            };
            let length = cloudlet.spec.length as f64;
            let remaining = (length - cloudlet.finished_length).max(0.0);
            let time_to_finish = remaining / rate;
            if time_to_finish <= dt + eps {
                cloudlet.finished_length = length;
                cloudlet.status = CloudletStatus::Finished;
                cloudlet.finish_time = Some((start + time_to_finish).min(to.max(start)));
                trace!(
                    target: "faultline::sim::datacenter",
                    cloudlet = *id,
                    finish = ?cloudlet.finish_time,
                    "cloudlet finished"
                );
            } else {
                cloudlet.finished_length += rate * dt;
            }
        }
        self.clock = to.max(start);
    }

    fn apply_due(&mut self) -> Vec<SimEvent> {
        let now = self.clock;
        let eps = tolerance(now);
        let mut events = Vec::new();
        for (id, vm) in self.vms.iter_mut() {
            if vm.status == VmStatus::Booting && vm.ready_at.is_some_and(|t| t <= now + eps) {
                vm.status = VmStatus::Running;
                vm.ready_at = None;
                events.push(SimEvent::VmStarted { vm: *id, time: now });
            }
        }
        for (id, host) in self.hosts.iter_mut() {
            if host.repair_at.is_some_and(|t| t <= now + eps) {
                host.down_since = None;
                host.repair_at = None;
                debug!(target: "faultline::sim::datacenter", host = *id, now, "host repaired");
                events.push(SimEvent::HostRepaired { host: *id, time: now });
            }
        }
        events
    }

    /// Start queued cloudlets whose VM became usable.
    fn dispatch(&mut self) {
        let usable: HashSet<VmId> = self
            .vms
            .keys()
            .copied()
            .filter(|id| self.vm_usable(*id))
            .collect();
        let now = self.clock;
        for cloudlet in self.cloudlets.values_mut() {
            if cloudlet.status == CloudletStatus::Queued
                && cloudlet.vm.is_some_and(|vm| usable.contains(&vm))
            {
                cloudlet.status = CloudletStatus::Running;
                cloudlet.exec_start.get_or_insert(now);
            }
        }
    }

    /// Live VM of `owner` carrying the fewest active cloudlets.
    fn least_loaded_vm(&self, owner: OwnerId, load: &HashMap<VmId, usize>) -> Option<VmId> {
        self.vms
            .iter()
            .filter(|(_, vm)| vm.spec.owner == owner && vm.status != VmStatus::Destroyed)
            .filter(|(_, vm)| {
                vm.host
                    .and_then(|host| self.hosts.get(&host))
                    .is_some_and(Host::is_up)
            })
            .min_by_key(|(id, _)| load.get(*id).copied().unwrap_or(0))
            .map(|(id, _)| *id)
    }

    fn view_vm(id: VmId, vm: &Vm) -> VmView {
        VmView {
            id,
            host: vm.host,
            status: vm.status,
            spec: vm.spec.clone(),
        }
    }

    fn view_cloudlet(id: CloudletId, cloudlet: &Cloudlet) -> CloudletView {
        CloudletView {
            id,
            status: cloudlet.status,
            vm: cloudlet.vm,
            spec: cloudlet.spec.clone(),
            exec_start: cloudlet.exec_start,
            finish_time: cloudlet.finish_time,
            finished_length: cloudlet.finished_length,
            submissions: cloudlet.submissions,
        }
    }
}

impl CloudEngine for Datacenter {
    fn host_ids(&self) -> Vec<HostId> {
        self.hosts.keys().copied().collect()
    }

    fn vms_on_host(&self, host: HostId) -> Result<Vec<VmId>, EngineError> {
        if !self.hosts.contains_key(&host) {
            return Err(EngineError::UnknownHost(host));
        }
        Ok(self
            .vms
            .iter()
            .filter(|(_, vm)| vm.host == Some(host) && vm.status != VmStatus::Destroyed)
            .map(|(id, _)| *id)
            .collect())
    }

    fn vm(&self, vm: VmId) -> Option<VmView> {
        self.vms.get(&vm).map(|entry| Self::view_vm(vm, entry))
    }

    fn cloudlets_on_vm(&self, vm: VmId) -> Vec<CloudletView> {
        self.cloudlets
            .iter()
            .filter(|(_, cloudlet)| cloudlet.vm == Some(vm))
            .map(|(id, cloudlet)| Self::view_cloudlet(*id, cloudlet))
            .collect()
    }

    fn submitted_cloudlets(&self) -> Vec<CloudletView> {
        self.cloudlets
            .iter()
            .filter(|(_, cloudlet)| cloudlet.submissions > 0)
            .map(|(id, cloudlet)| Self::view_cloudlet(*id, cloudlet))
            .collect()
    }

    fn cpu_utilization(&self) -> f64 {
        let capacity: f64 = self
            .hosts
            .values()
            .filter(|host| host.is_up())
            .map(Host::capacity_mips)
            .sum();
        if capacity <= 0.0 {
            return 0.0;
        }
        let used: f64 = self.rates().values().sum();
        (used / capacity).clamp(0.0, 1.0)
    }

    fn destroy_vm(&mut self, vm: VmId) -> Result<(), EngineError> {
        let entry = self.vms.get_mut(&vm).ok_or(EngineError::UnknownVm(vm))?;
        if entry.status == VmStatus::Destroyed {
            return Ok(());
        }
        entry.status = VmStatus::Destroyed;
        entry.ready_at = None;
        if let Some(host) = entry.host.and_then(|host| self.hosts.get_mut(&host)) {
            host.release(&entry.spec);
        }
        for cloudlet in self.cloudlets.values_mut() {
            if cloudlet.vm == Some(vm) && cloudlet.is_active() {
                cloudlet.status = CloudletStatus::Failed;
            }
        }
        debug!(target: "faultline::sim::datacenter", vm, "vm destroyed");
        Ok(())
    }

    fn create_vm(&mut self, spec: VmSpec) -> Result<VmId, EngineError> {
        let delay = self.boot_delay.sample(&mut self.rng);
        let ready_at = self.clock + delay;
        self.place(spec, Some(ready_at))
    }

    fn create_cloudlet(&mut self, spec: CloudletSpec) -> Result<CloudletId, EngineError> {
        if let Some(vm) = spec.vm {
            if !self.vms.contains_key(&vm) {
                return Err(EngineError::UnknownVm(vm));
            }
        }
        let id = match spec.id {
            Some(id) if self.cloudlets.contains_key(&id) => {
                return Err(EngineError::DuplicateId(id))
            }
            Some(id) => id,
            None => self.allocate_cloudlet_id(),
        };
        self.cloudlets.insert(
            id,
            Cloudlet {
                vm: spec.vm,
                spec: CloudletSpec {
                    id: Some(id),
                    ..spec
                },
                status: CloudletStatus::Created,
                exec_start: None,
                finish_time: None,
                finished_length: 0.0,
                submissions: 0,
            },
        );
        Ok(id)
    }

    fn submit_cloudlet_batch(&mut self, batch: &[CloudletId]) -> Result<(), EngineError> {
        if let Some(missing) = batch
            .iter()
            .copied()
            .find(|id| !self.cloudlets.contains_key(id))
        {
            return Err(EngineError::UnknownCloudlet(missing));
        }
        let mut load: HashMap<VmId, usize> = HashMap::new();
        for cloudlet in self.cloudlets.values().filter(|c| c.is_active()) {
            if let Some(vm) = cloudlet.vm {
                *load.entry(vm).or_insert(0) += 1;
            }
        }
        for id in batch {
            let (owner, bound) = {
                let cloudlet = &self.cloudlets[id];
                (cloudlet.spec.owner, cloudlet.vm)
            };
            let target = bound
                .filter(|vm| {
                    self.vms
                        .get(vm)
                        .is_some_and(|entry| entry.status != VmStatus::Destroyed)
                })
                .or_else(|| self.least_loaded_vm(owner, &load));
            let cloudlet = self
                .cloudlets
                .get_mut(id)
                .ok_or(EngineError::UnknownCloudlet(*id))?;
            cloudlet.submissions += 1;
            cloudlet.finished_length = 0.0;
            cloudlet.exec_start = None;
            cloudlet.finish_time = None;
            match target {
                Some(vm) => {
                    cloudlet.vm = Some(vm);
                    cloudlet.status = CloudletStatus::Queued;
                    *load.entry(vm).or_insert(0) += 1;
                }
                None => {
                    cloudlet.status = CloudletStatus::FailedResourceUnavailable;
                    debug!(
                        target: "faultline::sim::datacenter",
                        cloudlet = *id,
                        owner,
                        "no usable vm for cloudlet"
                    );
                }
            }
        }
        self.dispatch();
        Ok(())
    }

    fn cancel_cloudlet(&mut self, cloudlet: CloudletId) -> Result<(), EngineError> {
        let entry = self
            .cloudlets
            .get_mut(&cloudlet)
            .ok_or(EngineError::UnknownCloudlet(cloudlet))?;
        if entry.status != CloudletStatus::Finished {
            entry.status = CloudletStatus::Canceled;
        }
        Ok(())
    }

    fn fail_cloudlet(&mut self, cloudlet: CloudletId) -> Result<(), EngineError> {
        let entry = self
            .cloudlets
            .get_mut(&cloudlet)
            .ok_or(EngineError::UnknownCloudlet(cloudlet))?;
        if !matches!(
            entry.status,
            CloudletStatus::Finished | CloudletStatus::FailedResourceUnavailable
        ) {
            entry.status = CloudletStatus::Failed;
        }
        Ok(())
    }
}
