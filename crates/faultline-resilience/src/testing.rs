//! ---
//! fl_section: "07-resilience-fault-tolerance"
//! fl_subsection: "tests"
//! fl_type: "test"
//! fl_scope: "code"
//! fl_description: "Scripted in-memory engine for unit tests."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use indexmap::IndexMap;

use crate::engine::{
    CloudEngine, CloudletId, CloudletSpec, CloudletStatus, CloudletView, HostId, VmId, VmSpec,
    VmStatus, VmView,
};
use crate::error::EngineError;

/// Engine double with explicit state; no time advancement.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    pub hosts: Vec<HostId>,
    pub vms: IndexMap<VmId, VmView>,
    pub cloudlets: IndexMap<CloudletId, CloudletView>,
    /// Remaining VM placements before `NoCapacity`; `None` is unlimited.
    pub vm_slots: Option<usize>,
    /// Host given to newly created VMs.
    pub spare_host: HostId,
    /// Every batch handed to `submit_cloudlet_batch`.
    pub batches: Vec<Vec<CloudletId>>,
    /// List a VM on its host even after destruction.
    pub sticky_vms: bool,
    next_id: u64,
}

impl ScriptedEngine {
    pub fn new(hosts: &[HostId]) -> Self {
        Self {
            hosts: hosts.to_vec(),
            spare_host: hosts.last().copied().unwrap_or_default(),
            next_id: 1_000,
            ..Default::default()
        }
    }

    pub fn vm_spec(owner: u64) -> VmSpec {
        VmSpec {
            id: None,
            owner,
            mips: 1_000.0,
            pes: 2,
            ram: 10_000,
            bw: 100_000,
            storage: 1_000,
            description: None,
        }
    }

    pub fn cloudlet_spec(owner: u64, vm: VmId) -> CloudletSpec {
        CloudletSpec {
            id: None,
            owner,
            length: 10_000,
            pes: 2,
            file_size: 300,
            output_size: 300,
            utilization: Default::default(),
            vm: Some(vm),
        }
    }

    /// Insert a running VM on `host`.
    pub fn add_vm(&mut self, id: VmId, host: HostId, owner: u64) {
        let spec = VmSpec {
            id: Some(id),
            ..Self::vm_spec(owner)
        };
        self.vms.insert(
            id,
            VmView {
                id,
                host: Some(host),
                status: VmStatus::Running,
                spec,
            },
        );
    }

    /// Insert a submitted cloudlet in `status` bound to `vm`.
    pub fn add_cloudlet(&mut self, id: CloudletId, vm: VmId, status: CloudletStatus) {
        let owner = self.vms.get(&vm).map(|view| view.spec.owner).unwrap_or(0);
        let spec = CloudletSpec {
            id: Some(id),
            ..Self::cloudlet_spec(owner, vm)
        };
        self.cloudlets.insert(
            id,
            CloudletView {
                id,
                status,
                vm: Some(vm),
                spec,
                exec_start: Some(0.0),
                finish_time: None,
                finished_length: 5_000.0,
                submissions: 1,
            },
        );
    }

    pub fn status(&self, id: CloudletId) -> CloudletStatus {
        self.cloudlets[&id].status
    }

    pub fn set_status(&mut self, id: CloudletId, status: CloudletStatus) {
        if let Some(view) = self.cloudlets.get_mut(&id) {
            view.status = status;
        }
    }

    fn allocate_id(&mut self, requested: Option<u64>, taken: bool) -> Result<u64, EngineError> {
        match requested {
            Some(id) if taken => Err(EngineError::DuplicateId(id)),
            Some(id) => Ok(id),
            None => {
                self.next_id += 1;
                Ok(self.next_id)
            }
        }
    }
}

impl CloudEngine for ScriptedEngine {
    fn host_ids(&self) -> Vec<HostId> {
        self.hosts.clone()
    }

    fn vms_on_host(&self, host: HostId) -> Result<Vec<VmId>, EngineError> {
        if !self.hosts.contains(&host) {
            return Err(EngineError::UnknownHost(host));
        }
        Ok(self
            .vms
            .values()
            .filter(|vm| vm.host == Some(host))
            .filter(|vm| self.sticky_vms || vm.status != VmStatus::Destroyed)
            .map(|vm| vm.id)
            .collect())
    }

    fn vm(&self, vm: VmId) -> Option<VmView> {
        self.vms.get(&vm).cloned()
    }

    fn cloudlets_on_vm(&self, vm: VmId) -> Vec<CloudletView> {
        self.cloudlets
            .values()
            .filter(|cloudlet| cloudlet.vm == Some(vm))
            .cloned()
            .collect()
    }

    fn submitted_cloudlets(&self) -> Vec<CloudletView> {
        self.cloudlets
            .values()
            .filter(|cloudlet| cloudlet.submissions > 0)
            .cloned()
            .collect()
    }

    fn cpu_utilization(&self) -> f64 {
        0.0
    }

    fn destroy_vm(&mut self, vm: VmId) -> Result<(), EngineError> {
        let view = self.vms.get_mut(&vm).ok_or(EngineError::UnknownVm(vm))?;
        view.status = VmStatus::Destroyed;
        for cloudlet in self.cloudlets.values_mut() {
            if cloudlet.vm == Some(vm) && !cloudlet.status.is_settled() {
                cloudlet.status = CloudletStatus::Failed;
            }
        }
        Ok(())
    }

    fn create_vm(&mut self, spec: VmSpec) -> Result<VmId, EngineError> {
        let taken = spec.id.map(|id| self.vms.contains_key(&id)).unwrap_or(false);
        let id = self.allocate_id(spec.id, taken)?;
        if let Some(slots) = self.vm_slots.as_mut() {
            if *slots == 0 {
                return Err(EngineError::NoCapacity {
                    vm: id,
                    pes: spec.pes,
                    ram: spec.ram,
                });
            }
            *slots -= 1;
        }
        self.vms.insert(
            id,
            VmView {
                id,
                host: Some(self.spare_host),
                status: VmStatus::Booting,
                spec: VmSpec { id: Some(id), ..spec },
            },
        );
        Ok(id)
    }

    fn create_cloudlet(&mut self, spec: CloudletSpec) -> Result<CloudletId, EngineError> {
        let taken = spec
            .id
            .map(|id| self.cloudlets.contains_key(&id))
            .unwrap_or(false);
        let id = self.allocate_id(spec.id, taken)?;
        self.cloudlets.insert(
            id,
            CloudletView {
                id,
                status: CloudletStatus::Created,
                vm: spec.vm,
                spec: CloudletSpec { id: Some(id), ..spec },
                exec_start: None,
                finish_time: None,
                finished_length: 0.0,
                submissions: 0,
            },
        );
        Ok(id)
    }

    fn submit_cloudlet_batch(&mut self, batch: &[CloudletId]) -> Result<(), EngineError> {
        for id in batch {
            let view = self
                .cloudlets
                .get_mut(id)
                .ok_or(EngineError::UnknownCloudlet(*id))?;
            view.status = CloudletStatus::Queued;
            view.finished_length = 0.0;
            view.exec_start = None;
            view.submissions += 1;
        }
        self.batches.push(batch.to_vec());
        Ok(())
    }

    fn cancel_cloudlet(&mut self, cloudlet: CloudletId) -> Result<(), EngineError> {
        let view = self
            .cloudlets
            .get_mut(&cloudlet)
            .ok_or(EngineError::UnknownCloudlet(cloudlet))?;
        view.status = CloudletStatus::Canceled;
        Ok(())
    }

    fn fail_cloudlet(&mut self, cloudlet: CloudletId) -> Result<(), EngineError> {
        let view = self
            .cloudlets
            .get_mut(&cloudlet)
            .ok_or(EngineError::UnknownCloudlet(cloudlet))?;
        if view.status != CloudletStatus::FailedResourceUnavailable {
            view.status = CloudletStatus::Failed;
        }
        Ok(())
    }
}
