//! ---
//! fl_section: "11-simulation-test-harness"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Builds the datacenter, VM fleet, and initial workload."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use faultline_common::config::ScenarioConfig;
use faultline_common::time::hours_to_secs;
use faultline_resilience::{
    CloudEngine, CloudletId, CloudletSpec, OwnerId, UtilizationProfile, VmId, VmSpec,
};
use tracing::info;

use crate::datacenter::{Datacenter, DatacenterConfig, HostSpec};

/// Owner of every VM and cloudlet in a scenario.
pub const BROKER_ID: OwnerId = 1;

/// A provisioned datacenter with its initial workload created but not submitted.
#[derive(Debug)]
pub struct Scenario {
    pub datacenter: Datacenter,
    pub owner: OwnerId,
    pub vms: Vec<VmId>,
    pub cloudlets: Vec<CloudletId>,
}

impl Scenario {
    /// Hosts, VMs, and cloudlets are numbered from 1; cloudlets are bound
    /// to VMs round-robin.
    pub fn build(config: &ScenarioConfig, seed: u64) -> Result<Self> {
        config.validate().context("scenario configuration rejected")?;
        let mut datacenter = Datacenter::new(DatacenterConfig {
            max_vm_recovery_secs: config.max_vm_recovery_secs,
            host_repair_secs: config.host_repair_hours.map(hours_to_secs),
            seed,
        });
        for _ in 0..config.hosts {
            datacenter.add_host(HostSpec {
                pes: config.host_pes,
                mips_per_pe: config.host_mips_per_pe,
                ram: config.host_ram,
                bw: config.host_bw,
                storage: config.host_storage,
            });
        }

        let mut vms = Vec::with_capacity(config.vms);
        for index in 0..config.vms {
            let id = index as VmId + 1;
            let vm = datacenter
                .provision_vm(VmSpec {
                    id: Some(id),
                    owner: BROKER_ID,
                    mips: config.vm_mips,
                    pes: config.vm_pes,
                    ram: config.vm_ram,
                    bw: config.vm_bw,
                    storage: config.vm_size,
                    description: None,
                })
                .with_context(|| format!("vm {id} does not fit in the datacenter"))?;
            vms.push(vm);
        }

        let mut cloudlets = Vec::with_capacity(config.cloudlets);
        for index in 0..config.cloudlets {
            let id = index as CloudletId + 1;
            let cloudlet = datacenter
                .create_cloudlet(CloudletSpec {
                    id: Some(id),
                    owner: BROKER_ID,
                    length: config.cloudlet_length,
                    pes: config.cloudlet_pes,
                    file_size: config.cloudlet_file_size,
                    output_size: config.cloudlet_output_size,
                    utilization: UtilizationProfile::cpu_only(config.cloudlet_cpu_utilization),
                    vm: Some(vms[index % vms.len()]),
                })
                .with_context(|| format!("cloudlet {id} could not be created"))?;
            cloudlets.push(cloudlet);
        }

        info!(
            target: "faultline::sim::scenario",
            hosts = config.hosts,
            vms = vms.len(),
            cloudlets = cloudlets.len(),
            "scenario provisioned"
        );
        Ok(Self {
            datacenter,
            owner: BROKER_ID,
            vms,
            cloudlets,
        })
    }
}
