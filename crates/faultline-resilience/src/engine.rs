//! ---
//! fl_section: "07-resilience-fault-tolerance"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Engine seam between the reactive core and the simulator."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
//! The operation set the reactive core is allowed to use on a simulation
//! engine, plus the subscription interface the engine drives.
//!
//! The engine owns every host, VM, and cloudlet. The core reads through the
//! query methods and mutates only through the operations of [`CloudEngine`].

use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::injector::FailureEvent;

/// Physical host identifier.
pub type HostId = u64;
/// Virtual machine identifier.
pub type VmId = u64;
/// Cloudlet identifier.
pub type CloudletId = u64;
/// Identifier of the broker (customer) owning VMs and cloudlets.
pub type OwnerId = u64;

/// Capacity profile of a VM to create.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmSpec {
    /// Explicit identifier; the engine assigns one when `None`.
    pub id: Option<VmId>,
    /// Owning broker.
    pub owner: OwnerId,
    /// Processing rate per PE.
    pub mips: f64,
    /// Number of processing elements.
    pub pes: u32,
    /// Memory.
    pub ram: u64,
    /// Bandwidth.
    pub bw: u64,
    /// Image size.
    pub storage: u64,
    /// Free-form label carried into logs.
    pub description: Option<String>,
}

/// Lifecycle of a VM inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    /// Placed, waiting for its boot delay to elapse.
    Booting,
    /// Executing cloudlets.
    Running,
    /// Destroyed; never resumable.
    Destroyed,
}

/// Read-only view of a VM.
#[derive(Debug, Clone, PartialEq)]
pub struct VmView {
    /// Identifier.
    pub id: VmId,
    /// Host currently carrying the VM, if placed.
    pub host: Option<HostId>,
    /// Lifecycle state.
    pub status: VmStatus,
    /// Capacity profile the VM was created with.
    pub spec: VmSpec,
}

/// Fraction of each resource a cloudlet keeps busy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UtilizationProfile {
    /// CPU share in `(0, 1]`.
    pub cpu: f64,
    /// RAM share in `[0, 1]`.
    pub ram: f64,
    /// Bandwidth share in `[0, 1]`.
    pub bw: f64,
}

impl UtilizationProfile {
    /// Constant CPU share with idle RAM and bandwidth.
    pub fn cpu_only(cpu: f64) -> Self {
        Self {
            cpu,
            ram: 0.0,
            bw: 0.0,
        }
    }
}

impl Default for UtilizationProfile {
    fn default() -> Self {
        Self::cpu_only(1.0)
    }
}

/// Description of a cloudlet to create.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloudletSpec {
    /// Explicit identifier; the engine assigns one when `None`.
    pub id: Option<CloudletId>,
    /// Owning broker.
    pub owner: OwnerId,
    /// Length in million instructions.
    pub length: u64,
    /// Processing elements requested.
    pub pes: u32,
    /// Input file size.
    pub file_size: u64,
    /// Output file size.
    pub output_size: u64,
    /// Resource utilization profile.
    pub utilization: UtilizationProfile,
    /// VM binding; unbound cloudlets go to the owner's first usable VM.
    pub vm: Option<VmId>,
}

/// Lifecycle of a cloudlet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudletStatus {
    /// Created but never submitted.
    Created,
    /// Submitted, waiting for its VM to run.
    Queued,
    /// Executing.
    Running,
    /// Completed all its length.
    Finished,
    /// Lost its VM while executing.
    Failed,
    /// Submitted while no usable VM existed.
    FailedResourceUnavailable,
    /// Superseded or withdrawn.
    Canceled,
}

impl CloudletStatus {
    /// Statuses picked up by the resubmission scan.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            CloudletStatus::Failed | CloudletStatus::FailedResourceUnavailable
        )
    }

    /// Statuses that never change again without an explicit resubmission.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            CloudletStatus::Finished
                | CloudletStatus::Failed
                | CloudletStatus::FailedResourceUnavailable
                | CloudletStatus::Canceled
        )
    }

    /// Static label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudletStatus::Created => "created",
            CloudletStatus::Queued => "queued",
            CloudletStatus::Running => "running",
            CloudletStatus::Finished => "finished",
            CloudletStatus::Failed => "failed",
            CloudletStatus::FailedResourceUnavailable => "failed_resource_unavailable",
            CloudletStatus::Canceled => "canceled",
        }
    }
}

/// Read-only view of a cloudlet.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudletView {
    /// Identifier.
    pub id: CloudletId,
    /// Lifecycle state.
    pub status: CloudletStatus,
    /// VM the cloudlet is bound to.
    pub vm: Option<VmId>,
    /// Specification it was created with.
    pub spec: CloudletSpec,
    /// Time the current execution started.
    pub exec_start: Option<f64>,
    /// Time the cloudlet finished.
    pub finish_time: Option<f64>,
    /// Million instructions executed in the current submission.
    pub finished_length: f64,
    /// Number of times the cloudlet was submitted.
    pub submissions: u32,
}

/// Operations the reactive core may perform on the simulation engine.
///
/// Every mutating operation is synchronous and returns once the engine state
/// reflects it.
pub trait CloudEngine {
    /// Every host of the datacenter, failed or not, in creation order.
    fn host_ids(&self) -> Vec<HostId>;

    /// VMs currently placed on `host` and not destroyed.
    fn vms_on_host(&self, host: HostId) -> std::result::Result<Vec<VmId>, EngineError>;

    /// View of one VM.
    fn vm(&self, vm: VmId) -> Option<VmView>;

    /// Cloudlets bound to `vm`, in creation order.
    fn cloudlets_on_vm(&self, vm: VmId) -> Vec<CloudletView>;

    /// Every cloudlet submitted at least once, in creation order.
    fn submitted_cloudlets(&self) -> Vec<CloudletView>;

    /// Datacenter CPU utilization in `[0, 1]`.
    fn cpu_utilization(&self) -> f64;

    /// Destroy a VM. Its unfinished cloudlets become [`CloudletStatus::Failed`].
    fn destroy_vm(&mut self, vm: VmId) -> std::result::Result<(), EngineError>;

    /// Place a new VM and return its identifier.
    fn create_vm(&mut self, spec: VmSpec) -> std::result::Result<VmId, EngineError>;

    /// Register a cloudlet without submitting it.
    fn create_cloudlet(&mut self, spec: CloudletSpec) -> std::result::Result<CloudletId, EngineError>;

    /// Submit cloudlets as one batch. Execution state restarts from zero.
    fn submit_cloudlet_batch(&mut self, batch: &[CloudletId]) -> std::result::Result<(), EngineError>;

    /// Withdraw a cloudlet superseded by a clone.
    fn cancel_cloudlet(&mut self, cloudlet: CloudletId) -> std::result::Result<(), EngineError>;

    /// Mark a cloudlet permanently failed.
    fn fail_cloudlet(&mut self, cloudlet: CloudletId) -> std::result::Result<(), EngineError>;
}

/// Event pushed by the engine to its listener.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// A scheduled host failure was delivered.
    HostFault(FailureEvent),
    /// A VM finished booting.
    VmStarted {
        /// VM that became usable.
        vm: VmId,
        /// Delivery time.
        time: f64,
    },
    /// A failed host rejoined the pool.
    HostRepaired {
        /// Host that was repaired.
        host: HostId,
        /// Delivery time.
        time: f64,
    },
}

impl SimEvent {
    /// Simulated time the event belongs to.
    pub fn time(&self) -> f64 {
        match self {
            SimEvent::HostFault(event) => event.time,
            SimEvent::VmStarted { time, .. } | SimEvent::HostRepaired { time, .. } => *time,
        }
    }
}

/// Subscription interface the engine drives on its single control thread.
pub trait SimulationListener {
    /// Called for each event, before the clock tick of the same instant.
    fn on_event(&mut self, event: &SimEvent, engine: &mut dyn CloudEngine) -> Result<()>;

    /// Called once per advancing simulated time value.
    fn on_clock_tick(&mut self, now: f64, engine: &mut dyn CloudEngine) -> Result<()>;
}
