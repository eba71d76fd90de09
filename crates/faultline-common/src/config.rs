//! ---
//! fl_section: "01-core-functionality"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Shared primitives and utilities for the reactive runtime."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::LogFormat;

fn default_hosts() -> usize {
    10
}

fn default_host_pes() -> u32 {
    4
}

fn default_host_mips_per_pe() -> f64 {
    1000.0
}

fn default_host_ram() -> u64 {
    500_000
}

fn default_host_bw() -> u64 {
    100_000_000
}

fn default_host_storage() -> u64 {
    1_000_000
}

fn default_vms() -> usize {
    2
}

fn default_vm_pes() -> u32 {
    2
}

fn default_vm_mips() -> f64 {
    1000.0
}

fn default_vm_ram() -> u64 {
    10_000
}

fn default_vm_bw() -> u64 {
    100_000
}

fn default_vm_size() -> u64 {
    1000
}

fn default_cloudlets() -> usize {
    6
}

fn default_cloudlet_pes() -> u32 {
    2
}

fn default_cloudlet_length() -> u64 {
    2_800_000_000
}

fn default_cloudlet_file_size() -> u64 {
    300
}

fn default_cloudlet_cpu_utilization() -> f64 {
    1.0
}

fn default_max_vm_recovery_secs() -> f64 {
    450.0
}

fn default_host_repair_hours() -> Option<f64> {
    Some(1.0)
}

fn default_max_tick_secs() -> f64 {
    60.0
}

fn default_mean_failures_per_hour() -> f64 {
    0.01
}

fn default_injector_seed() -> u64 {
    112_717_613
}

fn default_max_time_to_fail_hours() -> f64 {
    800.0
}

fn default_control_interval_secs() -> f64 {
    5.0
}

fn default_max_resubmissions() -> u32 {
    3
}

fn default_clone_on_host_fault() -> bool {
    true
}

fn default_contract_path() -> PathBuf {
    PathBuf::from("configs/CustomerSLA.json")
}

fn default_arrival_pes() -> u32 {
    2
}

/// Primary configuration object for a reactive recovery run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scenario: ScenarioConfig,
    #[serde(default)]
    pub injector: InjectorConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub sla: SlaConfig,
    #[serde(default)]
    pub arrivals: Vec<ArrivalConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "FAULTLINE_CONFIG";

    /// Load configuration from disk, respecting the `FAULTLINE_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Simulated end of the run in hours; defaults to the failure horizon.
    pub fn end_time_hours(&self) -> f64 {
        self.scenario
            .end_time_hours
            .unwrap_or(self.injector.max_time_to_fail_hours)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.scenario.validate()?;
        self.injector.validate()?;
        self.controller.validate()?;
        for (index, arrival) in self.arrivals.iter().enumerate() {
            arrival.validate(index)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Datacenter, VM fleet, and workload profile of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default = "default_hosts")]
    pub hosts: usize,
    #[serde(default = "default_host_pes")]
    pub host_pes: u32,
    #[serde(default = "default_host_mips_per_pe")]
    pub host_mips_per_pe: f64,
    #[serde(default = "default_host_ram")]
    pub host_ram: u64,
    #[serde(default = "default_host_bw")]
    pub host_bw: u64,
    #[serde(default = "default_host_storage")]
    pub host_storage: u64,
    #[serde(default = "default_vms")]
    pub vms: usize,
    #[serde(default = "default_vm_pes")]
    pub vm_pes: u32,
    #[serde(default = "default_vm_mips")]
    pub vm_mips: f64,
    #[serde(default = "default_vm_ram")]
    pub vm_ram: u64,
    #[serde(default = "default_vm_bw")]
    pub vm_bw: u64,
    #[serde(default = "default_vm_size")]
    pub vm_size: u64,
    #[serde(default = "default_cloudlets")]
    pub cloudlets: usize,
    #[serde(default = "default_cloudlet_pes")]
    pub cloudlet_pes: u32,
    #[serde(default = "default_cloudlet_length")]
    pub cloudlet_length: u64,
    #[serde(default = "default_cloudlet_file_size")]
    pub cloudlet_file_size: u64,
    #[serde(default = "default_cloudlet_file_size")]
    pub cloudlet_output_size: u64,
    /// Fraction of a PE each cloudlet keeps busy (1.0 = full utilization).
    #[serde(default = "default_cloudlet_cpu_utilization")]
    pub cloudlet_cpu_utilization: f64,
    /// Upper bound of the uniformly sampled boot delay for VMs created mid-run.
    #[serde(default = "default_max_vm_recovery_secs")]
    pub max_vm_recovery_secs: f64,
    /// Time until a failed host rejoins the pool; `None` keeps it down for the run.
    #[serde(default = "default_host_repair_hours")]
    pub host_repair_hours: Option<f64>,
    #[serde(default = "default_max_tick_secs")]
    pub max_tick_secs: f64,
    #[serde(default)]
    pub end_time_hours: Option<f64>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            host_pes: default_host_pes(),
            host_mips_per_pe: default_host_mips_per_pe(),
            host_ram: default_host_ram(),
            host_bw: default_host_bw(),
            host_storage: default_host_storage(),
            vms: default_vms(),
            vm_pes: default_vm_pes(),
            vm_mips: default_vm_mips(),
            vm_ram: default_vm_ram(),
            vm_bw: default_vm_bw(),
            vm_size: default_vm_size(),
            cloudlets: default_cloudlets(),
            cloudlet_pes: default_cloudlet_pes(),
            cloudlet_length: default_cloudlet_length(),
            cloudlet_file_size: default_cloudlet_file_size(),
            cloudlet_output_size: default_cloudlet_file_size(),
            cloudlet_cpu_utilization: default_cloudlet_cpu_utilization(),
            max_vm_recovery_secs: default_max_vm_recovery_secs(),
            host_repair_hours: default_host_repair_hours(),
            max_tick_secs: default_max_tick_secs(),
            end_time_hours: None,
        }
    }
}

impl ScenarioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hosts == 0 {
            return Err(anyhow!("scenario must declare at least one host"));
        }
        if self.vms == 0 {
            return Err(anyhow!("scenario must declare at least one vm"));
        }
        if self.host_pes == 0 || self.vm_pes == 0 || self.cloudlet_pes == 0 {
            return Err(anyhow!("host, vm, and cloudlet PE counts must be positive"));
        }
        if self.host_mips_per_pe <= 0.0 || self.vm_mips <= 0.0 {
            return Err(anyhow!("processing rates must be positive"));
        }
        let fits = self.vm_pes <= self.host_pes
            && self.vm_mips <= self.host_mips_per_pe
            && self.vm_ram <= self.host_ram
            && self.vm_bw <= self.host_bw
            && self.vm_size <= self.host_storage;
        if !fits {
            return Err(anyhow!(
                "vm profile ({} PEs, {} MIPS, {} RAM) does not fit on a host ({} PEs, {} MIPS, {} RAM)",
                self.vm_pes,
                self.vm_mips,
                self.vm_ram,
                self.host_pes,
                self.host_mips_per_pe,
                self.host_ram
            ));
        }
        if !(self.cloudlet_cpu_utilization > 0.0 && self.cloudlet_cpu_utilization <= 1.0) {
            return Err(anyhow!(
                "cloudlet_cpu_utilization must be within (0, 1], got {}",
                self.cloudlet_cpu_utilization
            ));
        }
        if self.max_vm_recovery_secs < 1.0 {
            return Err(anyhow!("max_vm_recovery_secs must be at least 1 second"));
        }
        if matches!(self.host_repair_hours, Some(hours) if hours <= 0.0) {
            return Err(anyhow!("host_repair_hours must be positive when set"));
        }
        if self.max_tick_secs <= 0.0 {
            return Err(anyhow!("max_tick_secs must be positive"));
        }
        if matches!(self.end_time_hours, Some(hours) if hours <= 0.0) {
            return Err(anyhow!("end_time_hours must be positive when set"));
        }
        Ok(())
    }
}

/// Relative weight used when choosing which host a failure lands on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetWeight {
    pub host: u64,
    pub weight: f64,
}

/// Stochastic host failure process parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectorConfig {
    /// Poisson event rate: expected failures per simulated hour.
    #[serde(default = "default_mean_failures_per_hour")]
    pub mean_failures_per_hour: f64,
    #[serde(default = "default_injector_seed")]
    pub seed: u64,
    #[serde(default = "default_max_time_to_fail_hours")]
    pub max_time_to_fail_hours: f64,
    /// Empty means every host is equally likely to fail.
    #[serde(default)]
    pub target_weights: Vec<TargetWeight>,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            mean_failures_per_hour: default_mean_failures_per_hour(),
            seed: default_injector_seed(),
            max_time_to_fail_hours: default_max_time_to_fail_hours(),
            target_weights: Vec::new(),
        }
    }
}

impl InjectorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.mean_failures_per_hour > 0.0 && self.mean_failures_per_hour.is_finite()) {
            return Err(anyhow!(
                "mean_failures_per_hour must be a positive finite rate, got {}",
                self.mean_failures_per_hour
            ));
        }
        if self.max_time_to_fail_hours <= 0.0 {
            return Err(anyhow!("max_time_to_fail_hours must be positive"));
        }
        if let Some(bad) = self
            .target_weights
            .iter()
            .find(|entry| !(entry.weight >= 0.0 && entry.weight.is_finite()))
        {
            return Err(anyhow!(
                "target weight for host {} must be a non-negative number",
                bad.host
            ));
        }
        Ok(())
    }
}

/// Reactive controller tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Period of the failed-cloudlet resubmission scan, in simulated seconds.
    #[serde(default = "default_control_interval_secs")]
    pub control_interval_secs: f64,
    /// Resubmissions allowed per cloudlet before it is abandoned.
    #[serde(default = "default_max_resubmissions")]
    pub max_resubmissions: u32,
    #[serde(default = "default_clone_on_host_fault")]
    pub clone_on_host_fault: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            control_interval_secs: default_control_interval_secs(),
            max_resubmissions: default_max_resubmissions(),
            clone_on_host_fault: default_clone_on_host_fault(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.control_interval_secs <= 0.0 {
            return Err(anyhow!("control_interval_secs must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaConfig {
    #[serde(default = "default_contract_path")]
    pub contract: PathBuf,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            contract: default_contract_path(),
        }
    }
}

/// A batch of cloudlets submitted while the simulation is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrivalConfig {
    pub at_secs: f64,
    pub count: usize,
    #[serde(default = "default_arrival_pes")]
    pub pes: u32,
    pub length_mean: f64,
    #[serde(default)]
    pub length_std_dev: f64,
}

impl ArrivalConfig {
    pub fn validate(&self, index: usize) -> Result<()> {
        if self.at_secs < 0.0 {
            return Err(anyhow!("arrival #{} must not be scheduled before 0", index));
        }
        if self.pes == 0 || self.length_mean <= 0.0 {
            return Err(anyhow!(
                "arrival #{} needs positive PEs and a positive mean length",
                index
            ));
        }
        if self.length_std_dev < 0.0 {
            return Err(anyhow!(
                "arrival #{} length_std_dev must not be negative",
                index
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling JSON log file; console only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Write the Prometheus registry in text format here when the run ends.
    #[serde(default)]
    pub export_path: Option<PathBuf>,
}
