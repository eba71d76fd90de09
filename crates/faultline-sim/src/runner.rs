//! ---
//! fl_section: "11-simulation-test-harness"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Drives one scenario end-to-end and summarizes the run."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use anyhow::{anyhow, Context, Result};
use faultline_common::config::AppConfig;
use faultline_common::time::{hours_to_secs, secs_to_hours, secs_to_minutes};
use faultline_resilience::prelude::*;
use faultline_resilience::{CloudletStatus, ControllerStats, FaultScope};
use faultline_sla::{
    assess, ComplianceInput, ComplianceReport, SlaContract, SlaEvaluator, WorkloadOutcome,
};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::arrivals::ArrivalPlan;
use crate::datacenter::Datacenter;
use crate::scenario::Scenario;
use crate::timeline::FailureTimeline;

/// Aggregate outcome of one run, in report units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub seed: u64,
    pub mean_failures_per_hour: f64,
    pub mean_interarrival_hours: f64,
    pub planned_failures: usize,
    pub host_faults: u64,
    pub vm_faults: u64,
    pub finish_time_hours: f64,
    pub vm_mttr_minutes: Option<f64>,
    pub vm_mtbf_minutes: Option<f64>,
    pub host_mttr_minutes: Option<f64>,
    pub host_mtbf_minutes: Option<f64>,
    pub hosts_down_at_finish: usize,
    pub availability_pct: f64,
    pub peak_cpu_pct: f64,
    pub submitted_cloudlets: usize,
    pub finished_cloudlets: usize,
    pub unfinished_cloudlets: usize,
    pub controller: ControllerStats,
    pub sla_thresholds: IndexMap<String, f64>,
    pub compliance: ComplianceReport,
    pub workloads: Vec<WorkloadOutcome>,
}

/// Runs a configured scenario against a contract.
#[derive(Debug)]
pub struct ScenarioRunner {
    config: AppConfig,
    contract: SlaContract,
    metrics: Option<ReactiveMetrics>,
}

impl ScenarioRunner {
    pub fn new(config: AppConfig, contract: SlaContract) -> Self {
        Self {
            config,
            contract,
            metrics: None,
        }
    }

    /// Instrument the controller of every run with `metrics`.
    pub fn with_metrics(mut self, metrics: ReactiveMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Build the scenario, plan failures with the injector, and execute.
    pub fn run(&self) -> Result<RunSummary> {
        self.config.validate().context("run configuration rejected")?;
        let scenario = Scenario::build(&self.config.scenario, self.config.injector.seed)?;
        let mut injector = FailureInjector::new(&self.config.injector)
            .context("failure injector rejected its configuration")?;
        let mut timeline = FailureTimeline::new();
        let planned = injector.schedule_into(&scenario.datacenter.host_ids(), 0.0, &mut timeline);
        info!(
            target: "faultline::sim::runner",
            planned,
            mean_failures_per_hour = injector.mean_failures_per_hour(),
            mean_interarrival_hours = injector.mean_interarrival_hours(),
            "failure timeline ready"
        );
        self.execute(scenario, timeline)
    }

    /// Execute `scenario` against an explicit failure timeline.
    ///
    /// Each step moves the clock to the next instant, delivers host repairs,
    /// then host faults in schedule order, then VM starts, then arrivals, and
    /// finally ticks the controller.
    pub fn execute(&self, scenario: Scenario, mut timeline: FailureTimeline) -> Result<RunSummary> {
        let Scenario {
            mut datacenter,
            owner,
            cloudlets,
            ..
        } = scenario;
        let end = hours_to_secs(self.config.end_time_hours());
        let max_tick = self.config.scenario.max_tick_secs;
        if !(max_tick > 0.0) {
            return Err(anyhow!("max_tick_secs must be positive, got {max_tick}"));
        }
        let planned_failures = timeline.len();

        let evaluator = SlaEvaluator::new(self.contract.clone());
        let mut controller =
            ReactiveController::new(&self.config.controller, evaluator, self.metrics.clone())?;
        if self.config.controller.clone_on_host_fault {
            controller.register_cloner(owner, Box::new(SimpleVmCloner));
        }
        let mut arrivals = ArrivalPlan::new(
            &self.config.arrivals,
            &self.config.scenario,
            owner,
            self.config.injector.seed.wrapping_add(1),
        )?;

        controller.start_run(0.0);
        datacenter.submit_cloudlet_batch(&cloudlets)?;
        let mut peak_cpu = datacenter.cpu_utilization();
        let mut now = 0.0_f64;

        loop {
            let next = [
                timeline.peek_time(),
                datacenter.next_internal_event(),
                arrivals.next_time(),
                Some(controller.next_scan_at()),
                Some(now + max_tick),
            ]
            .into_iter()
            .flatten()
            .fold(end, f64::min)
            .max(now);

            let (repairs, starts): (Vec<SimEvent>, Vec<SimEvent>) = datacenter
                .advance_to(next)
                .into_iter()
                .partition(|event| matches!(event, SimEvent::HostRepaired { .. }));
            now = next;

            // A host repaired at this instant may fail again right away.
            for event in &repairs {
                controller.on_event(event, &mut datacenter)?;
            }

            while let Some(failure) = timeline.pop_due(now) {
                match datacenter.host_down_since(failure.target_host)? {
                    None => {
                        datacenter.fail_host(failure.target_host, now)?;
                    }
                    // A second signal for the same instant still reaches the controller.
                    Some(since) if since == now => {}
                    Some(since) => {
                        debug!(
                            target: "faultline::sim::runner",
                            host = failure.target_host,
                            down_since = since,
                            "failure skipped, host already down"
                        );
                        continue;
                    }
                }
                controller.on_event(&SimEvent::HostFault(failure), &mut datacenter)?;
            }

            for event in &starts {
                controller.on_event(event, &mut datacenter)?;
            }

            for batch in arrivals.take_due(now) {
                let mut ids = Vec::with_capacity(batch.specs.len());
                for spec in batch.specs {
                    ids.push(datacenter.create_cloudlet(spec)?);
                }
                datacenter.submit_cloudlet_batch(&ids)?;
                info!(
                    target: "faultline::sim::runner",
                    now,
                    cloudlets = ids.len(),
                    "dynamic cloudlets submitted"
                );
            }

            controller.on_clock_tick(now, &mut datacenter)?;
            peak_cpu = peak_cpu.max(datacenter.cpu_utilization());

            if now >= end {
                info!(target: "faultline::sim::runner", now, "end time reached");
                break;
            }
            if arrivals.is_empty()
                && !datacenter.has_booting_vms()
                && workload_settled(&datacenter, &controller)
            {
                info!(target: "faultline::sim::runner", now, "all work settled");
                break;
            }
        }

        Ok(self.summarize(&datacenter, &controller, now, peak_cpu, planned_failures))
    }

    fn summarize(
        &self,
        datacenter: &Datacenter,
        controller: &ReactiveController,
        finish: f64,
        peak_cpu: f64,
        planned_failures: usize,
    ) -> RunSummary {
        let aggregator = controller.aggregator();
        let availability_pct = aggregator.availability(finish) * 100.0;
        let peak_cpu_pct = peak_cpu * 100.0;
        let workloads: Vec<WorkloadOutcome> = datacenter
            .finished_cloudlets()
            .iter()
            .filter_map(|cloudlet| {
                Some(WorkloadOutcome {
                    id: cloudlet.id,
                    exec_start: cloudlet.exec_start?,
                    finish: cloudlet.finish_time?,
                })
            })
            .collect();
        let compliance = assess(
            controller.evaluator(),
            &ComplianceInput {
                total_faults: aggregator.total_faults(),
                availability_pct,
                peak_cpu_pct,
                workloads: &workloads,
            },
        );
        let submitted = datacenter.submitted_cloudlets();
        // Superseded originals are canceled; their clones carry the work.
        let unfinished = submitted
            .iter()
            .filter(|cloudlet| {
                !matches!(
                    cloudlet.status,
                    CloudletStatus::Finished | CloudletStatus::Canceled
                )
            })
            .count();
        let rate = self.config.injector.mean_failures_per_hour;

        RunSummary {
            seed: self.config.injector.seed,
            mean_failures_per_hour: rate,
            mean_interarrival_hours: 1.0 / rate,
            planned_failures,
            host_faults: aggregator.host_faults(),
            vm_faults: aggregator.vm_faults(),
            finish_time_hours: secs_to_hours(finish),
            vm_mttr_minutes: aggregator.mttr(FaultScope::Vm).map(secs_to_minutes),
            vm_mtbf_minutes: aggregator.mtbf(FaultScope::Vm, finish).map(secs_to_minutes),
            host_mttr_minutes: aggregator.mttr(FaultScope::Host).map(secs_to_minutes),
            host_mtbf_minutes: aggregator.mtbf(FaultScope::Host, finish).map(secs_to_minutes),
            hosts_down_at_finish: aggregator.open_faults(FaultScope::Host),
            availability_pct,
            peak_cpu_pct,
            submitted_cloudlets: submitted.len(),
            finished_cloudlets: workloads.len(),
            unfinished_cloudlets: unfinished,
            controller: controller.stats(),
            sla_thresholds: controller.evaluator().contract().thresholds(),
            compliance,
            workloads,
        }
    }
}

/// Every submitted cloudlet finished, was superseded, or was given up on.
fn workload_settled(datacenter: &Datacenter, controller: &ReactiveController) -> bool {
    datacenter
        .submitted_cloudlets()
        .iter()
        .all(|cloudlet| match cloudlet.status {
            CloudletStatus::Finished | CloudletStatus::Canceled => true,
            status if status.is_failed() => controller.is_abandoned(cloudlet.id),
            _ => false,
        })
}

