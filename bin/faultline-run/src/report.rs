//! ---
//! fl_section: "01-core-functionality"
//! fl_subsection: "binary"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Human-readable and JSON run reports."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use std::fmt::{self, Write};

use anyhow::{Context, Result};
use faultline_sim::RunSummary;
use faultline_sla::MetricCheck;

fn minutes(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2} minutes"))
}

fn check(value: MetricCheck) -> &'static str {
    match value {
        MetricCheck::NotEvaluated => "not evaluated",
        MetricCheck::Compliant => "compliant",
        MetricCheck::Violated => "VIOLATED",
    }
}

/// Plain-text report printed at the end of a run.
pub fn render_text(summary: &RunSummary) -> Result<String> {
    let mut out = String::new();
    write_text(&mut out, summary).context("failed to format run report")?;
    Ok(out)
}

fn write_text(out: &mut impl Write, summary: &RunSummary) -> fmt::Result {
    let stats = &summary.controller;
    let compliance = &summary.compliance;
    writeln!(out, "# Fault injection run (seed {})", summary.seed)?;
    writeln!(
        out,
        "# Mean number of failures per hour: {:.6} (1 failure expected at each {:.2} hours)",
        summary.mean_failures_per_hour, summary.mean_interarrival_hours
    )?;
    writeln!(out, "# Planned host failures: {}", summary.planned_failures)?;
    writeln!(out, "# Number of Host faults: {}", summary.host_faults)?;
    writeln!(out, "# Number of VM faults (VMs destroyed): {}", summary.vm_faults)?;
    writeln!(
        out,
        "# Time the simulation finished: {:.4} hours",
        summary.finish_time_hours
    )?;
    writeln!(out, "# VM MTTR: {}", minutes(summary.vm_mttr_minutes))?;
    writeln!(out, "# VM MTBF: {}", minutes(summary.vm_mtbf_minutes))?;
    writeln!(out, "# Host MTTR: {}", minutes(summary.host_mttr_minutes))?;
    writeln!(out, "# Host MTBF: {}", minutes(summary.host_mtbf_minutes))?;
    writeln!(out, "# Hosts still down at finish: {}", summary.hosts_down_at_finish)?;
    writeln!(out, "# Availability: {:.2}%", summary.availability_pct)?;
    writeln!(out, "# Peak CPU utilization: {:.2}%", summary.peak_cpu_pct)?;
    writeln!(out)?;
    writeln!(
        out,
        "# Cloudlets: {} submitted, {} finished, {} unfinished",
        summary.submitted_cloudlets, summary.finished_cloudlets, summary.unfinished_cloudlets
    )?;
    writeln!(
        out,
        "# Clones: {} VMs, {} cloudlets ({} placement errors)",
        stats.vm_clones, stats.cloudlet_clones, stats.placement_errors
    )?;
    writeln!(
        out,
        "# Resubmissions: {} ({} cloudlets exhausted their retries)",
        stats.resubmissions, stats.retry_exhausted
    )?;
    writeln!(
        out,
        "# Controller: {} ticks, {} with violations, {} state transitions",
        stats.ticks, stats.violation_ticks, stats.transitions
    )?;
    writeln!(out)?;
    writeln!(out, "# SLA thresholds")?;
    for (name, value) in &summary.sla_thresholds {
        writeln!(out, "#   {name} = {value}")?;
    }
    writeln!(
        out,
        "# Task completion time: {} ({} violations)",
        check(compliance.task_completion),
        compliance.task_completion_violations
    )?;
    writeln!(out, "# Fault tolerance: {}", check(compliance.fault_tolerance))?;
    writeln!(out, "# Availability: {}", check(compliance.availability))?;
    writeln!(out, "# CPU utilization: {}", check(compliance.cpu_utilization))?;
    let verdict = if compliance.contract_violated {
        "Contract was violated!"
    } else {
        "Contract was honored."
    };
    write!(out, "# {verdict}")
}

/// Pretty-printed JSON of the full summary.
pub fn render_json(summary: &RunSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).context("failed to serialize run summary")
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_resilience::ControllerStats;
    use faultline_sla::{ComplianceReport, WorkloadOutcome};

    fn summary(violated: bool) -> RunSummary {
        RunSummary {
            seed: 112_717_613,
            mean_failures_per_hour: 0.01,
            mean_interarrival_hours: 100.0,
            planned_failures: 8,
            host_faults: 7,
            vm_faults: 3,
            finish_time_hours: 800.0,
            vm_mttr_minutes: Some(3.5),
            vm_mtbf_minutes: Some(16_000.0),
            host_mttr_minutes: Some(60.0),
            host_mtbf_minutes: None,
            hosts_down_at_finish: 1,
            availability_pct: 99.97,
            peak_cpu_pct: 10.0,
            submitted_cloudlets: 12,
            finished_cloudlets: 0,
            unfinished_cloudlets: 6,
            controller: ControllerStats {
                vm_clones: 3,
                cloudlet_clones: 6,
                ..ControllerStats::default()
            },
            sla_thresholds: [("availability.min".to_string(), 99.0)].into_iter().collect(),
            compliance: ComplianceReport {
                task_completion_violations: 0,
                task_completion: MetricCheck::Compliant,
                fault_tolerance: if violated {
                    MetricCheck::Violated
                } else {
                    MetricCheck::Compliant
                },
                availability: MetricCheck::Compliant,
                cpu_utilization: MetricCheck::NotEvaluated,
                contract_violated: violated,
            },
            workloads: vec![WorkloadOutcome {
                id: 10,
                exec_start: 5.0,
                finish: 65.0,
            }],
        }
    }

    #[test]
    fn text_report_lists_the_headline_figures() {
        let text = render_text(&summary(true)).unwrap();
        assert!(text.contains("# Mean number of failures per hour: 0.010000 (1 failure expected at each 100.00 hours)"));
        assert!(text.contains("# Number of Host faults: 7"));
        assert!(text.contains("# Number of VM faults (VMs destroyed): 3"));
        assert!(text.contains("# VM MTTR: 3.50 minutes"));
        assert!(text.contains("# Host MTBF: n/a"));
        assert!(text.contains("# Hosts still down at finish: 1"));
        assert!(text.contains("# Availability: 99.97%"));
        assert!(text.contains("# CPU utilization: not evaluated"));
        assert!(text.contains("#   availability.min = 99"));
        assert!(text.ends_with("# Contract was violated!"));
    }

    #[test]
    fn honored_contract_is_reported() {
        assert!(render_text(&summary(false)).unwrap().ends_with("# Contract was honored."));
    }

    #[test]
    fn json_report_round_trips_through_serde_value() {
        let json = render_json(&summary(false)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["host_faults"], 7);
        assert_eq!(value["compliance"]["cpu_utilization"], "not_evaluated");
        assert_eq!(value["controller"]["vm_clones"], 3);
        assert!(value["host_mtbf_minutes"].is_null());
    }
}
