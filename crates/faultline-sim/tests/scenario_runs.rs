//! ---
//! fl_section: "11-simulation-test-harness"
//! fl_subsection: "integration-tests"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "End-to-end scenario runs through the reactive controller."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use faultline_common::config::AppConfig;
use faultline_metrics::{encode_text, new_registry};
use faultline_resilience::{FailureEvent, FaultTimeline, ReactiveMetrics};
use faultline_sim::{FailureTimeline, RunSummary, Scenario, ScenarioRunner};
use faultline_sla::{MetricCheck, SlaContract};

const CONTRACT: &str = r#"{
  "taskCompletionTime": { "maxValue": 9000 },
  "faultToleranceLevel": { "minValue": 3 },
  "availability": { "minValue": 99.0 },
  "cpuUtilization": { "maxValue": 80.0 }
}"#;

/// Four hosts, two VMs on host 1, four one-hour cloudlets.
fn config(extra: &str) -> AppConfig {
    let base = r#"
        [scenario]
        hosts = 4
        cloudlets = 4
        cloudlet_length = 3600000
        max_vm_recovery_secs = 30.0
        host_repair_hours = 0.5
        end_time_hours = 10.0

        [injector]
        mean_failures_per_hour = 2.0
        seed = 7
        max_time_to_fail_hours = 10.0
    "#;
    format!("{base}\n{extra}").parse().unwrap()
}

fn runner(config: AppConfig) -> ScenarioRunner {
    ScenarioRunner::new(config, CONTRACT.parse::<SlaContract>().unwrap())
}

fn execute(runner: &ScenarioRunner, failures: &[FailureEvent]) -> RunSummary {
    let scenario = Scenario::build(&runner.config().scenario, 7).unwrap();
    let mut timeline = FailureTimeline::new();
    for failure in failures {
        timeline.schedule(*failure);
    }
    runner.execute(scenario, timeline).unwrap()
}

#[test]
fn fault_free_run_finishes_every_cloudlet_within_contract() {
    let summary = execute(&runner(config("")), &[]);
    assert_eq!(summary.host_faults, 0);
    assert_eq!(summary.vm_faults, 0);
    assert_eq!(summary.finished_cloudlets, 4);
    assert_eq!(summary.unfinished_cloudlets, 0);
    assert!((summary.finish_time_hours - 1.0).abs() < 1e-6);
    assert_eq!(summary.availability_pct, 100.0);
    assert!((summary.peak_cpu_pct - 25.0).abs() < 1e-9);
    assert_eq!(summary.vm_mttr_minutes, None);
    assert_eq!(summary.compliance.task_completion, MetricCheck::Compliant);
    assert_eq!(summary.compliance.cpu_utilization, MetricCheck::Compliant);
    assert!(!summary.compliance.contract_violated);
    assert_eq!(summary.sla_thresholds["availability.min"], 99.0);
}

#[test]
fn host_fault_clones_vms_and_cloudlets_once() {
    let failure = FailureEvent {
        time: 600.0,
        target_host: 1,
    };
    // Two signals for the same host at the same instant.
    let summary = execute(&runner(config("")), &[failure, failure]);

    assert_eq!(summary.host_faults, 1);
    assert_eq!(summary.vm_faults, 2);
    assert_eq!(summary.controller.vm_clones, 2);
    assert_eq!(summary.controller.cloudlet_clones, 4);
    assert_eq!(summary.controller.placement_errors, 0);

    let mut finished: Vec<u64> = summary.workloads.iter().map(|w| w.id).collect();
    finished.sort_unstable();
    assert_eq!(finished, vec![10, 20, 30, 40]);
    assert_eq!(summary.unfinished_cloudlets, 0);

    let mttr = summary.vm_mttr_minutes.unwrap();
    assert!(mttr > 0.0 && mttr <= 0.5, "vm mttr {mttr} minutes");
    assert!(summary.availability_pct < 100.0);
    assert!(summary.availability_pct > 98.0);
    assert!(summary.finish_time_hours > 1.0 + 600.0 / 3600.0);
}

#[test]
fn without_cloning_failed_cloudlets_exhaust_their_retries() {
    let failure = FailureEvent {
        time: 600.0,
        target_host: 1,
    };
    let summary = execute(
        &runner(config("[controller]\nclone_on_host_fault = false\n")),
        &[failure],
    );

    assert_eq!(summary.controller.vm_clones, 0);
    assert_eq!(summary.finished_cloudlets, 0);
    assert_eq!(summary.unfinished_cloudlets, 4);
    assert_eq!(summary.controller.resubmissions, 12);
    assert_eq!(summary.controller.retry_exhausted, 4);
    assert!(summary.finish_time_hours < 10.0);
    assert_eq!(summary.compliance.availability, MetricCheck::Violated);
    assert!(summary.compliance.contract_violated);
}

#[test]
fn seeded_runs_are_reproducible() {
    let runner = runner(config(""));
    let first = runner.run().unwrap();
    let second = runner.run().unwrap();
    assert_eq!(first, second);
    assert!(first.planned_failures > 0);
    assert!((0.0..=100.0).contains(&first.availability_pct));
    assert_eq!(first.mean_interarrival_hours, 0.5);
}

#[test]
fn dynamic_arrivals_are_submitted_and_finish() {
    let arrivals = r#"
        [[arrivals]]
        at_secs = 120.0
        count = 2
        pes = 1
        length_mean = 100000.0
        length_std_dev = 1000.0
    "#;
    let summary = execute(&runner(config(arrivals)), &[]);
    assert_eq!(summary.submitted_cloudlets, 6);
    assert_eq!(summary.finished_cloudlets, 6);
    let late = summary
        .workloads
        .iter()
        .filter(|workload| workload.exec_start >= 120.0)
        .count();
    assert_eq!(late, 2);
}

#[test]
fn controller_metrics_reach_the_registry() {
    let registry = new_registry();
    let metrics = ReactiveMetrics::new(registry.clone()).unwrap();
    let runner = runner(config("")).with_metrics(metrics);
    let failure = FailureEvent {
        time: 600.0,
        target_host: 1,
    };
    execute(&runner, &[failure]);

    let text = encode_text(&registry).unwrap();
    assert!(text.contains("faultline_faults_total{scope=\"host\"} 1"));
    assert!(text.contains("faultline_faults_total{scope=\"vm\"} 2"));
    assert!(text.contains("faultline_clones_total"));
}

#[test]
fn bundled_configuration_and_contract_load() {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    let config = AppConfig::from_path(&root.join("configs/faultline.toml")).unwrap();
    assert_eq!(config.scenario.hosts, 10);
    assert_eq!(config.injector.seed, 112_717_613);
    assert_eq!(config.arrivals.len(), 1);
    let contract = SlaContract::from_path(root.join(&config.sla.contract)).unwrap();
    assert_eq!(contract.len(), 4);
}

#[test]
fn default_scenario_matches_recorded_baseline() {
    let config = AppConfig::default();
    assert_eq!(config.injector.seed, 112_717_613);
    assert_eq!(config.injector.mean_failures_per_hour, 0.01);
    assert_eq!(config.injector.max_time_to_fail_hours, 800.0);
    let runner = runner(config);
    let first = runner.run().unwrap();
    let second = runner.run().unwrap();
    assert_eq!(first, second);

    // Seven failures over 800 hours, on hosts 6, 2, 10, 6, 3, 5, 8. None
    // lands on host 1 where both VMs run, and none overlaps a repair window.
    assert_eq!(first.planned_failures, 7);
    assert_eq!(first.host_faults, 7);
    assert_eq!(first.vm_faults, 0);
    assert_eq!(first.hosts_down_at_finish, 0);
    assert!((first.availability_pct - 100.0).abs() < 1e-9);
    assert!((first.finish_time_hours - 800.0).abs() < 1e-9);
    assert_eq!(first.host_mttr_minutes, Some(60.0));
}

#[test]
fn resubmission_scan_runs_on_its_own_interval() {
    let mut config = config("[controller]\nclone_on_host_fault = false\n");
    // One VM per host: VM 1 on host 1, VM 2 on host 2.
    config.scenario.vm_pes = 4;
    let contract = r#"{ "cpuUtilization": { "maxValue": 100.0 } }"#;
    let runner = ScenarioRunner::new(config, contract.parse::<SlaContract>().unwrap());
    let summary = execute(
        &runner,
        &[FailureEvent {
            time: 601.0,
            target_host: 1,
        }],
    );

    assert_eq!(summary.controller.resubmissions, 2);
    for id in [1, 3] {
        let workload = summary
            .workloads
            .iter()
            .find(|workload| workload.id == id)
            .unwrap();
        assert_eq!(workload.exec_start, 605.0, "cloudlet {id}");
    }
}

#[test]
fn host_failing_again_at_its_repair_instant_stays_down() {
    let mut config = config("");
    config.scenario.end_time_hours = Some(1.0);
    // Host 3 carries no VMs; its 30 minute repair lands exactly on the second failure.
    let failures = [
        FailureEvent {
            time: 600.0,
            target_host: 3,
        },
        FailureEvent {
            time: 2400.0,
            target_host: 3,
        },
    ];
    let summary = execute(&runner(config), &failures);

    assert_eq!(summary.host_faults, 2);
    assert_eq!(summary.hosts_down_at_finish, 1);
    assert_eq!(summary.host_mttr_minutes, Some(30.0));
}

#[test]
fn run_rejects_an_empty_vm_fleet() {
    let mut config = config("");
    config.scenario.vms = 0;
    let err = runner(config).run().unwrap_err();
    assert!(format!("{err:#}").contains("run configuration rejected"));
}
