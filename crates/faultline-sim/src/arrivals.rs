//! ---
//! fl_section: "11-simulation-test-harness"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Dynamic cloudlet arrivals with sampled lengths."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use std::collections::VecDeque;

use anyhow::{Context, Result};
use faultline_common::config::{ArrivalConfig, ScenarioConfig};
use faultline_resilience::{CloudletSpec, OwnerId, UtilizationProfile};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Cloudlets submitted together at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalBatch {
    pub at: f64,
    pub specs: Vec<CloudletSpec>,
}

/// Arrival batches ordered by time.
#[derive(Debug, Default)]
pub struct ArrivalPlan {
    batches: VecDeque<ArrivalBatch>,
}

impl ArrivalPlan {
    /// Sample every batch up front so the plan depends on `seed` only.
    pub fn new(
        arrivals: &[ArrivalConfig],
        scenario: &ScenarioConfig,
        owner: OwnerId,
        seed: u64,
    ) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut batches: Vec<ArrivalBatch> = Vec::with_capacity(arrivals.len());
        for (index, arrival) in arrivals.iter().enumerate() {
            let lengths = Normal::new(arrival.length_mean, arrival.length_std_dev)
                .with_context(|| format!("arrivals[{index}] has an invalid length distribution"))?;
            let specs = (0..arrival.count)
                .map(|_| CloudletSpec {
                    id: None,
                    owner,
                    length: lengths.sample(&mut rng).max(1.0).round() as u64,
                    pes: arrival.pes,
                    file_size: scenario.cloudlet_file_size,
                    output_size: scenario.cloudlet_output_size,
                    utilization: UtilizationProfile::cpu_only(scenario.cloudlet_cpu_utilization),
                    vm: None,
                })
                .collect();
            batches.push(ArrivalBatch {
                at: arrival.at_secs,
                specs,
            });
        }
        batches.sort_by(|a, b| a.at.total_cmp(&b.at));
        Ok(Self {
            batches: batches.into(),
        })
    }

    pub fn next_time(&self) -> Option<f64> {
        self.batches.front().map(|batch| batch.at)
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Remove and return every batch due at or before `now`.
    pub fn take_due(&mut self, now: f64) -> Vec<ArrivalBatch> {
        let mut due = Vec::new();
        while self.batches.front().is_some_and(|batch| batch.at <= now) {
            if let Some(batch) = self.batches.pop_front() {
                due.push(batch);
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrival(at_secs: f64, count: usize) -> ArrivalConfig {
        ArrivalConfig {
            at_secs,
            count,
            pes: 1,
            length_mean: 10_000.0,
            length_std_dev: 500.0,
        }
    }

    #[test]
    fn batches_come_out_in_time_order() {
        let scenario = ScenarioConfig::default();
        let mut plan =
            ArrivalPlan::new(&[arrival(20.0, 1), arrival(5.0, 3)], &scenario, 1, 4).unwrap();
        assert_eq!(plan.next_time(), Some(5.0));
        let due = plan.take_due(10.0);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].specs.len(), 3);
        assert!(due[0].specs.iter().all(|spec| spec.length >= 1 && spec.vm.is_none()));
        assert_eq!(plan.take_due(19.0), Vec::new());
        assert_eq!(plan.take_due(20.0).len(), 1);
        assert!(plan.is_empty());
    }

    #[test]
    fn same_seed_samples_same_lengths() {
        let scenario = ScenarioConfig::default();
        let lengths = |seed| {
            let mut plan = ArrivalPlan::new(&[arrival(1.0, 4)], &scenario, 1, seed).unwrap();
            plan.take_due(1.0)[0]
                .specs
                .iter()
                .map(|spec| spec.length)
                .collect::<Vec<_>>()
        };
        assert_eq!(lengths(11), lengths(11));
    }

    #[test]
    fn negative_deviation_is_rejected() {
        let mut bad = arrival(1.0, 1);
        bad.length_std_dev = -1.0;
        assert!(ArrivalPlan::new(&[bad], &ScenarioConfig::default(), 1, 1).is_err());
    }
}
