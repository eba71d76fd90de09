//! ---
//! fl_section: "07-resilience-fault-tolerance"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Stochastic host failure injection."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use faultline_common::config::InjectorConfig;
use faultline_common::time::{hours_to_secs, SECONDS_PER_HOUR};
use indexmap::IndexMap;
use rand::distributions::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::HostId;
use crate::error::{ResilienceError, Result};

/// A scheduled destructive event; consumed once when delivered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FailureEvent {
    /// Delivery time in simulated seconds.
    pub time: f64,
    /// Host that fails.
    pub target_host: HostId,
}

/// How a failing host is picked among the population.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetPolicy {
    /// Every host is equally likely.
    Uniform,
    /// Relative weights per host; unlisted hosts weigh 1.0.
    Weighted(IndexMap<HostId, f64>),
}

impl TargetPolicy {
    fn from_config(config: &InjectorConfig) -> Self {
        if config.target_weights.is_empty() {
            TargetPolicy::Uniform
        } else {
            TargetPolicy::Weighted(
                config
                    .target_weights
                    .iter()
                    .map(|entry| (entry.host, entry.weight))
                    .collect(),
            )
        }
    }
}

/// Receiver of planned failures, usually the engine's timeline.
pub trait FaultTimeline {
    /// Enqueue one event for delivery at `event.time`.
    fn schedule(&mut self, event: FailureEvent);
}

/// Poisson host failure process.
///
/// Interarrival times are exponential with the configured hourly rate. The
/// sequence is a pure function of seed, rate, horizon, and host population.
#[derive(Debug)]
pub struct FailureInjector {
    rate_per_hour: f64,
    horizon_secs: f64,
    interarrival: Exp<f64>,
    policy: TargetPolicy,
    rng: StdRng,
}

impl FailureInjector {
    /// Build an injector from validated configuration.
    pub fn new(config: &InjectorConfig) -> Result<Self> {
        let interarrival = Exp::new(config.mean_failures_per_hour).map_err(|err| {
            ResilienceError::Config(format!(
                "mean_failures_per_hour {} rejected: {}",
                config.mean_failures_per_hour, err
            ))
        })?;
        if !(config.max_time_to_fail_hours > 0.0) {
            return Err(ResilienceError::Config(format!(
                "max_time_to_fail_hours must be positive, got {}",
                config.max_time_to_fail_hours
            )));
        }
        Ok(Self {
            rate_per_hour: config.mean_failures_per_hour,
            horizon_secs: hours_to_secs(config.max_time_to_fail_hours),
            interarrival,
            policy: TargetPolicy::from_config(config),
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    /// Configured rate in failures per simulated hour.
    pub fn mean_failures_per_hour(&self) -> f64 {
        self.rate_per_hour
    }

    /// Expected hours between two failures.
    pub fn mean_interarrival_hours(&self) -> f64 {
        1.0 / self.rate_per_hour
    }

    /// Last time at which a failure may be scheduled, in seconds.
    pub fn horizon_secs(&self) -> f64 {
        self.horizon_secs
    }

    /// Sample the next failure time after `current`.
    ///
    /// Returns `None` when the sample lands beyond the horizon.
    pub fn next_failure_time(&mut self, current: f64) -> Option<f64> {
        let sample_hours = self.interarrival.sample(&mut self.rng);
        let mut next = current + sample_hours * SECONDS_PER_HOUR;
        if next <= current {
            next = current + f64::EPSILON * current.abs().max(1.0);
        }
        (next <= self.horizon_secs).then_some(next)
    }

    /// Pick the host a failure lands on. `None` for an empty population.
    pub fn choose_target(&mut self, hosts: &[HostId]) -> Option<HostId> {
        if hosts.is_empty() {
            return None;
        }
        if let TargetPolicy::Weighted(weights) = &self.policy {
            let per_host: Vec<f64> = hosts
                .iter()
                .map(|host| weights.get(host).copied().unwrap_or(1.0))
                .collect();
            match WeightedIndex::new(&per_host) {
                Ok(dist) => return Some(hosts[dist.sample(&mut self.rng)]),
                Err(err) => warn!(
                    target: "faultline::resilience::injector",
                    error = %err,
                    "target weights unusable; falling back to uniform selection"
                ),
            }
        }
        let index = self.rng.gen_range(0..hosts.len());
        Some(hosts[index])
    }

    /// Pre-plan every failure from `start` up to the horizon.
    pub fn plan(&mut self, hosts: &[HostId], start: f64) -> Vec<FailureEvent> {
        let mut events = Vec::new();
        let mut current = start;
        while let Some(time) = self.next_failure_time(current) {
            let Some(target_host) = self.choose_target(hosts) else {
                break;
            };
            debug!(
                target: "faultline::resilience::injector",
                time,
                host = target_host,
                "failure planned"
            );
            events.push(FailureEvent { time, target_host });
            current = time;
        }
        info!(
            target: "faultline::resilience::injector",
            failures = events.len(),
            rate_per_hour = self.rate_per_hour,
            horizon_secs = self.horizon_secs,
            "failure plan generated"
        );
        events
    }

    /// Plan failures and push them into `timeline`. Returns how many were scheduled.
    pub fn schedule_into<T>(&mut self, hosts: &[HostId], start: f64, timeline: &mut T) -> usize
    where
        T: FaultTimeline + ?Sized,
    {
        let events = self.plan(hosts, start);
        let count = events.len();
        for event in events {
            timeline.schedule(event);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_common::config::TargetWeight;

    fn config(rate: f64, horizon: f64, seed: u64) -> InjectorConfig {
        InjectorConfig {
            mean_failures_per_hour: rate,
            seed,
            max_time_to_fail_hours: horizon,
            target_weights: Vec::new(),
        }
    }

    #[test]
    fn same_seed_reproduces_plan() {
        let hosts: Vec<HostId> = (1..=10).collect();
        let first = FailureInjector::new(&config(0.5, 100.0, 7))
            .unwrap()
            .plan(&hosts, 0.0);
        let second = FailureInjector::new(&config(0.5, 100.0, 7))
            .unwrap()
            .plan(&hosts, 0.0);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn times_strictly_increase_within_horizon() {
        let hosts: Vec<HostId> = (1..=4).collect();
        let mut injector = FailureInjector::new(&config(2.0, 50.0, 42)).unwrap();
        let events = injector.plan(&hosts, 0.0);
        let horizon = injector.horizon_secs();
        assert!(events.len() > 10);
        for pair in events.windows(2) {
            assert!(pair[0].time < pair[1].time);
        }
        assert!(events.iter().all(|event| event.time <= horizon));
    }

    #[test]
    fn next_failure_beyond_horizon_is_dropped() {
        let mut injector = FailureInjector::new(&config(0.01, 1.0, 1)).unwrap();
        assert_eq!(injector.next_failure_time(hours_to_secs(1.0)), None);
    }

    #[test]
    fn weighted_policy_avoids_zero_weight_hosts() {
        let mut cfg = config(1.0, 10.0, 3);
        cfg.target_weights = vec![
            TargetWeight { host: 1, weight: 0.0 },
            TargetWeight { host: 2, weight: 0.0 },
        ];
        let mut injector = FailureInjector::new(&cfg).unwrap();
        for _ in 0..50 {
            assert_eq!(injector.choose_target(&[1, 2, 3]), Some(3));
        }
    }

    #[test]
    fn empty_population_has_no_target() {
        let mut injector = FailureInjector::new(&config(1.0, 10.0, 3)).unwrap();
        assert_eq!(injector.choose_target(&[]), None);
        assert!(injector.plan(&[], 0.0).is_empty());
    }

    #[test]
    fn rejects_invalid_rate() {
        assert!(FailureInjector::new(&config(-1.0, 10.0, 3)).is_err());
    }

    struct Recorder(Vec<FailureEvent>);

    impl FaultTimeline for Recorder {
        fn schedule(&mut self, event: FailureEvent) {
            self.0.push(event);
        }
    }

    #[test]
    fn schedule_into_pushes_every_event() {
        let mut injector = FailureInjector::new(&config(1.0, 20.0, 11)).unwrap();
        let mut recorder = Recorder(Vec::new());
        let count = injector.schedule_into(&[1, 2], 0.0, &mut recorder);
        assert_eq!(count, recorder.0.len());
    }
}
