//! ---
//! fl_section: "06-sla-compliance"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "SLA contract loading and evaluation."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SlaError};

/// Metric names understood by the reactive controller and the compliance report.
pub mod names {
    /// Finish time minus execution start time of a workload, in seconds.
    pub const TASK_COMPLETION_TIME: &str = "taskCompletionTime";
    /// Number of faults the contract tolerates over a run.
    pub const FAULT_TOLERANCE_LEVEL: &str = "faultToleranceLevel";
    /// Availability as a percentage (0-100).
    pub const AVAILABILITY: &str = "availability";
    /// CPU utilization as a percentage (0-100).
    pub const CPU_UTILIZATION: &str = "cpuUtilization";
}

/// Which side of the metric a threshold constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundKind {
    /// Observed values below the threshold violate the contract.
    Min,
    /// Observed values above the threshold violate the contract.
    Max,
}

impl BoundKind {
    /// Static label for logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundKind::Min => "min",
            BoundKind::Max => "max",
        }
    }
}

impl fmt::Display for BoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One threshold of the contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaDimension {
    /// Metric the threshold applies to.
    pub metric_name: String,
    /// Side of the metric being bounded.
    pub bound_kind: BoundKind,
    /// Threshold value; equality is compliant.
    pub threshold: f64,
}

impl SlaDimension {
    /// Boundary values are compliant: only strictly outside values violate.
    pub fn is_violated_by(&self, observed: f64) -> bool {
        match self.bound_kind {
            BoundKind::Max => observed > self.threshold,
            BoundKind::Min => observed < self.threshold,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MetricEntry {
    #[serde(default)]
    min_value: Option<f64>,
    #[serde(default)]
    max_value: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct MetricBounds {
    min: Option<f64>,
    max: Option<f64>,
}

/// Immutable set of per-metric thresholds, in document order.
///
/// The document is a JSON object with one entry per metric name, each entry
/// optionally carrying `minValue` and/or `maxValue`:
///
/// ```json
/// { "taskCompletionTime": { "maxValue": 9000 }, "availability": { "minValue": 99.5 } }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SlaContract {
    metrics: IndexMap<String, MetricBounds>,
}

impl SlaContract {
    /// Load a contract document from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| SlaError::ConfigMissing {
            path: path.to_path_buf(),
            source,
        })?;
        let contract = Self::from_json_str(&contents)?;
        debug!(
            target: "faultline::sla::contract",
            path = %path.display(),
            metrics = contract.len(),
            "sla contract loaded"
        );
        Ok(contract)
    }

    /// Parse and validate a contract document.
    pub fn from_json_str(input: &str) -> Result<Self> {
        let raw: IndexMap<String, MetricEntry> = serde_json::from_str(input)?;
        let mut metrics = IndexMap::with_capacity(raw.len());
        for (name, entry) in raw {
            let bounds = MetricBounds {
                min: entry.min_value,
                max: entry.max_value,
            };
            validate_bounds(&name, &bounds)?;
            metrics.insert(name, bounds);
        }
        Ok(Self { metrics })
    }

    /// Number of configured metrics.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// True when the document declared no metrics at all.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Whether the metric has an entry, even one without bounds.
    pub fn is_configured(&self, metric: &str) -> bool {
        self.metrics.contains_key(metric)
    }

    /// Threshold for one side of a metric, if declared.
    pub fn dimension(&self, metric: &str, kind: BoundKind) -> Option<SlaDimension> {
        let bounds = self.metrics.get(metric)?;
        let threshold = match kind {
            BoundKind::Min => bounds.min?,
            BoundKind::Max => bounds.max?,
        };
        Some(SlaDimension {
            metric_name: metric.to_owned(),
            bound_kind: kind,
            threshold,
        })
    }

    /// Every declared threshold, ordered by metric then min before max.
    pub fn dimensions(&self) -> impl Iterator<Item = SlaDimension> + '_ {
        self.metrics.iter().flat_map(|(name, bounds)| {
            let min = bounds.min.map(|threshold| SlaDimension {
                metric_name: name.clone(),
                bound_kind: BoundKind::Min,
                threshold,
            });
            let max = bounds.max.map(|threshold| SlaDimension {
                metric_name: name.clone(),
                bound_kind: BoundKind::Max,
                threshold,
            });
            min.into_iter().chain(max)
        })
    }

    /// Flattened `metric.min` / `metric.max` lookup table of every threshold.
    pub fn thresholds(&self) -> IndexMap<String, f64> {
        self.dimensions()
            .map(|dim| {
                (
                    format!("{}.{}", dim.metric_name, dim.bound_kind),
                    dim.threshold,
                )
            })
            .collect()
    }
}

impl std::str::FromStr for SlaContract {
    type Err = SlaError;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_json_str(input)
    }
}

fn validate_bounds(metric: &str, bounds: &MetricBounds) -> Result<()> {
    for value in [bounds.min, bounds.max].into_iter().flatten() {
        if !value.is_finite() {
            return Err(SlaError::InvalidBounds {
                metric: metric.to_owned(),
                reason: format!("bound {} is not a finite number", value),
            });
        }
    }
    if let (Some(min), Some(max)) = (bounds.min, bounds.max) {
        if min > max {
            return Err(SlaError::InvalidBounds {
                metric: metric.to_owned(),
                reason: format!("minValue {} exceeds maxValue {}", min, max),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = r#"{
        "taskCompletionTime": { "maxValue": 9000 },
        "faultToleranceLevel": { "minValue": 3 },
        "availability": { "minValue": 99.0 },
        "cpuUtilization": { "maxValue": 80.0 }
    }"#;

    #[test]
    fn dimensions_follow_document_order() {
        let contract: SlaContract = CONTRACT.parse().unwrap();
        let names: Vec<_> = contract
            .dimensions()
            .map(|dim| (dim.metric_name, dim.bound_kind))
            .collect();
        assert_eq!(
            names,
            vec![
                ("taskCompletionTime".to_owned(), BoundKind::Max),
                ("faultToleranceLevel".to_owned(), BoundKind::Min),
                ("availability".to_owned(), BoundKind::Min),
                ("cpuUtilization".to_owned(), BoundKind::Max),
            ]
        );
    }

    #[test]
    fn thresholds_table_is_keyed_by_metric_and_bound() {
        let contract: SlaContract = CONTRACT.parse().unwrap();
        let table = contract.thresholds();
        assert_eq!(table.get("taskCompletionTime.max"), Some(&9000.0));
        assert_eq!(table.get("availability.min"), Some(&99.0));
        assert!(table.get("availability.max").is_none());
    }

    #[test]
    fn entry_without_bounds_is_configured_but_unbounded() {
        let contract: SlaContract = r#"{ "cpuUtilization": {} }"#.parse().unwrap();
        assert!(contract.is_configured("cpuUtilization"));
        assert!(contract.dimension("cpuUtilization", BoundKind::Max).is_none());
    }

    #[test]
    fn rejects_unknown_fields_and_inverted_bounds() {
        let err = r#"{ "availability": { "minimum": 99 } }"#
            .parse::<SlaContract>()
            .unwrap_err();
        assert!(matches!(err, SlaError::ConfigMalformed(_)));

        let err = r#"{ "availability": { "minValue": 99, "maxValue": 50 } }"#
            .parse::<SlaContract>()
            .unwrap_err();
        assert!(matches!(err, SlaError::InvalidBounds { .. }));
        assert!(err.is_config_error());
    }

    #[test]
    fn rejects_non_object_documents() {
        let err = "[1, 2, 3]".parse::<SlaContract>().unwrap_err();
        assert!(matches!(err, SlaError::ConfigMalformed(_)));
    }
}
