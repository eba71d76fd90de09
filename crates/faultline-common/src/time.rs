//! ---
//! fl_section: "01-core-functionality"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Shared primitives and utilities for the reactive runtime."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
//! Simulated clock values are plain `f64` seconds since run start.

pub const SECONDS_PER_MINUTE: f64 = 60.0;
pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// Convert simulated hours into clock seconds.
pub fn hours_to_secs(hours: f64) -> f64 {
    hours * SECONDS_PER_HOUR
}

/// Convert clock seconds into simulated hours.
pub fn secs_to_hours(secs: f64) -> f64 {
    secs / SECONDS_PER_HOUR
}

/// Convert clock seconds into minutes, the unit used for MTTR/MTBF reporting.
pub fn secs_to_minutes(secs: f64) -> f64 {
    secs / SECONDS_PER_MINUTE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_are_consistent() {
        assert_eq!(hours_to_secs(800.0), 2_880_000.0);
        assert_eq!(secs_to_hours(hours_to_secs(1.5)), 1.5);
        assert_eq!(secs_to_minutes(90.0), 1.5);
    }
}
