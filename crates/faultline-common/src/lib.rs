//! ---
//! fl_section: "01-core-functionality"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Shared primitives and utilities for the reactive runtime."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
//! Core shared primitives for the Faultline workspace.
//! This crate exposes run configuration loading, logging bootstrap, and the
//! simulated-time conversions consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, ArrivalConfig, ControllerConfig, InjectorConfig, LoadedAppConfig, LoggingConfig,
    MetricsConfig, ScenarioConfig, SlaConfig, TargetWeight,
};
pub use logging::{init_tracing, LogFormat};
