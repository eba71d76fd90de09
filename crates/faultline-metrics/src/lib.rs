//! ---
//! fl_section: "03-persistence-logging"
//! fl_subsection: "module"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Metrics collection and export utilities."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{Registry, TextEncoder};
use tracing::info;

/// Shared registry type used across components.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render every registered family in the Prometheus text exposition format.
pub fn encode_text(registry: &SharedRegistry) -> Result<String> {
    let families = registry.gather();
    TextEncoder::new()
        .encode_to_string(&families)
        .context("failed to encode metrics")
}

/// Write the registry to `path`, replacing any previous export.
pub fn write_text_file(registry: &SharedRegistry, path: &Path) -> Result<()> {
    let body = encode_text(registry)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create metrics directory {}", parent.display()))?;
    }
    fs::write(path, body)
        .with_context(|| format!("failed to write metrics export {}", path.display()))?;
    info!(path = %path.display(), "metrics exported");
    Ok(())
}

pub use prometheus;
