//! # Logging
//!
//! tracing-subscriber setup. `RUST_LOG` selects the filter, `LOG_FORMAT`
//! selects `json` (default) or human-readable `text` output.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "agent_operator=info";

/// Install the global tracing subscriber
pub fn init_tracing(log_format: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match log_format {
        "text" | "pretty" => builder.try_init(),
        _ => builder.json().with_current_span(true).try_init(),
    }
    .map_err(|e| anyhow!("Failed to initialize tracing subscriber: {e}"))
}
