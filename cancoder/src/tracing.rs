//! Tracing setup and convenience prelude.
//!
//! Modules import logging macros through `crate::tracing::prelude::*` so the
//! crate has a single place to grow the logging surface.

pub mod prelude {
    pub use tracing::{debug, error, info, trace, warn};
}

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` overrides the default level.
pub fn init(verbose: bool) {
    let default_level = if verbose { "cancoder=debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
