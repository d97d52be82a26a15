//! Capability-grammar authorization engine for a distributed filesystem
//! metadata service.
//!
//! A capability string compiles to a [`policy::Policy`]: an ordered list of
//! `allow` grants, each pairing a [`policy::CapSpec`] with a [`policy::Match`]
//! that narrows which requests it covers. [`policy::Policy::is_capable`] is
//! the sole authorization entry point; [`idmap::update_ids`] is the optional
//! step that resolves a caller's numeric identity from a directory service
//! before evaluation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod idmap;
pub mod policy;

pub use error::{Error, Result};
pub use policy::Policy;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Set up the global `tracing` subscriber. `format` of `Some("json")` emits
/// structured JSON; anything else emits the default text layer.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
