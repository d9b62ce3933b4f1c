//! In-process host for the Huddle core: a scripted loopback server, synthetic
//! media sources and the logging setup shared by the demo and the
//! integration tests.

pub mod loopback;
pub mod sources;

use std::sync::Once;

pub use loopback::{LoopbackTransport, PrivilegePolicy};
pub use sources::{SyntheticAudioSource, SyntheticVideoSource};

const DEFAULT_FILTER: &str = "huddle_core=debug,huddle_media=info,huddle_sim=info";

static LOGGING: Once = Once::new();

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// filter. Safe to call more than once.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}
