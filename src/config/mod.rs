//! Configuration module for nexus-live.
//!
//! This module is split into several sub-modules:
//! - `types`: Retry, cache, live-session and logging sections
//! - `config_struct`: The top-level `NexusConfig` and its defaults
//! - `io`: Config loading and saving

mod config_struct;
mod io;
mod types;

pub use config_struct::{NexusConfig, NEXUS_SYSTEM_INSTRUCTION};
pub use io::{get_config_path, load_config, load_config_from, save_config, save_config_to};
pub use types::{CacheConfig, LiveConfig, LoggingConfig, RetryConfig};
