//! Configuration for the tether bridge
//!
//! TOML on disk, every section optional, with a couple of environment
//! overrides applied on top.

mod defaults;
mod loader;
mod schema;

pub use defaults::DEFAULT_CONFIG_TOML;
pub use loader::{ConfigLoader, ENV_PEER_PORT, ENV_RESPONSE_TIMEOUT_SECS};
pub use schema::*;
