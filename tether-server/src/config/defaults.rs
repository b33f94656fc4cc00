//! Default configuration values
//!
//! Printed by `tether --print-config` as a starting point for a config file.

/// Default configuration as TOML
pub const DEFAULT_CONFIG_TOML: &str = r##"
# tether configuration

[server]
name = "tether"
# version defaults to the binary version

[peer]
# Address the browser extension connects to
host = "127.0.0.1"
port = 9009

[channel]
# Seconds to wait for a browser reply; 0 waits forever
response_timeout_secs = 30

[shutdown]
# How long in-flight requests may take to finish on exit
drain_timeout_ms = 2000
"##;
