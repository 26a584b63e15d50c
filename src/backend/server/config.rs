/**
 * Node Configuration Loading
 *
 * Builds a `BackplaneConfig` from environment variables, with defaults for
 * anything unset.
 *
 * # Variables
 *
 * - `BACKPLANE_CHANNEL_PREFIX` - channel prefix shared by the deployment
 * - `BACKPLANE_SERVER_NAME` - this server's identity (random if unset)
 * - `BACKPLANE_ACK_TIMEOUT_SECS` - group command ack timeout
 * - `BACKPLANE_ACK_SWEEP_SECS` - ack sweep interval
 * - `BACKPLANE_CLIENT_RESULT_TIMEOUT_SECS` - client result timeout
 * - `BACKPLANE_PROTOCOLS` - comma-separated sub-protocol names
 *
 * # Error Handling
 *
 * A value that does not parse is logged and ignored. Only a combination
 * that fails validation is returned as an error.
 */

use std::time::Duration;

use crate::shared::config::{BackplaneConfig, ConfigError};

pub const ENV_CHANNEL_PREFIX: &str = "BACKPLANE_CHANNEL_PREFIX";
pub const ENV_SERVER_NAME: &str = "BACKPLANE_SERVER_NAME";
pub const ENV_ACK_TIMEOUT_SECS: &str = "BACKPLANE_ACK_TIMEOUT_SECS";
pub const ENV_ACK_SWEEP_SECS: &str = "BACKPLANE_ACK_SWEEP_SECS";
pub const ENV_CLIENT_RESULT_TIMEOUT_SECS: &str = "BACKPLANE_CLIENT_RESULT_TIMEOUT_SECS";
pub const ENV_PROTOCOLS: &str = "BACKPLANE_PROTOCOLS";

/// Load the node configuration from the process environment
pub fn load_config() -> Result<BackplaneConfig, ConfigError> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Load the node configuration from an arbitrary variable source
pub fn load_config_from<F>(lookup: F) -> Result<BackplaneConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut builder = BackplaneConfig::builder();

    if let Some(prefix) = non_empty(&lookup, ENV_CHANNEL_PREFIX) {
        builder = builder.channel_prefix(prefix);
    }
    match non_empty(&lookup, ENV_SERVER_NAME) {
        Some(name) => builder = builder.server_name(name),
        None => tracing::info!("{} not set, generating a server name", ENV_SERVER_NAME),
    }
    if let Some(timeout) = seconds(&lookup, ENV_ACK_TIMEOUT_SECS) {
        builder = builder.ack_timeout(timeout);
    }
    if let Some(interval) = seconds(&lookup, ENV_ACK_SWEEP_SECS) {
        builder = builder.ack_sweep_interval(interval);
    }
    if let Some(timeout) = seconds(&lookup, ENV_CLIENT_RESULT_TIMEOUT_SECS) {
        builder = builder.client_result_timeout(timeout);
    }
    if let Some(protocols) = non_empty(&lookup, ENV_PROTOCOLS) {
        let names: Vec<String> = protocols
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();
        builder = builder.protocols(names);
    }

    let config = builder.build()?;
    tracing::info!(
        "Backplane configured: prefix='{}', server='{}', protocols={:?}",
        config.channel_prefix,
        config.server_name,
        config.protocols
    );
    Ok(config)
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn seconds<F>(lookup: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = non_empty(lookup, key)?;
    match raw.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(e) => {
            tracing::warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}
