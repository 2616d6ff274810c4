//! Protocol and acquisition tunables. Loaded from TOML by the host; every field has a default.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Deserialize;

use crate::exchange::RetryPolicy;
use crate::protocol::RequestKind;

/// Discovery/control protocol settings (`[protocol]` table).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Local UDP port the control endpoint binds (0 = ephemeral).
    pub local_port: u16,
    /// Port controllers listen on.
    pub device_port: u16,
    /// Destination of discovery probes.
    pub broadcast_addr: Ipv4Addr,
    pub receive_timeout_ms: u64,
    pub connect_retries: u32,
    /// Disconnect is best-effort; 0 means a single attempt.
    pub disconnect_retries: u32,
    pub discover_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            local_port: 8080,
            device_port: 9090,
            broadcast_addr: Ipv4Addr::BROADCAST,
            receive_timeout_ms: 3000,
            connect_retries: 3,
            disconnect_retries: 0,
            discover_retries: 1,
            retry_delay_ms: 1000,
        }
    }
}

impl ProtocolConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn retry_policy(&self, kind: RequestKind) -> RetryPolicy {
        let max_retries = match kind {
            RequestKind::Probe => self.discover_retries,
            RequestKind::Connect => self.connect_retries,
            RequestKind::Disconnect => self.disconnect_retries,
        };
        RetryPolicy {
            max_retries,
            receive_timeout: self.receive_timeout(),
            retry_delay: self.retry_delay(),
        }
    }
}

/// Windowing pipeline settings (`[acquisition]` table).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquisitionConfig {
    pub channel_count: usize,
    /// Samples per channel per window.
    pub window_size: usize,
    /// Capacity of each sink's window queue.
    pub queue_depth: usize,
    /// Sleep between polls of an empty transport queue.
    pub idle_poll_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            channel_count: 8,
            window_size: 10240,
            queue_depth: 16,
            idle_poll_ms: 10,
        }
    }
}

impl AcquisitionConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    Zero(&'static str),
}

/// Reject values the pipeline cannot run with.
pub fn validate(protocol: &ProtocolConfig, acquisition: &AcquisitionConfig) -> Result<(), ConfigError> {
    if protocol.receive_timeout_ms == 0 {
        return Err(ConfigError::Zero("protocol.receive_timeout_ms"));
    }
    if acquisition.channel_count == 0 {
        return Err(ConfigError::Zero("acquisition.channel_count"));
    }
    if acquisition.window_size == 0 {
        return Err(ConfigError::Zero("acquisition.window_size"));
    }
    if acquisition.queue_depth == 0 {
        return Err(ConfigError::Zero("acquisition.queue_depth"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_controller() {
        let p = ProtocolConfig::default();
        assert_eq!(p.device_port, 9090);
        assert_eq!(p.local_port, 8080);
        assert_eq!(p.receive_timeout(), Duration::from_secs(3));
        assert_eq!(p.retry_policy(RequestKind::Connect).max_attempts(), 4);
        assert_eq!(p.retry_policy(RequestKind::Disconnect).max_attempts(), 1);
        let a = AcquisitionConfig::default();
        assert_eq!((a.channel_count, a.window_size), (8, 10240));
        assert!(validate(&p, &a).is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let p: ProtocolConfig =
            toml::from_str("device_port = 9191\nbroadcast_addr = \"192.168.1.255\"").unwrap();
        assert_eq!(p.device_port, 9191);
        assert_eq!(p.broadcast_addr, Ipv4Addr::new(192, 168, 1, 255));
        assert_eq!(p.connect_retries, 3);
        assert!(toml::from_str::<ProtocolConfig>("bogus = 1").is_err());
    }

    #[test]
    fn validate_rejects_zeroes() {
        let p = ProtocolConfig::default();
        let a = AcquisitionConfig {
            window_size: 0,
            ..AcquisitionConfig::default()
        };
        assert_eq!(
            validate(&p, &a),
            Err(ConfigError::Zero("acquisition.window_size"))
        );
        let p0 = ProtocolConfig {
            receive_timeout_ms: 0,
            ..ProtocolConfig::default()
        };
        assert!(validate(&p0, &AcquisitionConfig::default()).is_err());
    }
}
