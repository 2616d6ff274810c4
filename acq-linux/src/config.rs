//! Load config from file and environment.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use acq_core::{AcquisitionConfig, ProtocolConfig};
use serde::Deserialize;
use tracing::{debug, warn};

/// Host configuration. File: ~/.config/acq/config.toml or /etc/acq/config.toml.
/// Env overrides: ACQ_LOCAL_PORT, ACQ_DEVICE_PORT, ACQ_WINDOW_SIZE, ACQ_OUTPUT_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub protocol: ProtocolConfig,
    pub acquisition: AcquisitionConfig,
    /// Interface whose MAC goes into requests (default: first non-loopback).
    pub interface: Option<String>,
    /// IPv4 address put into requests (default: the routed local address).
    pub local_ip: Option<Ipv4Addr>,
    /// Where `TextFileSink` writes windows.
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig::default(),
            acquisition: AcquisitionConfig::default(),
            interface: None,
            local_ip: None,
            output_dir: PathBuf::from("data"),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("ACQ_LOCAL_PORT").and_then(|s| s.parse().ok()) {
        c.protocol.local_port = p;
    }
    if let Some(p) = var("ACQ_DEVICE_PORT").and_then(|s| s.parse().ok()) {
        c.protocol.device_port = p;
    }
    if let Some(n) = var("ACQ_WINDOW_SIZE").and_then(|s| s.parse().ok()) {
        c.acquisition.window_size = n;
    }
    if let Some(dir) = var("ACQ_OUTPUT_DIR") {
        c.output_dir = PathBuf::from(dir);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/acq/config.toml"));
    }
    out.push(PathBuf::from("/etc/acq/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    match parse_file(&path) {
        Ok(c) => {
            debug!(path = %path.display(), "loaded config");
            Some(c)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable config, using defaults");
            None
        }
    }
}

fn parse_file(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    let s = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&s)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_file_parses() {
        let c: Config = toml::from_str(
            r#"
            interface = "eth0"
            local_ip = "192.168.1.20"
            output_dir = "/var/lib/acq"

            [protocol]
            device_port = 9191
            connect_retries = 5

            [acquisition]
            window_size = 2048
            "#,
        )
        .unwrap();
        assert_eq!(c.interface.as_deref(), Some("eth0"));
        assert_eq!(c.local_ip, Some(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(c.protocol.device_port, 9191);
        assert_eq!(c.protocol.connect_retries, 5);
        assert_eq!(c.protocol.local_port, 8080);
        assert_eq!(c.acquisition.window_size, 2048);
        assert_eq!(c.acquisition.channel_count, 8);
    }

    #[test]
    fn empty_file_is_default() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c.protocol, ProtocolConfig::default());
        assert_eq!(c.output_dir, PathBuf::from("data"));
    }

    #[test]
    fn unknown_key_rejected() {
        assert!(toml::from_str::<Config>("sample_rate = 1").is_err());
    }

    #[test]
    fn env_overrides() {
        let mut c = Config::default();
        apply_env(&mut c, |k| match k {
            "ACQ_DEVICE_PORT" => Some("7000".into()),
            "ACQ_WINDOW_SIZE" => Some("512".into()),
            "ACQ_LOCAL_PORT" => Some("not a port".into()),
            _ => None,
        });
        assert_eq!(c.protocol.device_port, 7000);
        assert_eq!(c.acquisition.window_size, 512);
        assert_eq!(c.protocol.local_port, 8080);
    }
}
