//! Device identity: addresses, serial numbers, connection status and records.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// 6-byte hardware address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address: {0:?}")]
pub struct ParseMacError(pub String);

impl FromStr for MacAddr {
    type Err = ParseMacError;

    /// Accepts `aa:bb:cc:dd:ee:ff` (also `-` separated), as found in sysfs.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMacError(s.to_string());
        let mut out = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);
        for byte in out.iter_mut() {
            let part = parts.next().ok_or_else(err)?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| err())?;
        }
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(MacAddr(out))
    }
}

/// Address pair this host embeds in every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalIdentity {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

/// 16-byte controller serial number. Displayed as colon-separated upper-case hex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SerialNumber(pub [u8; 16]);

impl SerialNumber {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    /// State flag as carried in full replies: `1` means connected.
    pub fn from_flag(flag: u8) -> Self {
        if flag == 1 {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    pub fn flag(self) -> u8 {
        match self {
            ConnectionStatus::Connected => 1,
            ConnectionStatus::Disconnected => 0,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ConnectionStatus::Connected => ConnectionStatus::Disconnected,
            ConnectionStatus::Disconnected => ConnectionStatus::Connected,
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        })
    }
}

/// One known controller. `ip` is the key and never changes once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub ip: Ipv4Addr,
    pub link_ip: Ipv4Addr,
    pub serial: SerialNumber,
    pub status: ConnectionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_renders_colon_hex() {
        let mut bytes = [0u8; 16];
        bytes[0] = 0x0a;
        bytes[1] = 0xff;
        let s = SerialNumber(bytes).to_string();
        assert!(s.starts_with("0A:FF:00:"));
        assert_eq!(s.split(':').count(), 16);
    }

    #[test]
    fn mac_parse_and_display() {
        let mac: MacAddr = "02:42:AC:11:00:02".parse().unwrap();
        assert_eq!(mac.octets(), [0x02, 0x42, 0xac, 0x11, 0x00, 0x02]);
        assert_eq!(mac.to_string(), "02:42:ac:11:00:02");
        assert!("02:42:ac:11:00".parse::<MacAddr>().is_err());
        assert!("02:42:ac:11:00:02:03".parse::<MacAddr>().is_err());
        assert!("zz:42:ac:11:00:02".parse::<MacAddr>().is_err());
    }

    #[test]
    fn status_flag_and_toggle() {
        assert_eq!(ConnectionStatus::from_flag(1), ConnectionStatus::Connected);
        assert_eq!(ConnectionStatus::from_flag(0), ConnectionStatus::Disconnected);
        assert_eq!(ConnectionStatus::from_flag(7), ConnectionStatus::Disconnected);
        assert_eq!(
            ConnectionStatus::Connected.toggled(),
            ConnectionStatus::Disconnected
        );
    }
}
