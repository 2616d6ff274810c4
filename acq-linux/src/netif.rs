//! Local identity lookup: IPv4 from the routing table, MAC from sysfs.

use std::fs;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::path::Path;

use acq_core::{LocalIdentity, MacAddr};
use tracing::{debug, warn};

const SYS_NET: &str = "/sys/class/net";

/// Resolve the address pair embedded in requests. Configured values win.
pub fn resolve_identity(
    interface: Option<&str>,
    local_ip: Option<Ipv4Addr>,
    broadcast: Ipv4Addr,
    device_port: u16,
) -> io::Result<LocalIdentity> {
    let ip = match local_ip {
        Some(ip) => ip,
        None => routed_ipv4(broadcast, device_port)?,
    };
    let mac = match interface {
        Some(name) => read_mac(&Path::new(SYS_NET).join(name))?,
        None => first_interface_mac(Path::new(SYS_NET)).unwrap_or_else(|| {
            warn!("no network interface with a MAC address, sending zeroes");
            MacAddr::ZERO
        }),
    };
    debug!(%ip, %mac, "local identity");
    Ok(LocalIdentity { ip, mac })
}

/// Local address the kernel would use to reach `target`. `connect` on UDP sends nothing.
fn routed_ipv4(target: Ipv4Addr, port: u16) -> io::Result<Ipv4Addr> {
    let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    sock.set_broadcast(true)?;
    sock.connect((target, port))?;
    match sock.local_addr()? {
        SocketAddr::V4(a) => Ok(*a.ip()),
        SocketAddr::V6(_) => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no local IPv4 address",
        )),
    }
}

fn read_mac(iface_dir: &Path) -> io::Result<MacAddr> {
    let s = fs::read_to_string(iface_dir.join("address"))?;
    s.parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// First non-loopback interface (by name) with a non-zero MAC.
fn first_interface_mac(sys_net: &Path) -> Option<MacAddr> {
    let mut names: Vec<_> = fs::read_dir(sys_net)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name())
        .filter(|n| n != "lo")
        .collect();
    names.sort();
    names
        .into_iter()
        .filter_map(|n| read_mac(&sys_net.join(n)).ok())
        .find(|mac| !mac.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_iface(root: &Path, name: &str, mac: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("address"), format!("{mac}\n")).unwrap();
    }

    #[test]
    fn picks_first_real_interface() {
        let root = tempfile::tempdir().unwrap();
        fake_iface(root.path(), "lo", "00:00:00:00:00:00");
        fake_iface(root.path(), "dummy0", "00:00:00:00:00:00");
        fake_iface(root.path(), "eth1", "02:00:00:00:00:02");
        fake_iface(root.path(), "eth0", "02:00:00:00:00:01");
        assert_eq!(
            first_interface_mac(root.path()),
            Some(MacAddr([2, 0, 0, 0, 0, 1]))
        );
    }

    #[test]
    fn no_interfaces() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(first_interface_mac(root.path()), None);
        assert_eq!(first_interface_mac(&root.path().join("missing")), None);
    }

    #[test]
    fn configured_values_win() {
        let root = tempfile::tempdir().unwrap();
        fake_iface(root.path(), "eth0", "0a:0b:0c:0d:0e:0f");
        assert_eq!(
            read_mac(&root.path().join("eth0")).unwrap(),
            MacAddr([10, 11, 12, 13, 14, 15])
        );
        let ip = Ipv4Addr::new(10, 0, 0, 2);
        let id = resolve_identity(None, Some(ip), Ipv4Addr::LOCALHOST, 9090).unwrap();
        assert_eq!(id.ip, ip);
    }
}
