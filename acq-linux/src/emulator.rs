//! Device emulator: answers probe/connect/disconnect requests the way a controller does.
//! Used by `acq-linux emulate` and by the client and coordinator tests.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use acq_core::{
    encode_reply, ConnectionStatus, DiscoveryPacket, DiscoveryReply, RequestKind, SerialNumber,
    PROTOCOL_VERSION,
};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

pub struct DeviceEmulator {
    socket: UdpSocket,
    serial: SerialNumber,
    link_ip: Ipv4Addr,
    status: ConnectionStatus,
    /// Requests to swallow before answering, to exercise retries.
    drop_first: u32,
}

impl DeviceEmulator {
    pub async fn bind(addr: SocketAddr, serial: SerialNumber) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(true)?;
        let link_ip = match socket.local_addr()? {
            SocketAddr::V4(a) => *a.ip(),
            SocketAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };
        Ok(Self {
            socket,
            serial,
            link_ip,
            status: ConnectionStatus::Disconnected,
            drop_first: 0,
        })
    }

    pub fn with_link_ip(mut self, ip: Ipv4Addr) -> Self {
        self.link_ip = ip;
        self
    }

    pub fn with_status(mut self, status: ConnectionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn drop_first(mut self, n: u32) -> Self {
        self.drop_first = n;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Reply to `kind`, updating the emulated connection state.
    fn answer(&mut self, kind: RequestKind) -> DiscoveryReply {
        match kind {
            RequestKind::Probe => DiscoveryReply::Full {
                link_ip: self.link_ip,
                serial: self.serial,
                status: self.status,
            },
            RequestKind::Connect | RequestKind::Disconnect => {
                let wanted = if kind == RequestKind::Connect {
                    ConnectionStatus::Connected
                } else {
                    ConnectionStatus::Disconnected
                };
                let toggle = self.status != wanted;
                self.status = wanted;
                DiscoveryReply::Short { toggle }
            }
        }
    }

    pub async fn run(mut self) -> io::Result<()> {
        info!(addr = %self.socket.local_addr()?, serial = %self.serial, "emulated controller listening");
        let mut buf = vec![0u8; 1500];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            let packet = match DiscoveryPacket::decode(&buf[..n]) {
                Ok(p) => p,
                Err(e) => {
                    debug!(%from, error = %e, "ignoring datagram");
                    continue;
                }
            };
            if packet.version != PROTOCOL_VERSION {
                warn!(%from, version = packet.version, "unsupported protocol version");
                continue;
            }
            let Some(kind) = packet.kind() else {
                debug!(%from, codes = ?packet.type_codes, "unknown request type");
                continue;
            };
            if self.drop_first > 0 {
                self.drop_first -= 1;
                debug!(%from, %kind, "dropping request");
                continue;
            }
            let reply = self.answer(kind);
            debug!(%from, %kind, sender = %packet.sender_ip, mac = %packet.mac, ?reply, "answering");
            self.socket.send_to(&encode_reply(&reply), from).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acq_core::{decode_reply, LocalIdentity, MacAddr};
    use std::time::Duration;

    async fn ask(sock: &UdpSocket, to: SocketAddr, kind: RequestKind) -> DiscoveryReply {
        let id = LocalIdentity {
            ip: Ipv4Addr::LOCALHOST,
            mac: MacAddr::ZERO,
        };
        sock.send_to(&DiscoveryPacket::request(kind, &id).encode(), to)
            .await
            .unwrap();
        let mut buf = [0u8; 128];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), sock.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        decode_reply(&buf[..n]).unwrap()
    }

    #[tokio::test]
    async fn answers_like_a_controller() {
        let emu = DeviceEmulator::bind((Ipv4Addr::LOCALHOST, 0).into(), SerialNumber([9; 16]))
            .await
            .unwrap()
            .with_link_ip(Ipv4Addr::new(192, 168, 1, 10));
        let addr = emu.local_addr().unwrap();
        tokio::spawn(emu.run());
        let sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();

        assert_eq!(
            ask(&sock, addr, RequestKind::Probe).await,
            DiscoveryReply::Full {
                link_ip: Ipv4Addr::new(192, 168, 1, 10),
                serial: SerialNumber([9; 16]),
                status: ConnectionStatus::Disconnected,
            }
        );
        assert_eq!(
            ask(&sock, addr, RequestKind::Connect).await,
            DiscoveryReply::Short { toggle: true }
        );
        assert_eq!(
            ask(&sock, addr, RequestKind::Connect).await,
            DiscoveryReply::Short { toggle: false }
        );
        match ask(&sock, addr, RequestKind::Probe).await {
            DiscoveryReply::Full { status, .. } => assert_eq!(status, ConnectionStatus::Connected),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            ask(&sock, addr, RequestKind::Disconnect).await,
            DiscoveryReply::Short { toggle: true }
        );
    }

    #[tokio::test]
    async fn ignores_garbage() {
        let emu = DeviceEmulator::bind((Ipv4Addr::LOCALHOST, 0).into(), SerialNumber::default())
            .await
            .unwrap()
            .with_status(ConnectionStatus::Connected);
        let addr = emu.local_addr().unwrap();
        tokio::spawn(emu.run());
        let sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        sock.send_to(b"hello", addr).await.unwrap();
        match ask(&sock, addr, RequestKind::Probe).await {
            DiscoveryReply::Full { status, .. } => assert_eq!(status, ConnectionStatus::Connected),
            other => panic!("unexpected {other:?}"),
        }
    }
}
