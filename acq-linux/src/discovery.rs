//! Discovery/control client: UDP probe, connect and disconnect with timeout and retry.
//! Replies are applied to the shared registry; visible changes go out as notifications.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use acq_core::{
    decode_reply, ControlExchange, DeviceRegistry, DiscoveryPacket, DiscoveryReply, ExchangeError,
    LocalIdentity, ProtocolConfig, RegistryChange, RequestKind, Step,
};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::sink::{Notification, NotificationSender};

const RECV_BUF: usize = 1500;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("no reply from {target} after {attempts} attempts")]
    ConnectionFailed { target: SocketAddrV4, attempts: u32 },
    #[error("control endpoint: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Outcome of an exchange that got a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeReport {
    pub attempts: u32,
    pub source: SocketAddrV4,
    /// `None` when the reply could not be applied (toggle for an unknown device).
    pub change: Option<RegistryChange>,
}

pub struct ControlClient {
    config: ProtocolConfig,
    identity: LocalIdentity,
    registry: Arc<DeviceRegistry>,
    /// Dropped after a receive timeout and re-bound on the next send.
    endpoint: Mutex<Option<UdpSocket>>,
    events: NotificationSender,
}

impl ControlClient {
    pub async fn bind(
        config: ProtocolConfig,
        identity: LocalIdentity,
        registry: Arc<DeviceRegistry>,
        events: NotificationSender,
    ) -> io::Result<Self> {
        let socket = bind_endpoint(config.local_port).await?;
        info!(local = %socket.local_addr()?, ip = %identity.ip, mac = %identity.mac, "control endpoint up");
        Ok(Self {
            config,
            identity,
            registry,
            endpoint: Mutex::new(Some(socket)),
            events,
        })
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Local address of the endpoint, if currently bound.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.local_addr().ok())
    }

    /// Broadcast a probe and apply the first valid reply.
    pub async fn discover(&self) -> Result<ExchangeReport, ControlError> {
        let target = SocketAddrV4::new(self.config.broadcast_addr, self.config.device_port);
        self.exchange(RequestKind::Probe, target).await
    }

    /// Ask the controller at `ip` to connect or disconnect.
    pub async fn set_connection(
        &self,
        ip: Ipv4Addr,
        connect: bool,
    ) -> Result<ExchangeReport, ControlError> {
        let kind = if connect {
            RequestKind::Connect
        } else {
            RequestKind::Disconnect
        };
        let target = SocketAddrV4::new(ip, self.config.device_port);
        self.exchange(kind, target).await
    }

    async fn exchange(
        &self,
        kind: RequestKind,
        target: SocketAddrV4,
    ) -> Result<ExchangeReport, ControlError> {
        let datagram = DiscoveryPacket::request(kind, &self.identity).encode();
        let mut ex = ControlExchange::new(kind, self.config.retry_policy(kind));
        let mut received = None;
        let mut step = ex.begin()?;
        loop {
            step = match step {
                Step::Send { attempt } => {
                    let of = ex.policy().max_attempts();
                    debug!(%kind, %target, attempt, of, "sending request");
                    let (next, reply) = self.send_and_wait(&mut ex, &datagram, target).await?;
                    if reply.is_some() {
                        received = reply;
                    }
                    next
                }
                Step::AwaitReply { .. } => {
                    // Only produced inside send_and_wait, which holds the endpoint.
                    return Err(ExchangeError::InvalidTransition {
                        state: ex.state(),
                        event: "await",
                    }
                    .into());
                }
                Step::RetryAfter { delay } => {
                    debug!(%kind, %target, ?delay, "no reply, retrying");
                    tokio::time::sleep(delay).await;
                    ex.retry()?
                }
                Step::Complete { attempts } => {
                    let Some((reply, source)) = received else {
                        return Err(ExchangeError::InvalidTransition {
                            state: ex.state(),
                            event: "complete",
                        }
                        .into());
                    };
                    let change = self.apply(&reply, source);
                    return Ok(ExchangeReport {
                        attempts,
                        source,
                        change,
                    });
                }
                Step::Exhausted { attempts } => {
                    warn!(%kind, %target, attempts, "no reply, giving up");
                    let _ = self
                        .events
                        .send(Notification::ConnectionFailed { target, attempts });
                    return Err(ControlError::ConnectionFailed { target, attempts });
                }
            };
        }
    }

    /// One attempt: send, then wait out the receive timeout. The endpoint lock is held for both.
    async fn send_and_wait(
        &self,
        ex: &mut ControlExchange,
        datagram: &[u8],
        target: SocketAddrV4,
    ) -> Result<(Step, Option<(DiscoveryReply, SocketAddrV4)>), ControlError> {
        let mut slot = self.endpoint.lock().await;
        let socket = match slot.take() {
            Some(s) => slot.insert(s),
            None => slot.insert(bind_endpoint(self.config.local_port).await?),
        };
        self.drain_stale(socket);
        socket.send_to(datagram, SocketAddr::V4(target)).await?;
        let timeout = match ex.on_sent()? {
            Step::AwaitReply { timeout } => timeout,
            other => return Ok((other, None)),
        };
        // Probes are broadcast, so any controller may answer; everything else is unicast.
        let expected = match ex.kind() {
            RequestKind::Probe => None,
            RequestKind::Connect | RequestKind::Disconnect => Some(*target.ip()),
        };
        match self.recv_reply(socket, timeout, expected).await? {
            Some(reply) => Ok((ex.on_reply()?, Some(reply))),
            None => {
                *slot = None;
                Ok((ex.on_timeout()?, None))
            }
        }
    }

    /// Discard datagrams queued since the last exchange. Full replies still update the registry.
    fn drain_stale(&self, socket: &UdpSocket) {
        let mut buf = [0u8; RECV_BUF];
        loop {
            match socket.try_recv_from(&mut buf) {
                Ok((n, SocketAddr::V4(from))) => self.learn(&buf[..n], from, "stale datagram"),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(error = %e, "draining endpoint");
                    break;
                }
            }
        }
    }

    /// Apply a datagram that is not this exchange's answer, if it is a full reply.
    fn learn(&self, bytes: &[u8], from: SocketAddrV4, what: &str) {
        match decode_reply(bytes) {
            Ok(reply @ DiscoveryReply::Full { .. }) => {
                debug!(%from, reason = what, "applying identity");
                self.apply(&reply, from);
            }
            Ok(DiscoveryReply::Short { .. }) => debug!(%from, reason = what, "dropped"),
            Err(e) => warn!(%from, len = bytes.len(), error = %e, "malformed reply"),
        }
    }

    /// Wait up to `timeout` for a decodable reply from `expected` (any sender when `None`).
    /// Malformed datagrams and other senders are skipped without extending the deadline.
    async fn recv_reply(
        &self,
        socket: &UdpSocket,
        timeout: Duration,
        expected: Option<Ipv4Addr>,
    ) -> io::Result<Option<(DiscoveryReply, SocketAddrV4)>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; RECV_BUF];
        loop {
            let (n, from) =
                match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                    Ok(r) => r?,
                    Err(_) => return Ok(None),
                };
            let SocketAddr::V4(from) = from else {
                continue;
            };
            if expected.is_some_and(|ip| ip != *from.ip()) {
                self.learn(&buf[..n], from, "reply from another controller");
                continue;
            }
            match decode_reply(&buf[..n]) {
                Ok(reply) => return Ok(Some((reply, from))),
                Err(e) => warn!(%from, len = n, error = %e, "malformed reply"),
            }
        }
    }

    fn apply(&self, reply: &DiscoveryReply, source: SocketAddrV4) -> Option<RegistryChange> {
        match self.registry.apply_reply(reply, *source.ip()) {
            Ok(change) => {
                debug!(%source, ?change, "reply applied");
                if change.is_visible() {
                    let _ = self
                        .events
                        .send(Notification::DevicesChanged(self.registry.snapshot()));
                }
                Some(change)
            }
            Err(e) => {
                warn!(%source, error = %e, "reply ignored");
                None
            }
        }
    }
}

async fn bind_endpoint(port: u16) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}
