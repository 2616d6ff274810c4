//! Controller acquisition core: discovery/control protocol and multi-channel windowing.
//! No I/O; the host owns sockets and clocks, passes in what it received and acts on what
//! comes back.

pub mod config;
pub mod device;
pub mod exchange;
pub mod protocol;
pub mod registry;
pub mod wire;
pub mod window;

pub use config::{AcquisitionConfig, ConfigError, ProtocolConfig};
pub use device::{ConnectionStatus, DeviceRecord, LocalIdentity, MacAddr, SerialNumber};
pub use exchange::{ControlExchange, ExchangeError, ExchangeState, RetryPolicy, Step};
pub use protocol::{RequestKind, PROTOCOL_VERSION};
pub use registry::{DeviceRegistry, RegistryChange, RegistryError};
pub use wire::{decode_reply, encode_reply, DiscoveryPacket, DiscoveryReply, PacketDecodeError};
pub use window::{ChannelSample, ChannelWindower, Window, WindowError};
