//! Linux host for the acquisition core: UDP control client, acquisition sessions, sinks.

pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod emulator;
pub mod netif;
pub mod sink;
pub mod synthetic;
pub mod transport;

pub use coordinator::{AcquisitionCoordinator, AcquisitionError, SessionStats};
pub use discovery::{ControlClient, ControlError, ExchangeReport};
pub use emulator::DeviceEmulator;
pub use sink::{
    notification_channel, spawn_persistence_worker, spawn_visualization_worker, LogSink,
    Notification, PersistenceSink, TextFileSink, VisualizationSink,
};
pub use synthetic::SyntheticSource;
pub use transport::{delivery_queue, QueueSource, SampleSource, TransportError};
