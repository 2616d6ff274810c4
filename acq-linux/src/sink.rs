//! Downstream consumers: visualization and persistence sinks, and the workers that own them.
//!
//! Sinks never run on the network or ingestion tasks; they get device-list changes and
//! windows over channels.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use acq_core::{DeviceRecord, Window};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events for the visualization side, emitted by the control client and the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    DevicesChanged(Vec<DeviceRecord>),
    /// Retries exhausted; recoverable.
    ConnectionFailed { target: SocketAddrV4, attempts: u32 },
    /// The transport went away and the acquisition session ended.
    AcquisitionFailed { reason: String },
}

pub type NotificationSender = mpsc::UnboundedSender<Notification>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

pub fn notification_channel() -> (NotificationSender, NotificationReceiver) {
    mpsc::unbounded_channel()
}

pub trait VisualizationSink: Send + 'static {
    fn on_device_list_changed(&mut self, devices: &[DeviceRecord]);

    fn on_window_ready(&mut self, window: &Window);

    fn on_connection_failed(&mut self, target: SocketAddrV4, attempts: u32) {
        warn!(%target, attempts, "device did not answer");
    }

    fn on_acquisition_failed(&mut self, reason: &str) {
        warn!(reason, "acquisition stopped");
    }
}

pub trait PersistenceSink: Send + 'static {
    fn on_window_ready(&mut self, window: &Window) -> io::Result<()>;
}

/// Run `sink` until both the notification and window channels close.
pub fn spawn_visualization_worker<V: VisualizationSink>(
    mut sink: V,
    mut notifications: NotificationReceiver,
    mut windows: mpsc::Receiver<Arc<Window>>,
) -> JoinHandle<V> {
    tokio::spawn(async move {
        let (mut notes_open, mut windows_open) = (true, true);
        while notes_open || windows_open {
            tokio::select! {
                note = notifications.recv(), if notes_open => match note {
                    Some(Notification::DevicesChanged(devices)) => sink.on_device_list_changed(&devices),
                    Some(Notification::ConnectionFailed { target, attempts }) => {
                        sink.on_connection_failed(target, attempts)
                    }
                    Some(Notification::AcquisitionFailed { reason }) => sink.on_acquisition_failed(&reason),
                    None => notes_open = false,
                },
                window = windows.recv(), if windows_open => match window {
                    Some(window) => sink.on_window_ready(&window),
                    None => windows_open = false,
                },
            }
        }
        sink
    })
}

/// Run `sink` until the window channel closes. File I/O goes to the blocking pool.
/// Write failures are logged and the window is skipped.
pub fn spawn_persistence_worker<P: PersistenceSink>(
    sink: P,
    mut windows: mpsc::Receiver<Arc<Window>>,
) -> JoinHandle<io::Result<P>> {
    tokio::spawn(async move {
        let mut sink = sink;
        while let Some(window) = windows.recv().await {
            let (back, result) = tokio::task::spawn_blocking(move || {
                let r = sink.on_window_ready(&window);
                (sink, r)
            })
            .await
            .map_err(io::Error::other)?;
            sink = back;
            if let Err(e) = result {
                warn!(error = %e, "failed to persist window");
            }
        }
        Ok(sink)
    })
}

/// Visualization sink for headless runs: logs device lists and window summaries.
#[derive(Debug, Default)]
pub struct LogSink {
    windows: u64,
}

impl VisualizationSink for LogSink {
    fn on_device_list_changed(&mut self, devices: &[DeviceRecord]) {
        for d in devices {
            info!(ip = %d.ip, link_ip = %d.link_ip, serial = %d.serial, status = %d.status, "device");
        }
    }

    fn on_window_ready(&mut self, window: &Window) {
        self.windows += 1;
        let peak = window
            .channels()
            .iter()
            .flatten()
            .fold(0f32, |m, v| m.max(v.abs()));
        debug!(
            window = self.windows,
            channels = window.channel_count(),
            samples = window.window_size(),
            peak,
            "window"
        );
    }
}

/// Writes each window to its own text file: `CH<n>:` headers, `<index>-<value>` lines.
pub struct TextFileSink {
    dir: PathBuf,
    run: Uuid,
    sequence: u64,
}

impl TextFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            run: Uuid::new_v4(),
            sequence: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_path(&mut self) -> PathBuf {
        self.sequence += 1;
        self.dir
            .join(format!("{}-{:06}.txt", self.run.simple(), self.sequence))
    }
}

/// Round to 5 decimals the way the reference files are written.
fn round5(v: f32) -> f64 {
    (f64::from(v) * 1e5).round() / 1e5
}

pub fn write_window(out: &mut impl Write, window: &Window) -> io::Result<()> {
    for (ch, data) in window.channels().iter().enumerate() {
        if data.is_empty() {
            continue;
        }
        writeln!(out, "CH{}:", ch + 1)?;
        for (i, v) in data.iter().enumerate() {
            writeln!(out, "{}-{}", i, round5(*v))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

impl PersistenceSink for TextFileSink {
    fn on_window_ready(&mut self, window: &Window) -> io::Result<()> {
        let path = self.next_path();
        let mut out = BufWriter::new(File::create(&path)?);
        write_window(&mut out, window)?;
        out.flush()?;
        debug!(path = %path.display(), "window persisted");
        Ok(())
    }
}
