//! Acquisition coordinator: ties discovery/control, the sample source, the windower and the
//! sink queues into start/stop sessions.

use std::sync::Arc;
use std::time::Duration;

use acq_core::{AcquisitionConfig, ChannelWindower, Window, WindowError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::discovery::ControlClient;
use crate::sink::{Notification, NotificationSender};
use crate::transport::{SampleSource, TransportError};

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub fragments: u64,
    /// Samples accepted by the windower.
    pub samples: u64,
    /// Fragments for channels outside `0..channel_count`.
    pub dropped_fragments: u64,
    pub windows: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("acquisition already running")]
    AlreadyRunning,
    #[error("acquisition not running")]
    NotRunning,
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("ingestion worker failed: {0}")]
    Worker(String),
}

type IngestResult<S> = (S, Result<SessionStats, TransportError>);

struct Session<S> {
    id: Uuid,
    cancel: watch::Sender<bool>,
    ingest: JoinHandle<IngestResult<S>>,
}

pub struct AcquisitionCoordinator<S: SampleSource> {
    config: AcquisitionConfig,
    control: Arc<ControlClient>,
    /// Parked here between sessions; owned by the ingestion worker while running.
    source: Option<S>,
    sinks: Vec<mpsc::Sender<Arc<Window>>>,
    events: NotificationSender,
    session: Option<Session<S>>,
}

impl<S: SampleSource> AcquisitionCoordinator<S> {
    /// Every drained window goes to each of `sinks`, in order.
    pub fn new(
        config: AcquisitionConfig,
        control: Arc<ControlClient>,
        source: S,
        sinks: Vec<mpsc::Sender<Arc<Window>>>,
        events: NotificationSender,
    ) -> Self {
        Self {
            config,
            control,
            source: Some(source),
            sinks,
            events,
            session: None,
        }
    }

    /// False once the ingestion worker has exited, even before `stop()` collects it.
    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.ingest.is_finished())
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Start a session. A session whose worker already ended is collected first.
    pub async fn start(&mut self) -> Result<Uuid, AcquisitionError> {
        if self.is_running() {
            return Err(AcquisitionError::AlreadyRunning);
        }
        if self.session.is_some() {
            if let Err(e) = self.stop().await {
                warn!(error = %e, "previous session ended with an error");
            }
        }
        let windower = ChannelWindower::new(self.config.channel_count, self.config.window_size)?;
        let mut source = self
            .source
            .take()
            .ok_or_else(|| AcquisitionError::Worker("sample source lost".into()))?;

        if let Err(e) = source.begin() {
            self.source = Some(source);
            return Err(e.into());
        }

        let control = self.control.clone();
        tokio::spawn(async move { ensure_connected(&control).await });

        let id = Uuid::new_v4();
        let (cancel, cancelled) = watch::channel(false);
        let ingest = tokio::spawn(ingest(
            source,
            windower,
            self.sinks.clone(),
            cancelled,
            self.config.idle_poll(),
            self.events.clone(),
        ));
        info!(session = %id, channels = self.config.channel_count, window = self.config.window_size, "acquisition started");
        self.session = Some(Session { id, cancel, ingest });
        Ok(id)
    }

    /// End the session and collect its worker. Samples not yet drained into a window are
    /// discarded; a transport failure that ended the session early is returned here.
    pub async fn stop(&mut self) -> Result<SessionStats, AcquisitionError> {
        let session = self.session.take().ok_or(AcquisitionError::NotRunning)?;
        let _ = session.cancel.send(true);
        let (source, result) = session
            .ingest
            .await
            .map_err(|e| AcquisitionError::Worker(e.to_string()))?;
        self.source = Some(source);
        let stats = result?;
        info!(
            session = %session.id,
            windows = stats.windows,
            samples = stats.samples,
            dropped = stats.dropped_fragments,
            "acquisition stopped"
        );
        Ok(stats)
    }
}

/// Discover and connect the first disconnected controller, unless one is already connected.
async fn ensure_connected(control: &ControlClient) {
    if control.registry().first_connected().is_some() {
        return;
    }
    if let Err(e) = control.discover().await {
        warn!(error = %e, "discovery failed");
    }
    let Some(device) = control.registry().first_disconnected() else {
        debug!("no controller to connect");
        return;
    };
    match control.set_connection(device.ip, true).await {
        Ok(_) => info!(ip = %device.ip, serial = %device.serial, "controller connected"),
        Err(e) => warn!(ip = %device.ip, error = %e, "connect failed"),
    }
}

async fn ingest<S: SampleSource>(
    mut source: S,
    mut windower: ChannelWindower,
    sinks: Vec<mpsc::Sender<Arc<Window>>>,
    mut cancelled: watch::Receiver<bool>,
    idle: Duration,
    events: NotificationSender,
) -> IngestResult<S> {
    let mut stats = SessionStats::default();
    let result = 'session: loop {
        if *cancelled.borrow() {
            break Ok(());
        }
        match source.try_read() {
            Ok(Some(sample)) => {
                stats.fragments += 1;
                let n = sample.values.len() as u64;
                match windower.ingest(sample) {
                    Ok(()) => stats.samples += n,
                    Err(_) => stats.dropped_fragments += 1,
                }
            }
            Ok(None) => {
                tokio::select! {
                    changed = cancelled.changed() => if changed.is_err() { break Ok(()); },
                    _ = tokio::time::sleep(idle) => {}
                }
                continue;
            }
            Err(e) => {
                warn!(error = %e, "transport failed, ending session");
                let _ = events.send(Notification::AcquisitionFailed {
                    reason: e.to_string(),
                });
                break Err(e);
            }
        }
        while !*cancelled.borrow() {
            let Some(window) = windower.try_drain_window() else {
                break;
            };
            stats.windows += 1;
            let window = Arc::new(window);
            for tx in &sinks {
                tokio::select! {
                    sent = tx.send(window.clone()) => if sent.is_err() {
                        debug!("sink closed, window dropped");
                    },
                    _ = cancelled.changed() => break 'session Ok(()),
                }
            }
        }
    };
    windower.clear();
    if let Err(e) = source.end() {
        warn!(error = %e, "failed to stop stream");
    }
    (source, result.map(|()| stats))
}
