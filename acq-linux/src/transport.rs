//! Transport seam: where per-channel fragments come from. The bulk transport itself lives
//! outside this crate and hands fragments over through a bounded queue.

use acq_core::ChannelSample;
use tokio::sync::mpsc::{self, error::TryRecvError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Non-blocking source of fragments. `try_read` returns `Ok(None)` when nothing is queued.
pub trait SampleSource: Send + 'static {
    fn try_read(&mut self) -> Result<Option<ChannelSample>, TransportError>;

    /// Ask the controller to start streaming. Called once per acquisition session.
    fn begin(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Ask the controller to stop streaming.
    fn end(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Receiving end of the transport's bounded delivery queue.
pub struct QueueSource {
    rx: mpsc::Receiver<ChannelSample>,
}

/// Bounded delivery queue: the transport keeps the sender, the coordinator reads the source.
pub fn delivery_queue(capacity: usize) -> (mpsc::Sender<ChannelSample>, QueueSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, QueueSource { rx })
}

impl SampleSource for QueueSource {
    fn try_read(&mut self) -> Result<Option<ChannelSample>, TransportError> {
        match self.rx.try_recv() {
            Ok(sample) => Ok(Some(sample)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Unavailable(
                "delivery queue closed".into(),
            )),
        }
    }
}
