//! Channel windower: per-channel fragment queues, drained into fixed-size aligned windows.

use std::collections::VecDeque;

use tracing::warn;

/// A run of consecutive samples for one channel, as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSample {
    pub channel: usize,
    pub values: Vec<f32>,
}

impl ChannelSample {
    pub fn new(channel: usize, values: Vec<f32>) -> Self {
        Self { channel, values }
    }
}

/// One acquisition frame: `channel_count` arrays of exactly `window_size` samples each.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    channels: Vec<Vec<f32>>,
}

impl Window {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn window_size(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, channel: usize) -> Option<&[f32]> {
        self.channels.get(channel).map(Vec::as_slice)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("channel {channel} out of range (channel count {channel_count})")]
    UnknownChannel { channel: usize, channel_count: usize },
    #[error("window size must be non-zero")]
    ZeroWindowSize,
    #[error("channel count must be non-zero")]
    ZeroChannelCount,
}

/// Buffers fragments per channel and emits a `Window` once every channel holds at least
/// `window_size` samples. Single writer, single drain caller.
#[derive(Debug)]
pub struct ChannelWindower {
    window_size: usize,
    queues: Vec<VecDeque<Vec<f32>>>,
    /// Samples currently queued per channel.
    buffered: Vec<usize>,
}

impl ChannelWindower {
    pub fn new(channel_count: usize, window_size: usize) -> Result<Self, WindowError> {
        if window_size == 0 {
            return Err(WindowError::ZeroWindowSize);
        }
        if channel_count == 0 {
            return Err(WindowError::ZeroChannelCount);
        }
        Ok(Self {
            window_size,
            queues: vec![VecDeque::new(); channel_count],
            buffered: vec![0; channel_count],
        })
    }

    pub fn channel_count(&self) -> usize {
        self.queues.len()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Samples queued for `channel` (0 for unknown channels).
    pub fn buffered(&self, channel: usize) -> usize {
        self.buffered.get(channel).copied().unwrap_or(0)
    }

    /// Append a fragment to the tail of its channel's queue.
    pub fn ingest(&mut self, sample: ChannelSample) -> Result<(), WindowError> {
        let channel_count = self.channel_count();
        let Some(queue) = self.queues.get_mut(sample.channel) else {
            warn!(
                channel = sample.channel,
                channel_count,
                samples = sample.values.len(),
                "dropping fragment for unknown channel"
            );
            return Err(WindowError::UnknownChannel {
                channel: sample.channel,
                channel_count,
            });
        };
        if sample.values.is_empty() {
            return Ok(());
        }
        self.buffered[sample.channel] += sample.values.len();
        queue.push_back(sample.values);
        Ok(())
    }

    /// True when every channel holds at least one window's worth of samples.
    pub fn is_ready(&self) -> bool {
        self.buffered.iter().all(|&n| n >= self.window_size)
    }

    /// Take exactly `window_size` samples from every channel, or nothing if any channel is short.
    pub fn try_drain_window(&mut self) -> Option<Window> {
        if !self.is_ready() {
            return None;
        }
        let size = self.window_size;
        let channels = self
            .queues
            .iter_mut()
            .zip(self.buffered.iter_mut())
            .map(|(queue, buffered)| {
                let out = take_front(queue, size);
                *buffered -= size;
                out
            })
            .collect();
        Some(Window { channels })
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.queues.iter_mut().for_each(VecDeque::clear);
        self.buffered.iter_mut().for_each(|n| *n = 0);
    }
}

/// Pop `count` samples in FIFO order. A fragment straddling the boundary is split and its
/// remainder goes back on the front. Caller guarantees the queue holds at least `count`.
fn take_front(queue: &mut VecDeque<Vec<f32>>, count: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        let Some(mut fragment) = queue.pop_front() else {
            break;
        };
        let need = count - out.len();
        if fragment.len() > need {
            let rest = fragment.split_off(need);
            queue.push_front(rest);
        }
        out.extend_from_slice(&fragment);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn sample(channel: usize, values: &[f32]) -> ChannelSample {
        ChannelSample::new(channel, values.to_vec())
    }

    #[test]
    fn concrete_two_channel_example() {
        let mut w = ChannelWindower::new(2, 4).unwrap();
        w.ingest(sample(0, &[1.0, 2.0, 3.0])).unwrap();
        w.ingest(sample(0, &[4.0, 5.0])).unwrap();
        w.ingest(sample(1, &[10.0, 20.0, 30.0, 40.0, 50.0])).unwrap();

        let window = w.try_drain_window().expect("window ready");
        assert_eq!(window.channel(0).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(window.channel(1).unwrap(), &[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(w.buffered(0), 1);
        assert_eq!(w.buffered(1), 1);
        assert_eq!(w.queues[0], VecDeque::from(vec![vec![5.0]]));
        assert_eq!(w.queues[1], VecDeque::from(vec![vec![50.0]]));
        assert!(w.try_drain_window().is_none());
    }

    #[test]
    fn waits_for_every_channel() {
        let mut w = ChannelWindower::new(3, 2).unwrap();
        w.ingest(sample(0, &[1.0, 2.0, 3.0])).unwrap();
        w.ingest(sample(1, &[1.0, 2.0])).unwrap();
        assert!(!w.is_ready());
        assert!(w.try_drain_window().is_none());
        assert_eq!(w.buffered(0), 3);
        w.ingest(sample(2, &[9.0])).unwrap();
        assert!(w.try_drain_window().is_none());
        w.ingest(sample(2, &[8.0])).unwrap();
        let window = w.try_drain_window().unwrap();
        assert_eq!(window.channel(2).unwrap(), &[9.0, 8.0]);
    }

    #[test]
    fn remainder_keeps_order_ahead_of_later_fragments() {
        let mut w = ChannelWindower::new(1, 3).unwrap();
        w.ingest(sample(0, &[1.0, 2.0, 3.0, 4.0, 5.0])).unwrap();
        w.ingest(sample(0, &[6.0, 7.0])).unwrap();
        assert_eq!(w.try_drain_window().unwrap().channel(0).unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(w.try_drain_window().unwrap().channel(0).unwrap(), &[4.0, 5.0, 6.0]);
        assert!(w.try_drain_window().is_none());
        assert_eq!(w.buffered(0), 1);
    }

    #[test]
    fn one_large_fragment_yields_several_windows() {
        let mut w = ChannelWindower::new(1, 2).unwrap();
        w.ingest(sample(0, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0])).unwrap();
        let mut n = 0;
        while let Some(window) = w.try_drain_window() {
            assert_eq!(window.window_size(), 2);
            n += 1;
        }
        assert_eq!(n, 3);
        assert_eq!(w.buffered(0), 1);
    }

    #[test]
    fn unknown_channel_is_dropped() {
        let mut w = ChannelWindower::new(2, 2).unwrap();
        assert_eq!(
            w.ingest(sample(2, &[1.0])),
            Err(WindowError::UnknownChannel {
                channel: 2,
                channel_count: 2
            })
        );
        assert_eq!(w.buffered(2), 0);
        assert_eq!(w.buffered(0), 0);
    }

    #[test]
    fn empty_fragment_is_noop() {
        let mut w = ChannelWindower::new(1, 1).unwrap();
        w.ingest(sample(0, &[])).unwrap();
        assert!(w.queues[0].is_empty());
        assert!(w.try_drain_window().is_none());
    }

    #[test]
    fn zero_sizes_rejected() {
        assert_eq!(
            ChannelWindower::new(8, 0).unwrap_err(),
            WindowError::ZeroWindowSize
        );
        assert_eq!(
            ChannelWindower::new(0, 16).unwrap_err(),
            WindowError::ZeroChannelCount
        );
    }

    #[test]
    fn clear_discards_partial_data() {
        let mut w = ChannelWindower::new(2, 4).unwrap();
        w.ingest(sample(0, &[1.0, 2.0, 3.0, 4.0])).unwrap();
        w.ingest(sample(1, &[1.0, 2.0])).unwrap();
        w.clear();
        assert_eq!(w.buffered(0), 0);
        w.ingest(sample(1, &[3.0, 4.0])).unwrap();
        assert!(w.try_drain_window().is_none());
    }

    /// Random fragment sizes across 8 channels: every window is aligned and the concatenated
    /// output per channel is a prefix of the input with only the undrained remainder missing.
    #[test]
    fn random_fragments_no_loss_and_aligned() {
        let mut rng = rand::thread_rng();
        let (channels, size) = (8, 37);
        let mut w = ChannelWindower::new(channels, size).unwrap();
        let mut input: Vec<Vec<f32>> = vec![Vec::new(); channels];
        let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];
        let mut next = vec![0u32; channels];

        for _ in 0..2000 {
            let ch = rng.gen_range(0..channels);
            let len = rng.gen_range(0..60);
            let values: Vec<f32> = (0..len)
                .map(|_| {
                    next[ch] += 1;
                    next[ch] as f32
                })
                .collect();
            input[ch].extend_from_slice(&values);
            w.ingest(ChannelSample::new(ch, values)).unwrap();
            while let Some(window) = w.try_drain_window() {
                assert_eq!(window.channel_count(), channels);
                for (ch, data) in window.into_channels().into_iter().enumerate() {
                    assert_eq!(data.len(), size);
                    output[ch].extend(data);
                }
            }
        }

        let windows = output[0].len() / size;
        for ch in 0..channels {
            assert_eq!(output[ch].len(), windows * size);
            assert_eq!(&input[ch][..output[ch].len()], output[ch].as_slice());
            assert_eq!(w.buffered(ch), input[ch].len() - output[ch].len());
        }
    }
}
