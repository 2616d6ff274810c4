//! Synthetic sample source: per-channel sine waves cut into random-length fragments,
//! paced at a fixed sample rate. Stands in for the bulk transport in demos and soak runs.

use std::f64::consts::TAU;
use std::time::Instant;

use acq_core::ChannelSample;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::transport::{SampleSource, TransportError};

pub struct SyntheticSource {
    channel_count: usize,
    sample_rate: f64,
    max_fragment: usize,
    /// Samples produced so far, per channel.
    produced: Vec<u64>,
    next_channel: usize,
    started: Option<Instant>,
    rng: StdRng,
}

impl SyntheticSource {
    /// `sample_rate` is per channel, in samples per second.
    pub fn new(channel_count: usize, sample_rate: f64, max_fragment: usize) -> Self {
        Self {
            channel_count,
            sample_rate,
            max_fragment: max_fragment.max(1),
            produced: vec![0; channel_count],
            next_channel: 0,
            started: None,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn value(channel: usize, n: u64, sample_rate: f64) -> f32 {
        let freq = 5.0 * (channel as f64 + 1.0);
        let t = n as f64 / sample_rate;
        (TAU * freq * t).sin() as f32
    }
}

impl SampleSource for SyntheticSource {
    fn try_read(&mut self) -> Result<Option<ChannelSample>, TransportError> {
        let Some(started) = self.started else {
            return Ok(None);
        };
        if self.channel_count == 0 {
            return Ok(None);
        }
        let due = (started.elapsed().as_secs_f64() * self.sample_rate) as u64;
        let channel = self.next_channel;
        let backlog = due.saturating_sub(self.produced[channel]);
        if backlog == 0 {
            return Ok(None);
        }
        self.next_channel = (channel + 1) % self.channel_count;
        let len = self
            .rng
            .gen_range(1..=self.max_fragment)
            .min(backlog as usize);
        let start = self.produced[channel];
        let values = (start..start + len as u64)
            .map(|n| Self::value(channel, n, self.sample_rate))
            .collect();
        self.produced[channel] += len as u64;
        Ok(Some(ChannelSample::new(channel, values)))
    }

    fn begin(&mut self) -> Result<(), TransportError> {
        self.produced.iter_mut().for_each(|n| *n = 0);
        self.next_channel = 0;
        self.started = Some(Instant::now());
        Ok(())
    }

    fn end(&mut self) -> Result<(), TransportError> {
        self.started = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn idle_until_begin() {
        let mut src = SyntheticSource::new(2, 1000.0, 16);
        assert_eq!(src.try_read(), Ok(None));
    }

    #[test]
    fn paced_round_robin_fragments() {
        let mut src = SyntheticSource::new(2, 10_000.0, 16).with_seed(7);
        src.begin().unwrap();
        let mut per_channel = [0usize; 2];
        let mut last = None;
        let deadline = Instant::now() + Duration::from_secs(2);
        while per_channel.iter().any(|&n| n < 100) && Instant::now() < deadline {
            let Some(sample) = src.try_read().unwrap() else {
                std::thread::sleep(Duration::from_millis(1));
                continue;
            };
            assert!(!sample.values.is_empty() && sample.values.len() <= 16);
            if let Some(prev) = last {
                assert_ne!(prev, sample.channel);
            }
            last = Some(sample.channel);
            per_channel[sample.channel] += sample.values.len();
        }
        assert!(per_channel.iter().all(|&n| n >= 100));
        src.end().unwrap();
        assert_eq!(src.try_read(), Ok(None));
    }
}
