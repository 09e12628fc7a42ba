//! Configuration for sonomix

/// Output-side configuration shared by the mixer's device adapter.
///
/// The mixer itself is format-agnostic: it mixes into whatever buffer the
/// device callback hands it. This struct only describes the stream the
/// [`SonomixEngine`](crate::engine::SonomixEngine) opens.
#[derive(Debug, Clone)]
pub struct SonomixConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_size: usize,
}

impl Default for SonomixConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            block_size: 512,
        }
    }
}

impl SonomixConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }
}
