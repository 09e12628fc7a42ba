//! Immutable PCM sound assets.
//!
//! A [`PcmSound`] is a fully decoded, interleaved float buffer with a known
//! sample rate and channel count. Decoding compressed formats is a caller
//! concern; the mixer only ever reads these buffers.
//!
//! # Guard frame
//!
//! One extra frame equal to the first frame is appended past the logical end
//! of the buffer. Linear interpolation at position `frames - 1` can then read
//! "one sample past the end" without branching, and a looping voice that
//! interpolates across the wrap boundary lands exactly on the sample it will
//! play next. `data().len() == channels * (frames() + 1)` always holds.

use crate::error::{Result, SonomixError};

/// An immutable, decoded PCM buffer (mono or stereo, f32 samples).
///
/// Shared between the control threads and the audio thread as
/// `Arc<PcmSound>`; a playing voice keeps its own clone of the `Arc`, so
/// dropping the asset on the control side can never free memory the mixer is
/// still reading.
#[derive(Debug, Clone)]
pub struct PcmSound {
    /// Interleaved samples, guard frame included.
    data: Vec<f32>,
    frequency: u32,
    channels: u16,
    frames: usize,
}

impl PcmSound {
    /// Creates a mono asset from a slice of samples.
    pub fn from_mono(frequency: u32, samples: &[f32]) -> Result<Self> {
        Self::new(frequency, 1, samples)
    }

    /// Creates a stereo asset from interleaved `[L0, R0, L1, R1, ...]` samples.
    pub fn from_stereo(frequency: u32, samples: &[f32]) -> Result<Self> {
        if samples.len() % 2 != 0 {
            return Err(SonomixError::InvalidAsset(
                "interleaved stereo data must have an even number of samples".into(),
            ));
        }
        Self::new(frequency, 2, samples)
    }

    fn new(frequency: u32, channels: u16, samples: &[f32]) -> Result<Self> {
        if frequency == 0 {
            return Err(SonomixError::InvalidAsset("sample rate must be nonzero".into()));
        }
        if samples.is_empty() {
            return Err(SonomixError::InvalidAsset("sample data is empty".into()));
        }

        let ch = channels as usize;
        let frames = samples.len() / ch;
        let mut data = Vec::with_capacity(samples.len() + ch);
        data.extend_from_slice(samples);
        // Guard frame: wrap back to the first frame.
        for c in 0..ch {
            data.push(samples[c]);
        }

        Ok(Self {
            data,
            frequency,
            channels,
            frames,
        })
    }

    /// Sample rate in Hz.
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Number of channels (1 or 2).
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Logical number of frames, guard frame excluded.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frames as f64 / self.frequency as f64
    }

    /// The full interleaved buffer, guard frame included.
    ///
    /// This is what the mixer indexes; reads at `frames()` hit the guard.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// The logical interleaved samples, guard frame excluded.
    pub fn samples(&self) -> &[f32] {
        &self.data[..self.frames * self.channels as usize]
    }

    /// Extracts the asset as mono samples; stereo assets average L/R.
    pub fn mono_samples(&self) -> Vec<f32> {
        match self.channels {
            1 => self.samples().to_vec(),
            _ => self
                .samples()
                .chunks_exact(2)
                .map(|lr| (lr[0] + lr[1]) * 0.5)
                .collect(),
        }
    }

    /// Extracts the asset as interleaved stereo samples; mono assets duplicate
    /// each sample into both channels.
    pub fn stereo_samples(&self) -> Vec<f32> {
        match self.channels {
            2 => self.samples().to_vec(),
            _ => {
                let mut out = Vec::with_capacity(self.frames * 2);
                for &s in self.samples() {
                    out.push(s);
                    out.push(s);
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_guard_frame_wraps_to_first_sample() {
        let sound = PcmSound::from_mono(48000, &[0.25, -0.5, 0.75]).unwrap();
        assert_eq!(sound.frames(), 3);
        assert_eq!(sound.data().len(), 4);
        assert_eq!(sound.data()[3], 0.25);
        assert_eq!(sound.samples(), &[0.25, -0.5, 0.75]);
    }

    #[test]
    fn stereo_guard_frame_wraps_to_first_frame() {
        let sound = PcmSound::from_stereo(44100, &[0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(sound.frames(), 2);
        assert_eq!(sound.data().len(), 6);
        assert_eq!(sound.data()[4], 0.1);
        assert_eq!(sound.data()[5], 0.2);
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(PcmSound::from_mono(0, &[0.0]).is_err());
        assert!(PcmSound::from_mono(48000, &[]).is_err());
        assert!(PcmSound::from_stereo(48000, &[0.0, 0.1, 0.2]).is_err());
    }

    #[test]
    fn duration_uses_logical_frames() {
        let sound = PcmSound::from_mono(100, &[0.0; 50]).unwrap();
        assert_eq!(sound.duration(), 0.5);
    }

    #[test]
    fn channel_conversion_helpers() {
        let mono = PcmSound::from_mono(48000, &[0.5, -0.5]).unwrap();
        assert_eq!(mono.stereo_samples(), vec![0.5, 0.5, -0.5, -0.5]);

        let stereo = PcmSound::from_stereo(48000, &[1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(stereo.mono_samples(), vec![0.5, 0.5]);
    }
}
