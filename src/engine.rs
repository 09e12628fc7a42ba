//! cpal output-device adapter.
//!
//! Opens the default output device and drives [`Mixer::fill_buffer`] from
//! the stream's data callback. The mixer itself has no device dependency;
//! any pull-model backend can call `fill_buffer` directly instead.

use crate::config::SonomixConfig;
use crate::error::{Result, SonomixError};
use crate::mixer::Mixer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Audio output engine pulling mixed audio from a shared [`Mixer`].
pub struct SonomixEngine {
    config: SonomixConfig,
    mixer: Arc<Mixer>,
    stream: Option<cpal::Stream>,
    is_running: Arc<AtomicBool>,
}

impl SonomixEngine {
    pub fn new(config: SonomixConfig, mixer: Arc<Mixer>) -> Self {
        Self {
            config,
            mixer,
            stream: None,
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opens the default output device and starts the stream.
    ///
    /// Until this succeeds (and after [`stop`](Self::stop)) the data
    /// callback emits silence. Failures are logged and returned; the mixer
    /// stays usable either way, its output just goes nowhere.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            log::error!("no default audio output device available");
            SonomixError::AudioDevice("No default output device available".into())
        })?;

        let stream_config = cpal::StreamConfig {
            channels: self.config.channels,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.config.block_size as u32),
        };

        let default_config = device.default_output_config().map_err(|e| {
            SonomixError::AudioDevice(format!("Failed to get default config: {e}"))
        })?;

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => self.build_stream::<f32>(&device, &stream_config)?,
            cpal::SampleFormat::I16 => self.build_stream::<i16>(&device, &stream_config)?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>(&device, &stream_config)?,
            format => {
                return Err(SonomixError::AudioFormat(format!(
                    "Unsupported sample format: {format:?}"
                )));
            }
        };

        stream.play().map_err(|e| {
            log::error!("failed to start audio stream: {e}");
            SonomixError::AudioDevice(format!("Failed to start stream: {e}"))
        })?;

        self.stream = Some(stream);
        self.is_running.store(true, Ordering::Relaxed);
        log::debug!(
            "audio stream started: {} Hz, {} channels, block {}",
            self.config.sample_rate,
            self.config.channels,
            self.config.block_size
        );

        Ok(())
    }

    /// Stops and drops the stream. The mixer keeps its voice state; playback
    /// resumes where it left off on the next [`start`](Self::start).
    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            self.is_running.store(false, Ordering::Relaxed);
            drop(stream);
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &SonomixConfig {
        &self.config
    }

    /// The output sample rate the mixer is driven at.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn build_stream<T>(&self, device: &cpal::Device, config: &cpal::StreamConfig) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let mixer = self.mixer.clone();
        let is_running = self.is_running.clone();
        let sample_rate = self.config.sample_rate;
        let channels = self.config.channels;
        // Fixed staging buffer; a device callback larger than the
        // negotiated block is rendered through it in block-sized pieces,
        // never by reallocating on the audio thread.
        let mut scratch = vec![0.0f32; self.config.block_size.max(1) * channels as usize];

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if is_running.load(Ordering::Relaxed) {
                        render_blocks(&mixer, &mut scratch, data, sample_rate, channels);
                    } else {
                        for out in data.iter_mut() {
                            *out = T::from_sample(0.0f32);
                        }
                    }
                },
                move |err| {
                    log::error!("audio stream error: {err}");
                },
                None,
            )
            .map_err(|e| SonomixError::AudioDevice(format!("Failed to build stream: {e}")))?;

        Ok(stream)
    }
}

impl Drop for SonomixEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Pulls mixed audio into `data` through the fixed `scratch` buffer, one
/// staging-buffer-sized piece at a time. `scratch` is a whole number of
/// frames, so every piece stays frame-aligned.
fn render_blocks<T>(
    mixer: &Mixer,
    scratch: &mut [f32],
    data: &mut [T],
    sample_rate: u32,
    channels: u16,
) where
    T: SizedSample + FromSample<f32>,
{
    for block in data.chunks_mut(scratch.len()) {
        let buf = &mut scratch[..block.len()];
        mixer.fill_buffer(buf, sample_rate, channels);
        for (out, &sample) in block.iter_mut().zip(buf.iter()) {
            *out = T::from_sample(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::PcmSound;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn oversized_callback_renders_through_the_fixed_staging_buffer() {
        init_logging();
        let mixer = Mixer::new();
        let sound = Arc::new(PcmSound::from_mono(48000, &vec![0.5f32; 48000]).unwrap());
        mixer.play_looped(&sound, 1.0);

        // Device asks for four times the negotiated block.
        let mut scratch = vec![0.0f32; 512 * 2];
        let mut data = vec![0.0f32; 512 * 2 * 4];
        render_blocks(&mixer, &mut scratch, &mut data, 48000, 2);

        assert_eq!(scratch.len(), 512 * 2);
        assert!(data.iter().all(|&s| s == 0.5));
        assert_eq!(mixer.total_samples_played(), 512 * 4);
    }

    #[test]
    fn partial_final_block_is_frame_aligned() {
        init_logging();
        let mixer = Mixer::new();
        let sound = Arc::new(PcmSound::from_stereo(48000, &{
            let mut s = Vec::new();
            for _ in 0..48000 {
                s.push(0.8);
                s.push(0.2);
            }
            s
        })
        .unwrap());
        mixer.play_looped(&sound, 1.0);

        let mut scratch = vec![0.0f32; 64 * 2];
        // 100 frames: one full 64-frame block plus a 36-frame remainder.
        let mut data = vec![0.0f32; 100 * 2];
        render_blocks(&mixer, &mut scratch, &mut data, 48000, 2);

        for frame in data.chunks_exact(2) {
            assert_eq!(frame[0], 0.8);
            assert_eq!(frame[1], 0.2);
        }
        assert_eq!(mixer.total_samples_played(), 100);
    }
}
