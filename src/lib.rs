//! Fixed-capacity, real-time-safe polyphonic audio mixing.
//!
//! `sonomix` manages a pool of simultaneously playing sound instances
//! ("voices"), resamples each with pitch control, and blends them into an
//! interleaved stereo buffer on every device callback. Control happens
//! through recycle-safe voice handles and never blocks the audio thread
//! beyond a short, bounded lock.
//!
//! ```no_run
//! use sonomix::{Mixer, PcmSound, PlayParams, SonomixConfig, SonomixEngine};
//! use std::sync::Arc;
//!
//! # fn main() -> sonomix::Result<()> {
//! let mixer = Arc::new(Mixer::new());
//! let mut engine = SonomixEngine::new(SonomixConfig::default(), mixer.clone());
//! engine.start()?;
//!
//! // Assets are decoded PCM; decoding is the caller's concern.
//! let beep = Arc::new(PcmSound::from_mono(48000, &[0.0f32; 4800])?);
//! let voice = mixer.play(&beep, &PlayParams::default());
//! mixer.set_volume(voice, 0.5);
//! mixer.stop(voice); // fades out, never clicks
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod mixer;
pub mod sound;
pub mod voice;

pub use config::SonomixConfig;
pub use engine::SonomixEngine;
pub use error::{Result, SonomixError};
pub use events::MixerEvent;
pub use mixer::{CriticalSection, Mixer, PlayParams};
pub use sound::PcmSound;
pub use voice::{POOL_SIZE, VoiceHandle, VoiceState};
