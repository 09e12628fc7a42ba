//! The polyphonic mixer: voice pool, control API and the mixing engine.
//!
//! # Architecture
//!
//! - **Control threads**: any number of threads mutate voices through the
//!   handle-based API (`play`, `stop`, `set_volume`, ...).
//! - **Audio thread**: exactly one device callback pulls
//!   [`Mixer::fill_buffer`] at the cadence the hardware demands.
//!
//! A single mutex serializes both sides. Every critical section is short and
//! bounded: O(pool size) arithmetic, no allocation, no I/O. Errors never
//! surface on this path; invalid handles and exhausted pools are silent
//! no-ops so the audio thread cannot be stalled or unwound.

use crate::events::MixerEvent;
use crate::sound::PcmSound;
use crate::voice::{MixOutcome, POOL_SIZE, Voice, VoiceHandle, VoiceState};
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};

/// Frames per mixing sub-chunk. Volume-ramp targets and fast/slow path
/// decisions are recomputed at this granularity.
const SUB_CHUNK: usize = 256;

const MIN_PITCH: f32 = 1e-5;
const MAX_PITCH: f32 = 1000.0;
const MAX_VOLUME: f32 = 100_000.0;

/// Parameters for starting a voice.
///
/// `start_time` / `end_time` are seconds into the asset and are converted to
/// sample indices (clamped into the asset) at play time. `end_time` defaults
/// to infinity, meaning "to the end of the asset".
///
/// A positive `defer_seconds` delays the start by that much mixed time. A
/// negative value does *not* schedule into the past: playback starts
/// immediately with the position seeked to `-defer_seconds` seconds into the
/// buffer (clamped to the stop bound).
#[derive(Debug, Clone)]
pub struct PlayParams {
    pub volume: f32,
    pub pitch: f32,
    pub pan: f32,
    pub start_time: f64,
    pub end_time: f64,
    pub looping: bool,
    pub defer_seconds: f64,
}

impl Default for PlayParams {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pitch: 1.0,
            pan: 0.0,
            start_time: 0.0,
            end_time: f64::INFINITY,
            looping: false,
            defer_seconds: 0.0,
        }
    }
}

struct MixerInner {
    /// Fixed pool; slot 0 is reserved so the zero handle never validates.
    voices: Vec<Voice>,
    master_volume: f32,
    total_samples_played: i64,
    total_time_played: f64,
    events: Option<Sender<MixerEvent>>,
}

impl MixerInner {
    fn new() -> Self {
        let mut voices = Vec::with_capacity(POOL_SIZE);
        voices.resize_with(POOL_SIZE, Voice::default);
        Self {
            voices,
            master_volume: 1.0,
            total_samples_played: 0,
            total_time_played: 0.0,
            events: None,
        }
    }

    /// Linear scan for a free slot. Returns `None` when all usable slots are
    /// occupied; the caller drops the play request (no queueing, no stealing).
    fn allocate(&mut self) -> Option<usize> {
        for idx in 1..POOL_SIZE {
            if self.voices[idx].is_idle() {
                let voice = &mut self.voices[idx];
                voice.generation = voice.generation.wrapping_add(POOL_SIZE as u32);
                return Some(idx);
            }
        }
        None
    }

    /// Resolves a handle to its slot, rejecting stale and null handles.
    fn resolve(&self, handle: VoiceHandle) -> Option<usize> {
        let idx = handle.index();
        if idx != 0 && self.voices[idx].generation == handle.generation() {
            Some(idx)
        } else {
            None
        }
    }

    fn play(&mut self, sound: &Arc<PcmSound>, params: &PlayParams) -> VoiceHandle {
        // Too short to interpolate through; nothing sensible to play.
        if sound.frames() <= 2 {
            return VoiceHandle::NULL;
        }
        let Some(idx) = self.allocate() else {
            return VoiceHandle::NULL;
        };

        let pitch = params.pitch.clamp(MIN_PITCH, MAX_PITCH);
        let pan = params.pan.clamp(-1.0, 1.0);
        let volume = params.volume.clamp(0.0, MAX_VOLUME);

        let freq = sound.frequency() as f64;
        let last = (sound.frames() - 1) as f64;
        let start = (((params.start_time * freq) as i64) as f64).clamp(0.0, last);
        let stop = (((params.end_time * freq) as i64) as f64).clamp(start, last);
        let mut pos = start;
        if params.defer_seconds < 0.0 {
            // Seek-on-start: negative deferral jumps that far into the
            // buffer instead of delaying playback.
            pos = (((-params.defer_seconds * freq) as i64) as f64).min(stop);
        }

        let master = self.master_volume;
        let voice = &mut self.voices[idx];
        voice.sound = Some(sound.clone());
        voice.pitch = pitch;
        voice.volume = volume;
        voice.pan = pan;
        // Smoothed volumes start at their targets; ramping in from zero
        // would soften every attack.
        voice.volume_l = master * volume * (1.0 + pan).min(1.0);
        voice.volume_r = master * volume * (1.0 - pan).min(1.0);
        voice.trend_l = 0.0;
        voice.trend_r = 0.0;
        voice.pos = pos;
        voice.start_pos = start;
        voice.stop_pos = stop;
        voice.looping = params.looping;
        voice.time_to_start = params.defer_seconds.max(0.0);
        voice.state = if voice.time_to_start != 0.0 {
            VoiceState::WaitingStart
        } else {
            VoiceState::Playing
        };
        voice.handle = VoiceHandle::pack(idx, voice.generation);
        voice.handle
    }

    fn stop(&mut self, handle: VoiceHandle) {
        if let Some(idx) = self.resolve(handle) {
            self.voices[idx].begin_fade();
        }
    }

    fn stop_all(&mut self) {
        for voice in &mut self.voices[1..] {
            voice.begin_fade();
        }
    }

    /// Force-fades every voice playing the given asset. Call before dropping
    /// the last control-side reference to an asset that must go silent; the
    /// voices' own `Arc` clones keep the memory alive until their fades end.
    fn stop_sound(&mut self, sound: &Arc<PcmSound>) {
        for voice in &mut self.voices[1..] {
            let matches = voice
                .sound
                .as_ref()
                .is_some_and(|s| Arc::ptr_eq(s, sound));
            if matches {
                voice.begin_fade();
            }
        }
    }

    fn set_pitch(&mut self, handle: VoiceHandle, pitch: f32) {
        if let Some(idx) = self.resolve(handle) {
            self.voices[idx].pitch = pitch.clamp(MIN_PITCH, MAX_PITCH);
        }
    }

    fn set_volume(&mut self, handle: VoiceHandle, volume: f32) {
        if let Some(idx) = self.resolve(handle) {
            self.voices[idx].volume = volume.clamp(0.0, MAX_VOLUME);
        }
    }

    fn set_pan(&mut self, handle: VoiceHandle, pan: f32) {
        if let Some(idx) = self.resolve(handle) {
            self.voices[idx].pan = pan.clamp(-1.0, 1.0);
        }
    }

    fn seek(&mut self, handle: VoiceHandle, seconds: f64) {
        let Some(idx) = self.resolve(handle) else {
            return;
        };
        let voice = &mut self.voices[idx];
        let Some(sound) = &voice.sound else {
            return;
        };
        let pos = (sound.frequency() as f64 * seconds).floor();
        voice.pos = pos.clamp(voice.start_pos, voice.stop_pos);
    }

    fn is_playing(&self, handle: VoiceHandle) -> bool {
        match self.resolve(handle) {
            Some(idx) => self.voices[idx].state != VoiceState::Fading,
            None => false,
        }
    }

    fn play_position(&self, handle: VoiceHandle) -> f64 {
        let Some(idx) = self.resolve(handle) else {
            return 0.0;
        };
        let voice = &self.voices[idx];
        match (&voice.sound, voice.state) {
            (Some(sound), VoiceState::Playing) => voice.pos / sound.frequency() as f64,
            _ => 0.0,
        }
    }

    fn fill_buffer(&mut self, out: &mut [f32], out_rate: u32, channels: u16) -> usize {
        out.fill(0.0);
        if channels != 2 {
            static NON_STEREO_WARN: Once = Once::new();
            NON_STEREO_WARN.call_once(|| {
                log::warn!("sonomix mixes stereo output only; producing silence");
            });
            return 0;
        }

        let total_frames = out.len() / 2;
        let inv_rate = 1.0 / out_rate as f64;
        let master = self.master_volume;

        let mut offset = 0;
        while offset < total_frames {
            let chunk = (total_frames - offset).min(SUB_CHUNK);
            let span = &mut out[offset * 2..(offset + chunk) * 2];
            for idx in 1..POOL_SIZE {
                if self.voices[idx].is_idle() {
                    continue;
                }
                let outcome = self.voices[idx].mix_into(span, inv_rate, master);
                self.report(idx, outcome);
            }
            self.total_samples_played += chunk as i64;
            self.total_time_played += chunk as f64 * inv_rate;
            offset += chunk;
        }

        total_frames
    }

    fn report(&self, idx: usize, outcome: MixOutcome) {
        let Some(tx) = &self.events else {
            return;
        };
        let handle = self.voices[idx].handle;
        // try_send keeps the audio thread non-blocking; a full channel
        // drops the event.
        if outcome.looped {
            let _ = tx.try_send(MixerEvent::VoiceLooped { handle });
        }
        if outcome.finished {
            let _ = tx.try_send(MixerEvent::VoiceFinished { handle });
        }
    }
}

/// Fixed-capacity polyphonic mixer.
///
/// Owns a pool of [`POOL_SIZE`] voice slots, a master volume and monotonic
/// playback counters. Construct one per audio output, share it as
/// `Arc<Mixer>` between your control code and the device adapter, and point
/// the device callback at [`fill_buffer`](Mixer::fill_buffer).
///
/// All operations taking a [`VoiceHandle`] silently ignore handles that are
/// null, stale or already recycled.
pub struct Mixer {
    inner: Mutex<MixerInner>,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MixerInner::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MixerInner> {
        // A panic on another thread must not silence the audio output.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a voice playing `sound` and returns its handle.
    ///
    /// Returns [`VoiceHandle::NULL`] when every slot is occupied (the request
    /// is dropped, nothing is preempted) or when the asset is too short to
    /// play (2 frames or fewer).
    pub fn play(&self, sound: &Arc<PcmSound>, params: &PlayParams) -> VoiceHandle {
        self.lock().play(sound, params)
    }

    /// Plays `sound` once, full-length, centered, at the given volume.
    pub fn play_simple(&self, sound: &Arc<PcmSound>, volume: f32) -> VoiceHandle {
        self.play(
            sound,
            &PlayParams {
                volume,
                ..PlayParams::default()
            },
        )
    }

    /// Plays `sound` looping over its full length at the given volume.
    pub fn play_looped(&self, sound: &Arc<PcmSound>, volume: f32) -> VoiceHandle {
        self.play(
            sound,
            &PlayParams {
                volume,
                looping: true,
                ..PlayParams::default()
            },
        )
    }

    /// Begins the voice's fade-out. The slot is recycled once the fade
    /// decays to silence, never abruptly; a voice still waiting on a
    /// deferred start is released immediately.
    pub fn stop(&self, handle: VoiceHandle) {
        self.lock().stop(handle);
    }

    /// Fades out every active voice.
    pub fn stop_all(&self) {
        self.lock().stop_all();
    }

    /// Fades out every voice currently playing the given asset.
    pub fn stop_sound(&self, sound: &Arc<PcmSound>) {
        self.lock().stop_sound(sound);
    }

    /// Sets the resampling rate multiplier, clamped to `[1e-5, 1000]`.
    /// Takes effect on the next mixed sub-chunk.
    pub fn set_pitch(&self, handle: VoiceHandle, pitch: f32) {
        self.lock().set_pitch(handle, pitch);
    }

    /// Sets the target volume, clamped to `[0, 1e5]`. The mixed level
    /// converges toward the new target by 1/512 per sample to avoid clicks.
    pub fn set_volume(&self, handle: VoiceHandle, volume: f32) {
        self.lock().set_volume(handle, volume);
    }

    /// Sets the stereo pan, clamped to `[-1, 1]`. Linear law: panning
    /// attenuates the opposite channel and never boosts.
    pub fn set_pan(&self, handle: VoiceHandle, pan: f32) {
        self.lock().set_pan(handle, pan);
    }

    /// Moves the playback position, clamped into the voice's
    /// `[start, stop]` window. Ignored for fading voices.
    pub fn seek(&self, handle: VoiceHandle, seconds: f64) {
        self.lock().seek(handle, seconds);
    }

    /// True while the voice is playing or waiting on a deferred start.
    /// False once it fades, finishes or the handle goes stale.
    pub fn is_playing(&self, handle: VoiceHandle) -> bool {
        self.lock().is_playing(handle)
    }

    /// Current playback position in seconds, or 0.0 for voices that are
    /// waiting, fading or gone.
    pub fn play_position(&self, handle: VoiceHandle) -> f64 {
        self.lock().play_position(handle)
    }

    /// Scales the output of every voice. Applies from the next mix call;
    /// per-voice smoothing still ramps each voice to its new level.
    pub fn set_master_volume(&self, volume: f32) {
        self.lock().master_volume = volume;
    }

    pub fn master_volume(&self) -> f32 {
        self.lock().master_volume
    }

    /// Total frames mixed since construction.
    pub fn total_samples_played(&self) -> i64 {
        self.lock().total_samples_played
    }

    /// Total seconds of audio mixed since construction.
    pub fn total_time_played(&self) -> f64 {
        self.lock().total_time_played
    }

    /// Creates a bounded event channel and returns its receiving end.
    /// Replaces any previous subscription. Events are dropped, never
    /// blocked on, when the channel is full.
    pub fn subscribe_events(&self, capacity: usize) -> Receiver<MixerEvent> {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        self.lock().events = Some(tx);
        rx
    }

    /// Acquires the mixer lock for a batch of control operations.
    ///
    /// The audio callback cannot interleave between operations performed on
    /// the returned token; dropping it leaves the critical section. Calling
    /// any `Mixer` method while holding the token deadlocks, so batched
    /// operations must go through the token itself.
    pub fn enter_critical_section(&self) -> CriticalSection<'_> {
        CriticalSection { guard: self.lock() }
    }

    /// Mixes every active voice additively into `out` (interleaved stereo,
    /// zeroed here first) and returns the number of frames produced.
    ///
    /// This is the device pull callback: call it with the output stream's
    /// sample rate and channel count. Layouts other than stereo produce
    /// silence. The signature matches what
    /// [`SonomixEngine`](crate::engine::SonomixEngine) feeds it, but any
    /// audio backend with a pull model can drive it directly.
    pub fn fill_buffer(&self, out: &mut [f32], sample_rate: u32, channels: u16) -> usize {
        self.lock().fill_buffer(out, sample_rate, channels)
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

/// Owned critical-section token; see [`Mixer::enter_critical_section`].
///
/// Exposes the control surface so several operations can run under one lock
/// acquisition, e.g. stopping a group of voices without the mixer running
/// between the stops.
pub struct CriticalSection<'a> {
    guard: MutexGuard<'a, MixerInner>,
}

impl CriticalSection<'_> {
    pub fn play(&mut self, sound: &Arc<PcmSound>, params: &PlayParams) -> VoiceHandle {
        self.guard.play(sound, params)
    }

    pub fn stop(&mut self, handle: VoiceHandle) {
        self.guard.stop(handle);
    }

    pub fn stop_all(&mut self) {
        self.guard.stop_all();
    }

    pub fn stop_sound(&mut self, sound: &Arc<PcmSound>) {
        self.guard.stop_sound(sound);
    }

    pub fn set_pitch(&mut self, handle: VoiceHandle, pitch: f32) {
        self.guard.set_pitch(handle, pitch);
    }

    pub fn set_volume(&mut self, handle: VoiceHandle, volume: f32) {
        self.guard.set_volume(handle, volume);
    }

    pub fn set_pan(&mut self, handle: VoiceHandle, pan: f32) {
        self.guard.set_pan(handle, pan);
    }

    pub fn seek(&mut self, handle: VoiceHandle, seconds: f64) {
        self.guard.seek(handle, seconds);
    }

    pub fn is_playing(&self, handle: VoiceHandle) -> bool {
        self.guard.is_playing(handle)
    }

    pub fn play_position(&self, handle: VoiceHandle) -> f64 {
        self.guard.play_position(handle)
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.guard.master_volume = volume;
    }
}
