//! Voice slots and recycle-safe voice handles.
//!
//! A [`Voice`] is one playing instance of a [`PcmSound`]: its own playback
//! position, pitch, pan and smoothed per-channel volumes. Voices live in a
//! fixed pool owned by the [`Mixer`](crate::mixer::Mixer); callers only ever
//! see [`VoiceHandle`]s.

use crate::sound::PcmSound;
use std::sync::Arc;

/// Number of voice slots in the pool. Power of two; slot 0 is reserved so
/// the zero handle can serve as the always-invalid default.
pub const POOL_SIZE: usize = 128;

const INDEX_MASK: u32 = POOL_SIZE as u32 - 1;

/// Per-sample step for smoothed volume convergence, and the snap threshold
/// below which a fading channel is considered silent.
pub(crate) const VOLUME_STEP: f32 = 1.0 / 512.0;

/// Linear component of the fade-out envelope, pushing the level toward zero.
const FADE_TREND: f32 = 1.0 / 10_000.0;

/// Geometric component of the fade-out envelope.
const FADE_DECAY: f32 = 0.997;

/// Opaque reference to a voice slot: the slot index in the low bits, a
/// generation counter in the high bits.
///
/// The generation advances by [`POOL_SIZE`] on every allocation and on every
/// stop, so a handle kept across a slot's reuse can never validate again.
/// The zero handle never validates and is the safe "no voice" default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VoiceHandle(u32);

impl VoiceHandle {
    /// The always-invalid handle, returned when `play` fails.
    pub const NULL: VoiceHandle = VoiceHandle(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// The packed representation, for callers that store handles as plain
    /// integers.
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Reconstructs a handle from [`raw`](Self::raw) output.
    pub fn from_raw(raw: u32) -> Self {
        VoiceHandle(raw)
    }

    pub(crate) fn pack(index: usize, generation: u32) -> Self {
        VoiceHandle(index as u32 | generation)
    }

    pub(crate) fn index(&self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    pub(crate) fn generation(&self) -> u32 {
        self.0 & !INDEX_MASK
    }
}

/// Lifecycle state of a voice slot.
///
/// `Idle → WaitingStart → Playing → Fading → Idle`, with two shortcuts:
/// `play` with no deferral enters `Playing` directly, and stopping a voice
/// that has not yet started jumps straight back to `Idle` (nothing audible
/// has played, so there is nothing to fade).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    #[default]
    Idle,
    WaitingStart,
    Playing,
    Fading,
}

/// What happened inside one [`Voice::mix_into`] call.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MixOutcome {
    /// The voice decayed to silence and returned its slot to `Idle`.
    pub finished: bool,
    /// A looping voice wrapped from its stop position back to its start.
    pub looped: bool,
}

/// One slot of the voice pool.
///
/// All positions are fractional sample indices in f64; amplitude math is f32.
#[derive(Debug, Default)]
pub(crate) struct Voice {
    pub sound: Option<Arc<PcmSound>>,
    pub state: VoiceState,
    /// Current playback position, in source samples.
    pub pos: f64,
    pub start_pos: f64,
    pub stop_pos: f64,
    pub pitch: f32,
    pub volume: f32,
    pub pan: f32,
    /// Smoothed output gains; converge toward the wish volumes by
    /// [`VOLUME_STEP`] per sample.
    pub volume_l: f32,
    pub volume_r: f32,
    /// Fade-out trend, set once when the fade begins.
    pub trend_l: f32,
    pub trend_r: f32,
    /// Remaining deferral in seconds while in `WaitingStart`.
    pub time_to_start: f64,
    pub looping: bool,
    pub generation: u32,
    /// The handle issued at `play` time, kept for event reporting.
    pub handle: VoiceHandle,
}

impl Voice {
    pub fn is_idle(&self) -> bool {
        self.state == VoiceState::Idle
    }

    /// Transitions the voice into its stop sequence.
    ///
    /// A waiting voice goes straight to `Idle`; a playing voice enters
    /// `Fading` with its smoothed volumes scaled by the last instantaneous
    /// sample amplitude, so the fade continues the waveform level that was
    /// audible at the moment of the stop instead of cutting to a new one.
    /// The generation advances either way, invalidating outstanding handles
    /// immediately. The asset reference is released here; the fade itself
    /// needs no source data.
    pub fn begin_fade(&mut self) {
        match self.state {
            VoiceState::Idle | VoiceState::Fading => {}
            VoiceState::WaitingStart => {
                self.generation = self.generation.wrapping_add(POOL_SIZE as u32);
                self.sound = None;
                self.time_to_start = 0.0;
                self.state = VoiceState::Idle;
            }
            VoiceState::Playing => {
                self.generation = self.generation.wrapping_add(POOL_SIZE as u32);
                if let Some(sound) = self.sound.take() {
                    let ip = self.pos as usize;
                    let data = sound.data();
                    if sound.channels() == 1 {
                        let v = data[ip];
                        self.volume_l *= v;
                        self.volume_r *= v;
                    } else {
                        self.volume_l *= data[ip * 2];
                        self.volume_r *= data[ip * 2 + 1];
                    }
                }
                self.trend_l = -self.volume_l.signum() * FADE_TREND;
                self.trend_r = -self.volume_r.signum() * FADE_TREND;
                self.state = VoiceState::Fading;
            }
        }
    }

    /// Mixes this voice's contribution for one sub-chunk into an interleaved
    /// stereo buffer, additively.
    ///
    /// `out.len() / 2` frames are processed. `inv_out_rate` is the reciprocal
    /// of the output sample rate, used for position advance and deferred-start
    /// countdown.
    pub fn mix_into(&mut self, out: &mut [f32], inv_out_rate: f64, master_volume: f32) -> MixOutcome {
        let mut outcome = MixOutcome::default();
        let frames = out.len() / 2;

        let wish_l = master_volume * self.volume * (1.0 + self.pan).min(1.0);
        let wish_r = master_volume * self.volume * (1.0 - self.pan).min(1.0);

        // A deferred start further away than this whole sub-chunk just burns
        // down the countdown.
        if self.state == VoiceState::WaitingStart {
            let chunk_time = frames as f64 * inv_out_rate;
            if self.time_to_start > chunk_time {
                self.time_to_start -= chunk_time;
                return outcome;
            }
        }

        let sound = self.sound.clone();
        let advance = match &sound {
            Some(sound) => sound.frequency() as f64 * inv_out_rate * self.pitch as f64,
            None => 1.0,
        };

        // Fast path: steady-state playback with settled volumes that cannot
        // reach the stop boundary inside this sub-chunk. Pure lerp loop, no
        // per-sample state checks.
        if self.state == VoiceState::Playing
            && self.volume_l > 0.0
            && self.volume_r > 0.0
            && wish_l == self.volume_l
            && wish_r == self.volume_r
            && self.pos + advance * (frames as f64) < self.stop_pos
        {
            if let Some(sound) = &sound {
                let data = sound.data();
                if sound.channels() == 1 {
                    for frame in out.chunks_exact_mut(2) {
                        let ip = self.pos as usize;
                        let t = (self.pos - ip as f64) as f32;
                        let v = lerp(data[ip], data[ip + 1], t);
                        frame[0] += v * self.volume_l;
                        frame[1] += v * self.volume_r;
                        self.pos += advance;
                    }
                } else {
                    for frame in out.chunks_exact_mut(2) {
                        let ip = self.pos as usize;
                        let t = (self.pos - ip as f64) as f32;
                        let vl = lerp(data[ip * 2], data[ip * 2 + 2], t);
                        let vr = lerp(data[ip * 2 + 1], data[ip * 2 + 3], t);
                        frame[0] += vl * self.volume_l;
                        frame[1] += vr * self.volume_r;
                        self.pos += advance;
                    }
                }
                return outcome;
            }
        }

        // General path: per-sample state handling.
        for frame in out.chunks_exact_mut(2) {
            match self.state {
                VoiceState::Idle => break,
                VoiceState::WaitingStart => {
                    self.time_to_start -= inv_out_rate;
                    if self.time_to_start <= 0.0 {
                        self.state = VoiceState::Playing;
                        self.pos = self.start_pos;
                    }
                }
                VoiceState::Playing => {
                    let Some(sound) = &sound else { break };
                    let data = sound.data();
                    let ip = self.pos as usize;
                    let t = (self.pos - ip as f64) as f32;
                    let (vl, vr) = if sound.channels() == 1 {
                        let v = lerp(data[ip], data[ip + 1], t);
                        (v, v)
                    } else {
                        (
                            lerp(data[ip * 2], data[ip * 2 + 2], t),
                            lerp(data[ip * 2 + 1], data[ip * 2 + 3], t),
                        )
                    };
                    frame[0] += vl * self.volume_l;
                    frame[1] += vr * self.volume_r;

                    self.volume_l = ramp_toward(self.volume_l, wish_l);
                    self.volume_r = ramp_toward(self.volume_r, wish_r);

                    self.pos += advance;
                    if self.pos >= self.stop_pos {
                        if self.looping {
                            self.pos = self.start_pos;
                            outcome.looped = true;
                        } else {
                            self.pos = self.stop_pos;
                            self.begin_fade();
                        }
                    }
                }
                VoiceState::Fading => {
                    self.volume_l = fade_step(self.volume_l, self.trend_l);
                    self.volume_r = fade_step(self.volume_r, self.trend_r);
                    if self.volume_l == 0.0 && self.volume_r == 0.0 {
                        // Slot becomes allocatable on the next pool scan.
                        self.state = VoiceState::Idle;
                        outcome.finished = true;
                        break;
                    }
                    frame[0] += self.volume_l;
                    frame[1] += self.volume_r;
                }
            }
        }

        outcome
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Moves `current` toward `target` by at most [`VOLUME_STEP`], snapping when
/// within one step. Never overshoots.
#[inline]
fn ramp_toward(current: f32, target: f32) -> f32 {
    let diff = target - current;
    if diff.abs() <= VOLUME_STEP {
        target
    } else if diff > 0.0 {
        current + VOLUME_STEP
    } else {
        current - VOLUME_STEP
    }
}

/// One step of the fade-out envelope: a linear trend toward zero combined
/// with geometric decay, snapping to exact zero near silence.
#[inline]
fn fade_step(v: f32, trend: f32) -> f32 {
    if v.abs() <= VOLUME_STEP {
        0.0
    } else {
        (v + trend) * FADE_DECAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_is_default_and_invalid() {
        assert!(VoiceHandle::NULL.is_null());
        assert!(VoiceHandle::default().is_null());
        assert_eq!(VoiceHandle::NULL.index(), 0);
    }

    #[test]
    fn handle_packing_round_trips() {
        let h = VoiceHandle::pack(37, 5 * POOL_SIZE as u32);
        assert_eq!(h.index(), 37);
        assert_eq!(h.generation(), 5 * POOL_SIZE as u32);
        assert_eq!(VoiceHandle::from_raw(h.raw()), h);
    }

    #[test]
    fn ramp_converges_without_overshoot() {
        let mut v = 0.0f32;
        let target = 0.01f32;
        let mut steps = 0;
        while v != target {
            let next = ramp_toward(v, target);
            assert!((next - v).abs() <= VOLUME_STEP + f32::EPSILON);
            assert!(next <= target);
            v = next;
            steps += 1;
            assert!(steps < 100, "ramp did not converge");
        }
    }

    #[test]
    fn ramp_moves_down_as_well() {
        let mut v = 1.0f32;
        for _ in 0..2000 {
            v = ramp_toward(v, 0.25);
        }
        assert_eq!(v, 0.25);
    }

    #[test]
    fn fade_reaches_exact_zero_in_bounded_steps() {
        let mut v = 1.0f32;
        let trend = -FADE_TREND;
        let mut steps = 0;
        while v != 0.0 {
            v = fade_step(v, trend);
            steps += 1;
            assert!(steps < 10_000, "fade did not converge");
        }
        assert_eq!(v, 0.0);
    }

    #[test]
    fn fade_converges_from_negative_amplitude() {
        let mut v = -0.8f32;
        let trend = FADE_TREND;
        for _ in 0..10_000 {
            v = fade_step(v, trend);
            if v == 0.0 {
                return;
            }
        }
        panic!("fade did not converge from negative start");
    }
}
