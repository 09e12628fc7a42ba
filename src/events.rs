//! Mixer lifecycle events.
//!
//! Delivered over a bounded crossbeam channel obtained from
//! [`Mixer::subscribe_events`](crate::mixer::Mixer::subscribe_events). The
//! audio thread pushes with `try_send` and drops events when the channel is
//! full, so a slow consumer can never stall the device callback.

use crate::voice::VoiceHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerEvent {
    /// The voice's fade-out decayed to silence and its slot went back to the
    /// pool. Emitted both for explicit stops and for natural end-of-sample.
    VoiceFinished { handle: VoiceHandle },
    /// A looping voice wrapped from its stop position back to its start.
    VoiceLooped { handle: VoiceHandle },
}

impl MixerEvent {
    /// The handle of the voice the event refers to. For `VoiceFinished` the
    /// handle no longer validates; it identifies which play request ended.
    pub fn handle(&self) -> VoiceHandle {
        match self {
            Self::VoiceFinished { handle } | Self::VoiceLooped { handle } => *handle,
        }
    }
}
