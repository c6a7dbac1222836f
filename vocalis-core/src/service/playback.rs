//! The sink-facing half of the service: answers pull callbacks from the
//! frame ring buffer and mixes earcons on top.

use std::sync::{atomic::Ordering, Arc};

use parking_lot::RwLock;
use tracing::trace;

use super::{ServiceDiagnostics, Shared};
use crate::audio::AudioProvider;

/// Bound to the sink once; the service attaches fresh state on every start.
#[derive(Default)]
pub(crate) struct PlaybackPath {
    current: RwLock<Option<Arc<Shared>>>,
}

impl PlaybackPath {
    pub fn attach(&self, shared: Arc<Shared>) {
        *self.current.write() = Some(shared);
    }

    pub fn detach(&self) {
        *self.current.write() = None;
    }
}

impl AudioProvider for PlaybackPath {
    fn fill_audio_buffer(&self, samples: &mut [i16], frame_count: usize, channel_count: usize) -> bool {
        let wanted = (frame_count * channel_count).min(samples.len());
        let out = &mut samples[..wanted];

        // Losing the race against attach/detach costs one buffer of silence.
        let Some(guard) = self.current.try_read() else {
            out.fill(0);
            return true;
        };
        let Some(shared) = guard.as_ref() else {
            out.fill(0);
            return true;
        };

        let ring = &shared.ring;
        if channel_count != ring.channel_count() {
            out.fill(0);
            ServiceDiagnostics::bump(&shared.diagnostics.earcon_mix_errors);
            return true;
        }

        // A sink may hand over less room than `frame_count` promises.
        let out_frames = frame_count.min(wanted / channel_count);
        let frames = out_frames.min(ring.read_avail());
        let split = frames * channel_count;
        if frames > 0 && !ring.read(&mut out[..split]) {
            out[..split].fill(0);
        }
        out[split..].fill(0);
        ServiceDiagnostics::add(&shared.diagnostics.frames_played, frames);

        if frames < out_frames && shared.synthesizing.load(Ordering::Acquire) {
            ServiceDiagnostics::bump(&shared.diagnostics.underruns);
            trace!(frames, frame_count, "playback underrun");
        }

        if shared
            .mixer
            .fill_buffer(out, out_frames, channel_count)
            .is_err()
        {
            ServiceDiagnostics::bump(&shared.diagnostics.earcon_mix_errors);
        }

        let speech_over = shared.stop_when_finished.load(Ordering::Acquire)
            && ring.is_finished()
            && ring.read_avail() == 0;
        !speech_over || shared.mixer.is_anything_playing()
    }
}
