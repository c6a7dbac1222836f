//! Fixed-capacity frame queue shared by the synthesis worker and the audio
//! pull callback.
//!
//! Every operation takes one short `parking_lot::Mutex` and touches at most
//! the frames it moves, so the audio thread never waits behind more than a
//! single write. Neither side blocks inside the buffer: both poll
//! `write_avail`/`read_avail` and decide for themselves whether to wait.
//!
//! Storage is a `ringbuf::HeapRb`, which keeps its indices modulo twice the
//! capacity and so tells "empty" from "full" without a sentinel.
//!
//! ## Drain markers
//!
//! The writer can pin a [`CompletionNotifier`] to the current write position.
//! It fires from inside `read` once every frame written before it has been
//! read, i.e. when that audio has actually left the buffer. `reset` fires any
//! pending markers as interrupted.

use std::collections::VecDeque;

use parking_lot::Mutex;
use ringbuf::{
    traits::{Consumer, Observer, Producer},
    HeapRb,
};

use crate::error::{Result, VocalisError};
use crate::ipc::completion::CompletionNotifier;
use crate::ipc::events::UtteranceEventKind;

struct DrainMarker {
    /// Absolute frame position (in `frames_written` terms) that must be read.
    at_frame: u64,
    notifier: CompletionNotifier,
    kind: UtteranceEventKind,
}

struct RingState<T> {
    rb: HeapRb<T>,
    finished: bool,
    frames_written: u64,
    frames_read: u64,
    markers: VecDeque<DrainMarker>,
}

/// Thread-safe FIFO of interleaved audio frames. One writer, one reader.
pub struct FrameRingBuffer<T = i16> {
    state: Mutex<RingState<T>>,
    frame_capacity: usize,
    channel_count: usize,
}

impl<T: Copy + Default> FrameRingBuffer<T> {
    /// Create an empty, unfinished buffer holding `frame_capacity` frames of
    /// `channel_count` samples each.
    ///
    /// # Errors
    /// `VocalisError::Configuration` if either dimension is zero.
    pub fn new(frame_capacity: usize, channel_count: usize) -> Result<Self> {
        if frame_capacity == 0 || channel_count == 0 {
            return Err(VocalisError::config(format!(
                "ring buffer needs non-zero dimensions (frames={frame_capacity}, channels={channel_count})"
            )));
        }
        Ok(Self {
            state: Mutex::new(RingState {
                rb: HeapRb::new(frame_capacity * channel_count),
                finished: false,
                frames_written: 0,
                frames_read: 0,
                markers: VecDeque::new(),
            }),
            frame_capacity,
            channel_count,
        })
    }

    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    // ── Writer side ─────────────────────────────────────────────────────

    /// Back to the initial state: empty and unfinished. Pending drain
    /// markers fire as interrupted.
    pub fn reset(&self) {
        let mut st = self.state.lock();
        st.rb.clear();
        st.finished = false;
        st.frames_read = st.frames_written;
        while let Some(marker) = st.markers.pop_front() {
            marker.notifier.fire(UtteranceEventKind::Interrupted);
        }
    }

    /// Frames that can be written right now, in `[0, frame_capacity]`.
    pub fn write_avail(&self) -> usize {
        self.state.lock().rb.vacant_len() / self.channel_count
    }

    /// Append `data` (a whole number of interleaved frames).
    ///
    /// All-or-nothing: returns `false` and writes nothing if the buffer is
    /// finished, if `data` is not frame-aligned, or if the frames do not all
    /// fit.
    pub fn write(&self, data: &[T]) -> bool {
        if data.len() % self.channel_count != 0 {
            return false;
        }
        let mut st = self.state.lock();
        if st.finished || data.len() > st.rb.vacant_len() {
            return false;
        }
        st.rb.push_slice(data);
        st.frames_written += (data.len() / self.channel_count) as u64;
        true
    }

    /// Refuse all further writes. Reads keep draining what is buffered.
    pub fn mark_finished(&self) {
        self.state.lock().finished = true;
    }

    /// Fire `notifier` with `kind` once everything written so far has been
    /// read. Fires immediately if the buffer is already drained.
    pub fn add_drain_marker(&self, notifier: CompletionNotifier, kind: UtteranceEventKind) {
        let mut st = self.state.lock();
        if st.frames_read >= st.frames_written {
            notifier.fire(kind);
            return;
        }
        let at_frame = st.frames_written;
        st.markers.push_back(DrainMarker {
            at_frame,
            notifier,
            kind,
        });
    }

    // ── Reader side ─────────────────────────────────────────────────────

    /// Frames that can be read right now, in `[0, frame_capacity]`.
    pub fn read_avail(&self) -> usize {
        self.state.lock().rb.occupied_len() / self.channel_count
    }

    /// Fill `out` (a whole number of frames) from the front of the buffer.
    ///
    /// All-or-nothing: returns `false` and reads nothing if fewer frames are
    /// buffered than `out` asks for.
    pub fn read(&self, out: &mut [T]) -> bool {
        if out.len() % self.channel_count != 0 {
            return false;
        }
        let mut st = self.state.lock();
        if out.len() > st.rb.occupied_len() {
            return false;
        }
        st.rb.pop_slice(out);
        st.frames_read += (out.len() / self.channel_count) as u64;

        while st
            .markers
            .front()
            .is_some_and(|m| m.at_frame <= st.frames_read)
        {
            if let Some(marker) = st.markers.pop_front() {
                marker.notifier.fire(marker.kind);
            }
        }
        true
    }

    /// `true` once `mark_finished` was called, whether or not data remains.
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Markers still waiting for their audio to drain.
    pub fn pending_markers(&self) -> usize {
        self.state.lock().markers.len()
    }
}
