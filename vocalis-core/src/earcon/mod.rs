//! Earcons: short preloaded clips mixed over the speech stream.
//!
//! ## Threading
//!
//! Control calls (`play`, `stop`, ...) come from the control thread; mixing
//! happens on the audio pull thread. Per-clip play state is a pair of
//! atomics, so mixing never takes a lock that a control call can hold for
//! long. The clip list itself is behind an `RwLock` that is only
//! write-locked while a new clip is appended; the audio thread uses
//! `try_read` and skips one buffer of earcon mixing if it loses that race.
//!
//! A `play` racing a mix may be observed half-applied for one buffer
//! (position reset but playing flag not yet set, or the reverse).
//!
//! ## Loading
//!
//! Clips are converted once, at load time, to the mixer's channel count and
//! sample rate. Channel reduction happens before resampling and channel
//! expansion after it, so each distinct channel is resampled exactly once.

pub mod wav;

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::audio::resample::SampleRateConverter;
use crate::buffering::ChannelMap;
use crate::error::{Result, VocalisError};
use crate::synthesis::{AudioReceiver, CallbackStatus};

/// rubato chunk used when resampling clips at load time.
const LOAD_CHUNK_FRAMES: usize = 1024;

struct Earcon {
    /// Interleaved at the mixer's channel count and rate.
    samples: Box<[i16]>,
    frames: usize,
    looping: bool,
    playing: AtomicBool,
    position: AtomicUsize,
}

/// Owns every loaded clip and mixes the active ones into output buffers.
pub struct EarconMixer {
    channels: usize,
    sample_rate: u32,
    earcons: RwLock<Vec<Arc<Earcon>>>,
}

/// Collects exactly `limit` resampled frames, then halts the converter.
struct PlaneReceiver {
    out: Vec<i16>,
    limit: usize,
}

impl AudioReceiver for PlaneReceiver {
    fn receive(&mut self, _rate: u32, _channels: usize, data: &[i16]) -> Result<CallbackStatus> {
        let room = self.limit - self.out.len();
        self.out.extend_from_slice(&data[..data.len().min(room)]);
        if self.out.len() >= self.limit {
            return Ok(CallbackStatus::Halt);
        }
        Ok(CallbackStatus::Continue)
    }

    fn done(&mut self) -> Result<()> {
        Ok(())
    }
}

fn resample_plane(plane: &[i16], from: u32, to: u32) -> Result<Vec<i16>> {
    let limit = (plane.len() as u64 * u64::from(to) / u64::from(from)) as usize;
    let rx = PlaneReceiver {
        out: Vec::with_capacity(limit),
        limit,
    };
    let mut rc = SampleRateConverter::new(rx, from, to, LOAD_CHUNK_FRAMES)?;
    if limit > 0 && rc.push(from, 1, plane)? == CallbackStatus::Continue {
        rc.flush()?;
    }
    let mut out = rc.into_inner().out;
    out.resize(limit, 0);
    Ok(out)
}

/// Resample interleaved audio one channel plane at a time.
fn resample_interleaved(data: &[i16], channels: usize, from: u32, to: u32) -> Result<Vec<i16>> {
    if from == to {
        return Ok(data.to_vec());
    }
    if channels == 1 {
        return resample_plane(data, from, to);
    }
    let planes = (0..channels)
        .map(|c| {
            let plane: Vec<i16> = data.iter().skip(c).step_by(channels).copied().collect();
            resample_plane(&plane, from, to)
        })
        .collect::<Result<Vec<_>>>()?;
    let frames = planes.first().map_or(0, Vec::len);
    let mut out = Vec::with_capacity(frames * channels);
    for f in 0..frames {
        out.extend(planes.iter().map(|p| p[f]));
    }
    Ok(out)
}

impl EarconMixer {
    /// # Errors
    /// `Configuration` unless `channels` is 1 or 2 and `sample_rate` is
    /// non-zero.
    pub fn new(channels: usize, sample_rate: u32) -> Result<Self> {
        if !(1..=2).contains(&channels) || sample_rate == 0 {
            return Err(VocalisError::config(format!(
                "earcon mixer needs 1-2 channels and a rate (got {channels} ch @ {sample_rate} Hz)"
            )));
        }
        Ok(Self {
            channels,
            sample_rate,
            earcons: RwLock::new(Vec::new()),
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of loaded clips. Ids are `0..len()`.
    pub fn len(&self) -> usize {
        self.earcons.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, id: usize) -> Result<Arc<Earcon>> {
        self.earcons
            .read()
            .get(id)
            .cloned()
            .ok_or(VocalisError::EarconNotFound { id })
    }

    /// Load interleaved PCM and return its id.
    ///
    /// # Errors
    /// - `Configuration` for channel layouts other than mono/stereo.
    /// - `InvalidArgument` for an empty clip, a zero rate, or data that is
    ///   not a whole number of frames.
    pub fn load(
        &self,
        data: &[i16],
        source_channels: usize,
        source_rate: u32,
        looping: bool,
    ) -> Result<usize> {
        let map = ChannelMap::mono_stereo(source_channels, self.channels)?;
        if source_rate == 0 {
            return Err(VocalisError::InvalidArgument("earcon sample rate is zero".into()));
        }
        if data.is_empty() || data.len() % source_channels != 0 {
            return Err(VocalisError::InvalidArgument(format!(
                "earcon data of {} samples is not a whole number of {source_channels}-channel frames",
                data.len()
            )));
        }

        let mut converted = Vec::new();
        let samples = if map.output_channels() < map.input_channels() {
            map.apply(data, &mut converted);
            resample_interleaved(&converted, map.output_channels(), source_rate, self.sample_rate)?
        } else {
            let resampled =
                resample_interleaved(data, map.input_channels(), source_rate, self.sample_rate)?;
            map.apply(&resampled, &mut converted);
            converted
        };

        let frames = samples.len() / self.channels;
        if frames == 0 {
            return Err(VocalisError::InvalidArgument(
                "earcon is shorter than one output frame".into(),
            ));
        }

        let earcon = Arc::new(Earcon {
            samples: samples.into_boxed_slice(),
            frames,
            looping,
            playing: AtomicBool::new(false),
            position: AtomicUsize::new(0),
        });
        let mut list = self.earcons.write();
        list.push(earcon);
        let id = list.len() - 1;
        info!(
            id,
            frames, source_channels, source_rate, looping, "earcon loaded"
        );
        Ok(id)
    }

    /// Load a WAV file (see [`wav::parse_wav`] for what is accepted).
    pub fn load_wav_file(&self, path: impl AsRef<Path>, looping: bool) -> Result<usize> {
        let clip = wav::read_wav_file(path)?;
        self.load(&clip.samples, clip.channels, clip.sample_rate, looping)
    }

    /// Frames of the converted clip.
    pub fn frames(&self, id: usize) -> Result<usize> {
        Ok(self.get(id)?.frames)
    }

    /// Copy of the converted clip, interleaved.
    pub fn samples(&self, id: usize) -> Result<Vec<i16>> {
        Ok(self.get(id)?.samples.to_vec())
    }

    /// Start `id` from its first frame, restarting it if already playing.
    pub fn play(&self, id: usize) -> Result<()> {
        let e = self.get(id)?;
        e.position.store(0, Ordering::Release);
        e.playing.store(true, Ordering::Release);
        debug!(id, "earcon play");
        Ok(())
    }

    /// Deactivate `id`, keeping its position.
    pub fn stop(&self, id: usize) -> Result<()> {
        self.get(id)?.playing.store(false, Ordering::Release);
        Ok(())
    }

    pub fn stop_all(&self) {
        for e in self.earcons.read().iter() {
            e.playing.store(false, Ordering::Release);
        }
    }

    pub fn is_playing(&self, id: usize) -> Result<bool> {
        Ok(self.get(id)?.playing.load(Ordering::Acquire))
    }

    /// Safe on the audio thread. Reports `true` while a load holds the list.
    pub fn is_anything_playing(&self) -> bool {
        match self.earcons.try_read() {
            Some(list) => list.iter().any(|e| e.playing.load(Ordering::Acquire)),
            None => true,
        }
    }

    /// Add every active clip into `buffer`, saturating at the i16 bounds.
    ///
    /// Safe on the audio thread: no allocation, no blocking lock.
    ///
    /// # Errors
    /// `Configuration` if `channel_count` differs from the mixer's, and
    /// `InvalidArgument` if `buffer` is shorter than `frame_count` frames.
    pub fn fill_buffer(&self, buffer: &mut [i16], frame_count: usize, channel_count: usize) -> Result<()> {
        if channel_count != self.channels {
            return Err(VocalisError::config(format!(
                "earcon mixer has {} channels, buffer has {channel_count}",
                self.channels
            )));
        }
        let needed = frame_count * channel_count;
        if buffer.len() < needed {
            return Err(VocalisError::InvalidArgument(format!(
                "buffer holds {} samples, {needed} requested",
                buffer.len()
            )));
        }
        let Some(list) = self.earcons.try_read() else {
            return Ok(());
        };

        for e in list.iter() {
            if !e.playing.load(Ordering::Acquire) {
                continue;
            }
            let mut pos = e.position.load(Ordering::Acquire);
            let mut written = 0;
            while written < frame_count {
                if pos >= e.frames {
                    if !e.looping {
                        break;
                    }
                    pos = 0;
                }
                let n = (e.frames - pos).min(frame_count - written);
                let src = &e.samples[pos * channel_count..(pos + n) * channel_count];
                let dst = &mut buffer[written * channel_count..(written + n) * channel_count];
                for (d, s) in dst.iter_mut().zip(src) {
                    *d = d.saturating_add(*s);
                }
                pos += n;
                written += n;
            }
            e.position.store(pos, Ordering::Release);
            if !e.looping && pos >= e.frames {
                e.playing.store(false, Ordering::Release);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for EarconMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EarconMixer")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("loaded", &self.len())
            .finish()
    }
}
