//! Channel-count conversion for interleaved i16 PCM.
//!
//! Only three shapes exist: pass-through, mono fanned out to every output
//! channel, and stereo averaged down to mono. Anything else is a
//! configuration error.

use crate::error::{Result, VocalisError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMap {
    Passthrough { channels: usize },
    /// Copy each mono sample into `channels` slots.
    Duplicate { channels: usize },
    /// Average an L/R pair into one sample.
    Downmix,
}

impl ChannelMap {
    /// Speech output path: the engine may only feed the sink its own channel
    /// count or mono.
    pub fn upmix_only(from: usize, to: usize) -> Result<Self> {
        match (from, to) {
            (f, t) if f == t && f > 0 => Ok(Self::Passthrough { channels: f }),
            (1, t) if t > 1 => Ok(Self::Duplicate { channels: t }),
            _ => Err(VocalisError::config(format!(
                "cannot feed {from}-channel audio into a {to}-channel stream"
            ))),
        }
    }

    /// Earcon loading: mono and stereo convert both ways.
    pub fn mono_stereo(from: usize, to: usize) -> Result<Self> {
        match (from, to) {
            (f, t) if f == t && f > 0 => Ok(Self::Passthrough { channels: f }),
            (1, 2) => Ok(Self::Duplicate { channels: 2 }),
            (2, 1) => Ok(Self::Downmix),
            _ => Err(VocalisError::config(format!(
                "unsupported earcon channel conversion {from} -> {to}"
            ))),
        }
    }

    pub fn input_channels(&self) -> usize {
        match *self {
            Self::Passthrough { channels } => channels,
            Self::Duplicate { .. } => 1,
            Self::Downmix => 2,
        }
    }

    pub fn output_channels(&self) -> usize {
        match *self {
            Self::Passthrough { channels } | Self::Duplicate { channels } => channels,
            Self::Downmix => 1,
        }
    }

    /// Convert `input` into `out`, replacing its contents. `out` keeps its
    /// allocation between calls. A trailing partial frame is ignored.
    pub fn apply(&self, input: &[i16], out: &mut Vec<i16>) {
        out.clear();
        match *self {
            Self::Passthrough { channels } => {
                let whole = input.len() - input.len() % channels;
                out.extend_from_slice(&input[..whole]);
            }
            Self::Duplicate { channels } => {
                out.reserve(input.len() * channels);
                for &s in input {
                    out.extend(std::iter::repeat(s).take(channels));
                }
            }
            Self::Downmix => {
                out.extend(
                    input
                        .chunks_exact(2)
                        .map(|lr| ((i32::from(lr[0]) + i32::from(lr[1])) / 2) as i16),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_path_only_upmixes_mono() {
        assert_eq!(
            ChannelMap::upmix_only(1, 2).unwrap(),
            ChannelMap::Duplicate { channels: 2 }
        );
        assert_eq!(
            ChannelMap::upmix_only(2, 2).unwrap(),
            ChannelMap::Passthrough { channels: 2 }
        );
        assert!(matches!(
            ChannelMap::upmix_only(2, 1),
            Err(VocalisError::Configuration(_))
        ));
        assert!(ChannelMap::upmix_only(3, 2).is_err());
        assert!(ChannelMap::upmix_only(0, 0).is_err());
    }

    #[test]
    fn earcon_path_supports_mono_and_stereo_only() {
        assert_eq!(ChannelMap::mono_stereo(2, 1).unwrap(), ChannelMap::Downmix);
        assert!(ChannelMap::mono_stereo(1, 4).is_err());
        assert!(ChannelMap::mono_stereo(6, 2).is_err());
    }

    #[test]
    fn duplicate_fans_out_each_sample() {
        let mut out = Vec::new();
        ChannelMap::Duplicate { channels: 3 }.apply(&[1, -2], &mut out);
        assert_eq!(out, vec![1, 1, 1, -2, -2, -2]);
    }

    #[test]
    fn downmix_averages_without_overflow() {
        let mut out = Vec::new();
        ChannelMap::Downmix.apply(&[i16::MAX, i16::MAX, -4, 2, i16::MIN, i16::MIN], &mut out);
        assert_eq!(out, vec![i16::MAX, -1, i16::MIN]);
    }

    #[test]
    fn passthrough_drops_trailing_partial_frame() {
        let mut out = vec![99; 8];
        ChannelMap::Passthrough { channels: 2 }.apply(&[1, 2, 3], &mut out);
        assert_eq!(out, vec![1, 2]);
    }
}
