//! Minimal RIFF/WAVE reader for earcon files.
//!
//! Accepts only what the mixer can load: 16-bit integer PCM, one or two
//! channels. Any malformed or unsupported chunk fails the whole load with
//! `InvalidEarconFile`; nothing is handed to the mixer until the file has
//! been fully validated.

use std::path::Path;

use crate::error::{Result, VocalisError};

const MIN_FILE_BYTES: usize = 40;
const FMT_MIN_BYTES: usize = 16;
const FMT_MAX_BYTES: usize = 1024;
const PCM_FORMAT_TAG: u16 = 1;

/// Decoded earcon audio: interleaved i16 at its native rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavClip {
    pub channels: usize,
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

impl WavClip {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }
}

#[derive(Debug, Clone, Copy)]
struct FormatChunk {
    channels: u16,
    sample_rate: u32,
}

fn invalid(msg: impl Into<String>) -> VocalisError {
    VocalisError::InvalidEarconFile(msg.into())
}

fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn parse_format(body: &[u8]) -> Result<FormatChunk> {
    if body.len() < FMT_MIN_BYTES || body.len() > FMT_MAX_BYTES {
        return Err(invalid(format!("fmt chunk of {} bytes", body.len())));
    }
    let tag = le_u16(body, 0);
    let channels = le_u16(body, 2);
    let sample_rate = le_u32(body, 4);
    let byte_rate = le_u32(body, 8);
    let block_align = le_u16(body, 12);
    let bits = le_u16(body, 14);

    if tag != PCM_FORMAT_TAG {
        return Err(invalid(format!("format tag {tag} is not integer PCM")));
    }
    if !(1..=2).contains(&channels) {
        return Err(invalid(format!("{channels} channels (only 1 or 2 supported)")));
    }
    if bits != 16 {
        return Err(invalid(format!("{bits} bits per sample (only 16 supported)")));
    }
    if sample_rate == 0 {
        return Err(invalid("zero sample rate"));
    }
    let bytes_per_frame = u32::from(channels) * u32::from(bits / 8);
    if u64::from(byte_rate) != u64::from(sample_rate) * u64::from(bytes_per_frame) {
        return Err(invalid(format!(
            "byte rate {byte_rate} inconsistent with {sample_rate} Hz x {channels} ch"
        )));
    }
    if u32::from(block_align) != bytes_per_frame {
        return Err(invalid(format!("block align {block_align}")));
    }
    Ok(FormatChunk {
        channels,
        sample_rate,
    })
}

/// Parse a complete WAV file image.
pub fn parse_wav(bytes: &[u8]) -> Result<WavClip> {
    if bytes.len() < MIN_FILE_BYTES {
        return Err(invalid(format!("{} bytes is too short", bytes.len())));
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(invalid("missing RIFF/WAVE header"));
    }

    let mut format: Option<FormatChunk> = None;
    let mut samples: Vec<i16> = Vec::new();
    let mut pos = 12usize;

    while bytes.len() - pos >= 8 {
        let label = &bytes[pos..pos + 4];
        let size = le_u32(bytes, pos + 4) as usize;
        let body_start = pos + 8;
        if size > bytes.len() - body_start {
            return Err(invalid(format!(
                "chunk {:?} of {size} bytes overruns the file",
                String::from_utf8_lossy(label)
            )));
        }
        let body = &bytes[body_start..body_start + size];

        match label {
            b"fmt " => format = Some(parse_format(body)?),
            b"data" => {
                let fmt = format.ok_or_else(|| invalid("data chunk before fmt chunk"))?;
                let frame_bytes = 2 * usize::from(fmt.channels);
                let whole = body.len() - body.len() % frame_bytes;
                samples.extend(
                    body[..whole]
                        .chunks_exact(2)
                        .map(|b| i16::from_le_bytes([b[0], b[1]])),
                );
            }
            _ => {}
        }

        // RIFF chunks are word aligned.
        pos = body_start + size + (size & 1);
        if pos > bytes.len() {
            break;
        }
    }

    let fmt = format.ok_or_else(|| invalid("no fmt chunk"))?;
    if samples.is_empty() {
        return Err(invalid("no audio frames"));
    }
    Ok(WavClip {
        channels: usize::from(fmt.channels),
        sample_rate: fmt.sample_rate,
        samples,
    })
}

/// Read and parse a WAV file from disk.
pub fn read_wav_file(path: impl AsRef<Path>) -> Result<WavClip> {
    let bytes = std::fs::read(path.as_ref())?;
    parse_wav(&bytes)
}
