//! RIFF/WAVE reading and writing helpers.
//!
//! ## Layout
//!
//! ```text
//! [RIFF preamble: 12 bytes] [subchunk] [subchunk] ... [data subchunk] ...
//! ```
//!
//! ### Preamble
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | "RIFF" |
//! | 4 | 4 | RIFF size (u32 LE, file length - 8) |
//! | 8 | 4 | "WAVE" |
//!
//! ### Subchunk
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | id ("fmt ", "LIST", "data", ...) |
//! | 4 | 4 | size (u32 LE, excluding the pad byte) |
//! | 8 | N | body, padded to an even length |
//!
//! The `data` subchunk is not at a fixed offset: `fmt ` extensions and `LIST`
//! metadata may precede it, so it is located by walking the subchunk headers.

use std::io::Cursor;
use std::ops::Range;

/// Length of the `RIFF....WAVE` preamble
pub const RIFF_PREAMBLE_SIZE: usize = 12;

/// Length of a subchunk header (id + size)
pub const SUBCHUNK_HEADER_SIZE: usize = 8;

/// Length of the canonical PCM header written around merged audio
pub const CANONICAL_HEADER_SIZE: usize = 44;

/// Fixed recording parameters of the PCM-producing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// Bytes per sample frame (all channels).
    pub fn block_align(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    pub fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: crate::constants::DEFAULT_SAMPLE_RATE,
            channels: crate::constants::DEFAULT_CHANNELS,
            bits_per_sample: crate::constants::DEFAULT_BITS_PER_SAMPLE,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WavError {
    #[error("not a RIFF/WAVE file ({got} bytes, missing RIFF....WAVE preamble)")]
    NotRiffWave { got: usize },
    #[error("truncated subchunk header at offset {offset}")]
    TruncatedSubchunkHeader { offset: usize },
    #[error("no data subchunk found")]
    MissingDataChunk,
    #[error("data subchunk claims {claimed} bytes at offset {offset}, but only {available} available")]
    TruncatedData {
        offset: usize,
        claimed: u32,
        available: usize,
    },
}

/// Position of the PCM samples inside one WAV file, plus its declared format if a
/// `fmt ` subchunk preceded the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLocation {
    pub range: Range<usize>,
    pub format: Option<PcmFormat>,
}

pub fn has_riff_wave_preamble(bytes: &[u8]) -> bool {
    bytes.len() >= RIFF_PREAMBLE_SIZE && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn parse_fmt_body(body: &[u8]) -> Option<PcmFormat> {
    // format tag(2) channels(2) sample rate(4) byte rate(4) block align(2) bits(2)
    if body.len() < 16 {
        return None;
    }
    Some(PcmFormat {
        channels: read_u16_le(body, 2),
        sample_rate: read_u32_le(body, 4),
        bits_per_sample: read_u16_le(body, 14),
    })
}

/// Walk the subchunks after the preamble until `data` is found.
///
/// A missing or truncated `data` subchunk is an error; there is no best-effort
/// fallback to "everything after byte 44".
pub fn locate_data(bytes: &[u8]) -> Result<DataLocation, WavError> {
    if !has_riff_wave_preamble(bytes) {
        return Err(WavError::NotRiffWave { got: bytes.len() });
    }

    let mut offset = RIFF_PREAMBLE_SIZE;
    let mut format = None;

    while offset < bytes.len() {
        if offset + SUBCHUNK_HEADER_SIZE > bytes.len() {
            return Err(WavError::TruncatedSubchunkHeader { offset });
        }
        let id = &bytes[offset..offset + 4];
        let size = read_u32_le(bytes, offset + 4);
        let body_start = offset + SUBCHUNK_HEADER_SIZE;

        if id == b"data" {
            let available = bytes.len() - body_start;
            if size as usize > available {
                return Err(WavError::TruncatedData {
                    offset: body_start,
                    claimed: size,
                    available,
                });
            }
            return Ok(DataLocation {
                range: body_start..body_start + size as usize,
                format,
            });
        }

        if id == b"fmt " {
            let body_end = (body_start + size as usize).min(bytes.len());
            format = parse_fmt_body(&bytes[body_start..body_end]);
        }

        // Subchunk bodies are padded to an even length
        let padded = size as usize + (size as usize & 1);
        offset = body_start.saturating_add(padded);
    }

    Err(WavError::MissingDataChunk)
}

/// Write 16-bit little-endian PCM slices, in order, as one WAV file.
///
/// Mono and stereo output carries the canonical 44-byte header. Each slice must hold
/// whole sample frames.
pub fn write_pcm16(slices: &[&[u8]], format: PcmFormat) -> Result<Vec<u8>, hound::Error> {
    let pcm_len: usize = slices.iter().map(|s| s.len()).sum();
    let mut cursor = Cursor::new(Vec::with_capacity(CANONICAL_HEADER_SIZE + pcm_len));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, format.wav_spec())?;
        for slice in slices {
            for sample in slice.chunks_exact(2) {
                writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
            }
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Build a complete WAV file around raw PCM samples.
pub fn wrap_pcm(pcm: &[u8], format: PcmFormat) -> Result<Vec<u8>, hound::Error> {
    write_pcm16(&[pcm], format)
}
