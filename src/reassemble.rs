//! Merge downloaded chunk payloads into one recording.

use log::{info, warn};

use crate::context::RequestContext;
use crate::error::CombineError;
use crate::models::ContainerKind;
use crate::wav::{self, PcmFormat};

/// Merge `payloads` (already in chunk order) according to their container kind.
pub fn reassemble(
    ctx: &RequestContext,
    payloads: &[Vec<u8>],
    container: ContainerKind,
    format: PcmFormat,
) -> Result<Vec<u8>, CombineError> {
    if payloads.is_empty() {
        return Err(CombineError::NoChunks);
    }
    match container {
        ContainerKind::SelfFraming => Ok(concat_self_framing(payloads)),
        ContainerKind::RawPcmWav => merge_wav(ctx, payloads, format),
    }
}

/// Byte-wise concatenation; each fragment continues the same stream.
pub fn concat_self_framing(payloads: &[Vec<u8>]) -> Vec<u8> {
    payloads.concat()
}

/// Strip each chunk's header and write the joined PCM as one WAV file.
pub fn merge_wav(
    ctx: &RequestContext,
    payloads: &[Vec<u8>],
    format: PcmFormat,
) -> Result<Vec<u8>, CombineError> {
    let mut slices = Vec::with_capacity(payloads.len());
    for (i, payload) in payloads.iter().enumerate() {
        let location = wav::locate_data(payload).map_err(|source| CombineError::MalformedChunk {
            chunk_index: i as i64,
            source,
        })?;

        if let Some(declared) = location.format {
            if declared != format {
                warn!(
                    "{} chunk {} declares {:?}, merging as {:?}",
                    ctx, i, declared, format
                );
            }
        }

        let mut pcm = &payload[location.range];
        let partial = pcm.len() % format.block_align().max(1);
        if partial != 0 {
            warn!(
                "{} chunk {} has PCM length {} with a partial frame, dropping {} bytes",
                ctx,
                i,
                pcm.len(),
                partial
            );
            pcm = &pcm[..pcm.len() - partial];
        }
        slices.push(pcm);
    }

    let pcm_len: usize = slices.iter().map(|s| s.len()).sum();
    match u32::try_from(pcm_len) {
        Ok(len) if len <= u32::MAX - 36 => {}
        _ => return Err(CombineError::PayloadTooLarge(pcm_len)),
    }

    let out = wav::write_pcm16(&slices, format)?;

    info!(
        "{} merged {} WAV chunks into {} PCM bytes",
        ctx,
        payloads.len(),
        pcm_len
    );
    Ok(out)
}
