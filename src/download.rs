//! Batched concurrent download of an ordered chunk sequence.

use log::{debug, info};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::chunk_store::{ChunkStore, StoreError};
use crate::context::RequestContext;
use crate::error::CombineError;
use crate::models::Chunk;

#[derive(Clone)]
pub struct ChunkDownloader {
    store: Arc<dyn ChunkStore>,
    batch_size: usize,
}

impl ChunkDownloader {
    pub fn new(store: Arc<dyn ChunkStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Fetch every chunk and return the payloads in chunk order.
    ///
    /// `chunks` must be sorted by index and contiguous from 0; a gap is reported as
    /// `MissingChunk`. Batches run one after another, chunks inside a batch run
    /// concurrently. The first failure aborts the rest of the batch.
    pub async fn download_all(
        &self,
        ctx: &RequestContext,
        chunks: &[Chunk],
    ) -> Result<Vec<Vec<u8>>, CombineError> {
        ensure_contiguous(chunks)?;

        let mut slots: Vec<Option<Vec<u8>>> = vec![None; chunks.len()];
        let mut total_bytes = 0usize;

        for (batch_no, batch) in chunks.chunks(self.batch_size).enumerate() {
            let mut set: JoinSet<(usize, Result<Vec<u8>, StoreError>)> = JoinSet::new();
            for chunk in batch {
                let store = Arc::clone(&self.store);
                let slot = chunk.chunk_index as usize;
                let path = chunk.storage_path.clone();
                set.spawn(async move { (slot, store.get(&path).await) });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((slot, Ok(bytes))) => {
                        total_bytes += bytes.len();
                        slots[slot] = Some(bytes);
                    }
                    Ok((slot, Err(source))) => {
                        set.abort_all();
                        return Err(CombineError::Download {
                            chunk_index: slot as i64,
                            path: chunks[slot].storage_path.clone(),
                            source,
                        });
                    }
                    Err(e) => {
                        set.abort_all();
                        return Err(CombineError::Worker(e.to_string()));
                    }
                }
            }
            debug!("{} batch {} done ({} chunks)", ctx, batch_no, batch.len());
        }

        let payloads = slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| slot.ok_or(CombineError::MissingChunk(i as i64)))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "{} downloaded {} chunks ({} bytes)",
            ctx,
            payloads.len(),
            total_bytes
        );
        Ok(payloads)
    }
}

/// The sequence must be exactly 0, 1, ..., n-1
pub fn ensure_contiguous(chunks: &[Chunk]) -> Result<(), CombineError> {
    for (expected, chunk) in chunks.iter().enumerate() {
        let expected = expected as i64;
        if chunk.chunk_index != expected {
            return Err(CombineError::MissingChunk(expected));
        }
    }
    Ok(())
}
