//! # Chunk Planner
//!
//! Splits large item payloads into fixed-size chunks for resumable
//! transfer, and verifies them on the receiving side. Hashing is MD5
//! throughout (chunk checksums and whole-payload integrity), matching
//! the wire format's 128-bit digests.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default chunk size: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Payloads at or above this size are chunked rather than sent inline.
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Metadata for a single chunk within a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub index: u32,
    pub offset: u64,
    pub size: u32,
    /// Lowercase hex MD5 over this chunk's bytes.
    pub checksum: String,
}

/// The full plan for a chunked payload: how many chunks, their
/// boundaries and checksums, and the whole-payload hash used for final
/// verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub total_size: u64,
    pub chunk_size: u32,
    pub total_chunks: u32,
    pub chunks: Vec<ChunkDescriptor>,
    /// Lowercase hex MD5 over the whole payload.
    pub file_hash: String,
}

/// True if `size` meets or exceeds the chunking threshold.
pub fn needs_chunking(size: u64, threshold: u64) -> bool {
    size >= threshold
}

/// Split `data` into chunks of `chunk_size` bytes, computing per-chunk
/// and whole-payload MD5 checksums.
pub fn plan(data: &[u8], chunk_size: u32) -> Result<ChunkPlan> {
    if chunk_size == 0 {
        return Err(Error::MalformedMessage("chunk_size must be nonzero".into()));
    }

    let total_size = data.len() as u64;
    let chunk_size_usize = chunk_size as usize;
    let total_chunks = if data.is_empty() {
        1
    } else {
        ((data.len() + chunk_size_usize - 1) / chunk_size_usize) as u32
    };

    let mut chunks = Vec::with_capacity(total_chunks as usize);
    let mut whole_hasher = Md5::new();
    whole_hasher.update(data);
    let file_hash = hex::encode(whole_hasher.finalize());

    if data.is_empty() {
        let mut hasher = Md5::new();
        hasher.update([]);
        chunks.push(ChunkDescriptor {
            index: 0,
            offset: 0,
            size: 0,
            checksum: hex::encode(hasher.finalize()),
        });
    } else {
        for (index, window) in data.chunks(chunk_size_usize).enumerate() {
            let mut hasher = Md5::new();
            hasher.update(window);
            chunks.push(ChunkDescriptor {
                index: index as u32,
                offset: (index * chunk_size_usize) as u64,
                size: window.len() as u32,
                checksum: hex::encode(hasher.finalize()),
            });
        }
    }

    Ok(ChunkPlan {
        total_size,
        chunk_size,
        total_chunks,
        chunks,
        file_hash,
    })
}

/// Verify a chunk's bytes against its descriptor's checksum.
pub fn verify_chunk(descriptor: &ChunkDescriptor, data: &[u8]) -> Result<()> {
    if data.len() != descriptor.size as usize {
        return Err(Error::ChunkChecksumMismatch {
            index: descriptor.index,
        });
    }
    let mut hasher = Md5::new();
    hasher.update(data);
    let actual = hex::encode(hasher.finalize());
    if actual != descriptor.checksum {
        return Err(Error::ChunkChecksumMismatch {
            index: descriptor.index,
        });
    }
    Ok(())
}

/// Verify the fully reassembled payload against a plan's whole-file
/// hash.
pub fn verify_whole(plan: &ChunkPlan, data: &[u8], transfer_id: &str) -> Result<()> {
    let mut hasher = Md5::new();
    hasher.update(data);
    let actual = hex::encode(hasher.finalize());
    if actual != plan.file_hash {
        return Err(Error::WholeFileHashMismatch {
            transfer_id: transfer_id.to_string(),
        });
    }
    Ok(())
}

/// Reassemble chunk bytes (assumed already verified and in index order)
/// into the full payload, for callers that buffer chunks externally
/// rather than writing into a preallocated buffer.
pub fn reassemble(chunks: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut sorted = chunks.to_vec();
    sorted.sort_by_key(|(index, _)| *index);
    let mut out = Vec::new();
    for (_, data) in sorted {
        out.extend_from_slice(&data);
    }
    out
}
