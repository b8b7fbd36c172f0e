//! # Message Protocol
//!
//! The wire schema shared by hub and spoke: one JSON object per message,
//! tagged by `type`. Unknown types deserialize into [`Envelope::Unknown`]
//! rather than failing, so older and newer peers can coexist.

use serde::{Deserialize, Serialize};

use crate::chunking::ChunkDescriptor;
use crate::error::Result;

/// Clipboard payload's content type tag on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Image,
    Files,
}

/// One file entry inline in a small `clipboard` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEnvelope {
    pub filename: String,
    /// Base64 body, per the codec's adaptive framing.
    pub content: String,
    pub compressed: bool,
    pub size: u64,
}

/// `chunk_nack` failure reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkNackReason {
    DecodeError,
    ChecksumError,
}

/// Chunk descriptor as it appears on the wire (`chunk_index`, not
/// `index` — [`ChunkDescriptor`] is the in-memory form used by the
/// planner).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireChunkDescriptor {
    pub chunk_index: u32,
    pub offset: u64,
    pub size: u32,
    pub checksum: String,
}

impl From<&ChunkDescriptor> for WireChunkDescriptor {
    fn from(d: &ChunkDescriptor) -> Self {
        Self {
            chunk_index: d.index,
            offset: d.offset,
            size: d.size,
            checksum: d.checksum.clone(),
        }
    }
}

impl From<&WireChunkDescriptor> for ChunkDescriptor {
    fn from(d: &WireChunkDescriptor) -> Self {
        Self {
            index: d.chunk_index,
            offset: d.offset,
            size: d.size,
            checksum: d.checksum.clone(),
        }
    }
}

/// The full set of messages exchanged over one peer session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Carries `password` spoke→hub, `success` hub→spoke; a single
    /// session only ever sends one direction of this variant at a time.
    Auth {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        password: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        success: Option<bool>,
    },
    Ping,
    Pong,
    Clipboard {
        content_type: ContentType,
        content_hash: String,
        timestamp: i64,
        compressed: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        image_data: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        files: Option<Vec<FileEnvelope>>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        file_paths: Option<Vec<String>>,
    },
    ChunkedTransferInit {
        transfer_id: String,
        filename: String,
        file_size: u64,
        file_hash: String,
        total_chunks: u32,
        chunk_size: u32,
        chunks: Vec<WireChunkDescriptor>,
    },
    ChunkedTransferAck {
        transfer_id: String,
        needed_chunks: Vec<u32>,
    },
    ChunkData {
        transfer_id: String,
        chunk_index: u32,
        offset: u64,
        size: u32,
        checksum: String,
        data: String,
        compressed: bool,
    },
    ChunkAck {
        transfer_id: String,
        chunk_index: u32,
    },
    ChunkNack {
        transfer_id: String,
        chunk_index: u32,
        error: ChunkNackReason,
    },
    TransferComplete {
        transfer_id: String,
        filename: String,
        file_size: u64,
    },
    TransferError {
        transfer_id: String,
        error: String,
    },
    /// Catch-all for forward-compatibility; never produced by
    /// serialization, only by deserializing an unrecognized `type`.
    #[serde(other)]
    Unknown,
}

impl Envelope {
    /// The `transfer_id` this envelope concerns, if any.
    pub fn transfer_id(&self) -> Option<&str> {
        match self {
            Envelope::ChunkedTransferInit { transfer_id, .. }
            | Envelope::ChunkedTransferAck { transfer_id, .. }
            | Envelope::ChunkData { transfer_id, .. }
            | Envelope::ChunkAck { transfer_id, .. }
            | Envelope::ChunkNack { transfer_id, .. }
            | Envelope::TransferComplete { transfer_id, .. }
            | Envelope::TransferError { transfer_id, .. } => Some(transfer_id),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a raw frame. Malformed JSON propagates as
    /// [`crate::error::Error::MalformedMessage`]; callers should log and
    /// keep the session open rather than terminate on this.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| crate::error::Error::MalformedMessage(e.to_string()))
    }
}
