//! # Error Handling
//!
//! Error taxonomy for the clipmesh core: codec, item construction, chunk
//! planning, transfer engine, and wire protocol dispatch all funnel into
//! this one enum, grouped by the six kinds in the propagation policy:
//!
//! - `Transport` — channel closed, timeout, handshake rejection.
//! - `Protocol` — malformed JSON, missing field, unknown type.
//! - `Auth` — shared secret mismatch or timeout.
//! - `Integrity` — chunk checksum mismatch, decode failure, whole-file
//!   hash mismatch.
//! - `Resource` — file too large, cap exceeded, disk write failure.
//! - `TransferState` — unknown transfer_id.

use thiserror::Error;

/// Result type alias used throughout clipmesh-core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // ── Transport (Transport) ──────────────────────────────────────────
    #[error("transport closed")]
    TransportClosed,

    #[error("transport timed out waiting for {0}")]
    TransportTimeout(&'static str),

    // ── Auth ────────────────────────────────────────────────────────────
    #[error("authentication failed: shared secret mismatch")]
    AuthMismatch,

    #[error("authentication timed out")]
    AuthTimeout,

    // ── Protocol ────────────────────────────────────────────────────────
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    // ── Integrity (Codec / ChunkPlanner / TransferEngine) ──────────────
    #[error("corrupt payload: invalid base64 or compression frame")]
    CorruptPayload,

    #[error("chunk {index} checksum mismatch")]
    ChunkChecksumMismatch { index: u32 },

    #[error("whole-file hash mismatch for transfer {transfer_id}")]
    WholeFileHashMismatch { transfer_id: String },

    // ── Resource ────────────────────────────────────────────────────────
    #[error("file '{name}' exceeds the per-file cap of {cap} bytes")]
    FileTooLarge { name: String, cap: u64 },

    #[error("total payload exceeds the batch cap of {cap} bytes")]
    TotalSizeTooLarge { cap: u64 },

    #[error("disk I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── TransferState ───────────────────────────────────────────────────
    #[error("unknown transfer_id: {0}")]
    UnknownTransfer(String),

    // ── Misc ────────────────────────────────────────────────────────────
    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
