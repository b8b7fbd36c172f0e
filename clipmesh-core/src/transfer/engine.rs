//! # Transfer Engine
//!
//! Owns outgoing and incoming [`TransferTask`]s, drives the chunked
//! send/receive state machines, and persists resumable state to disk.
//! Grounded in `original_source/src/chunked_transfer.py`'s
//! `ChunkedTransferManager`: periodic partial-data persistence every 10
//! chunks, a `transfer_state.json` resume index, and `<id>.partial`
//! sidecar files holding the raw receive buffer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunking::{self, ChunkDescriptor, ChunkPlan};
use crate::codec;
use crate::error::{Error, Result};
use crate::protocol::{ChunkNackReason, Envelope, WireChunkDescriptor};
use crate::transfer::queue::{TransferQueue, DEFAULT_MAX_CONCURRENT};
use crate::transfer::task::{Direction, TransferState, TransferTask};

const PERSIST_EVERY_N_CHUNKS: u32 = 10;

/// Delivered to the engine's completion callback once a transfer's
/// whole-file hash has been verified.
pub struct CompletedTransfer {
    pub transfer_id: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

struct OutgoingEntry {
    task: TransferTask,
    source: Vec<u8>,
}

struct IncomingEntry {
    task: TransferTask,
    buffer: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct PersistedIncoming {
    task: TransferTask,
    buffer_path: String,
}

pub struct TransferEngine {
    data_dir: PathBuf,
    outgoing: Mutex<HashMap<String, OutgoingEntry>>,
    incoming: Mutex<HashMap<String, IncomingEntry>>,
    send_queue: Mutex<TransferQueue>,
    receive_queue: Mutex<TransferQueue>,
    on_complete: Box<dyn Fn(CompletedTransfer) + Send + Sync>,
}

impl TransferEngine {
    pub fn new(data_dir: impl Into<PathBuf>, on_complete: impl Fn(CompletedTransfer) + Send + Sync + 'static) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            outgoing: Mutex::new(HashMap::new()),
            incoming: Mutex::new(HashMap::new()),
            send_queue: Mutex::new(TransferQueue::new(DEFAULT_MAX_CONCURRENT)),
            receive_queue: Mutex::new(TransferQueue::new(DEFAULT_MAX_CONCURRENT)),
            on_complete: Box::new(on_complete),
        })
    }

    fn state_file_path(&self) -> PathBuf {
        self.data_dir.join("transfer_state.json")
    }

    fn partial_path(&self, transfer_id: &str) -> PathBuf {
        self.data_dir.join(format!("{transfer_id}.partial"))
    }

    // ── Outgoing path ──────────────────────────────────────────────────

    /// Returns `None` if `bytes` is under `chunk_threshold` — callers
    /// should send such payloads inline instead.
    pub fn prepare_send(
        &self,
        filename: impl Into<String>,
        bytes: Vec<u8>,
        chunk_size: u32,
        chunk_threshold: u64,
    ) -> Result<Option<TransferTask>> {
        if (bytes.len() as u64) < chunk_threshold {
            return Ok(None);
        }
        let plan = chunking::plan(&bytes, chunk_size)?;
        let transfer_id = Uuid::new_v4().simple().to_string();
        let task = TransferTask::new_outgoing(transfer_id.clone(), filename.into(), plan);

        let mut outgoing = self.outgoing.lock();
        outgoing.insert(
            transfer_id.clone(),
            OutgoingEntry {
                task: task.clone(),
                source: bytes,
            },
        );
        drop(outgoing);
        self.send_queue.lock().add(transfer_id);
        Ok(Some(task))
    }

    pub fn transfer_init_message(&self, transfer_id: &str) -> Result<Envelope> {
        let outgoing = self.outgoing.lock();
        let entry = outgoing
            .get(transfer_id)
            .ok_or_else(|| Error::UnknownTransfer(transfer_id.to_string()))?;
        Ok(plan_to_init_envelope(&entry.task.transfer_id, &entry.task.filename, &entry.task.plan))
    }

    /// Slices the source bytes, compresses adaptively, and yields the
    /// chunk envelope. Pure — does not mutate task state.
    pub fn chunk_payload(&self, transfer_id: &str, index: u32) -> Result<Envelope> {
        let outgoing = self.outgoing.lock();
        let entry = outgoing
            .get(transfer_id)
            .ok_or_else(|| Error::UnknownTransfer(transfer_id.to_string()))?;
        let descriptor = entry
            .task
            .plan
            .chunks
            .get(index as usize)
            .ok_or_else(|| Error::MalformedMessage(format!("chunk index {index} out of range")))?;
        let start = descriptor.offset as usize;
        let end = start + descriptor.size as usize;
        let slice = &entry.source[start..end];
        let (data, compressed) = codec::encode(slice);
        Ok(Envelope::ChunkData {
            transfer_id: transfer_id.to_string(),
            chunk_index: descriptor.index,
            offset: descriptor.offset,
            size: descriptor.size,
            checksum: descriptor.checksum.clone(),
            data,
            compressed,
        })
    }

    pub fn mark_chunk_sent(&self, transfer_id: &str, index: u32) -> Result<TransferState> {
        let mut outgoing = self.outgoing.lock();
        let entry = outgoing
            .get_mut(transfer_id)
            .ok_or_else(|| Error::UnknownTransfer(transfer_id.to_string()))?;
        entry.task.mark_transferred(index);
        Ok(entry.task.state)
    }

    /// Drives hub-side end-to-end progress for hub-originated transfers:
    /// completion is determined by ack count, not send count. Returns the
    /// resulting state and the 0.0–1.0 end-to-end progress (half from
    /// chunks sent, half from chunks acked).
    pub fn mark_chunk_acked(&self, transfer_id: &str, index: u32) -> Result<TransferState> {
        Ok(self.mark_chunk_acked_with_progress(transfer_id, index)?.0)
    }

    pub fn mark_chunk_acked_with_progress(
        &self,
        transfer_id: &str,
        index: u32,
    ) -> Result<(TransferState, f64)> {
        let mut outgoing = self.outgoing.lock();
        let entry = outgoing
            .get_mut(transfer_id)
            .ok_or_else(|| Error::UnknownTransfer(transfer_id.to_string()))?;
        entry.task.mark_acked(index);
        let state = entry.task.state;
        let progress = 0.5 * entry.task.progress() + 0.5 * entry.task.ack_progress();
        if state.is_terminal() {
            outgoing.remove(transfer_id);
            drop(outgoing);
            self.send_queue.lock().complete(transfer_id);
        }
        Ok((state, progress))
    }

    // ── Incoming path ──────────────────────────────────────────────────

    /// Idempotency rule: resumes a matching `Paused` task with the same
    /// `transfer_id` and `file_hash`, returning only the still-missing
    /// indices; otherwise allocates a fresh task and a zeroed buffer.
    pub async fn handle_transfer_init(&self, init: &Envelope) -> Result<Envelope> {
        let (transfer_id, filename, file_size, file_hash, total_chunks, chunk_size, chunks) =
            match init {
                Envelope::ChunkedTransferInit {
                    transfer_id,
                    filename,
                    file_size,
                    file_hash,
                    total_chunks,
                    chunk_size,
                    chunks,
                } => (
                    transfer_id.clone(),
                    filename.clone(),
                    *file_size,
                    file_hash.clone(),
                    *total_chunks,
                    *chunk_size,
                    chunks.clone(),
                ),
                _ => {
                    return Err(Error::MalformedMessage(
                        "expected chunked_transfer_init".into(),
                    ))
                }
            };

        let needed_chunks = {
            let mut incoming = self.incoming.lock();
            match incoming.get_mut(&transfer_id) {
                Some(entry) if entry.task.state == TransferState::Paused && entry.task.plan.file_hash == file_hash => {
                    entry.task.state = TransferState::Transferring;
                    entry.task.pending_chunks()
                }
                _ => {
                    let descriptors: Vec<ChunkDescriptor> =
                        chunks.iter().map(ChunkDescriptor::from).collect();
                    let plan = ChunkPlan {
                        total_size: file_size,
                        chunk_size,
                        total_chunks,
                        chunks: descriptors,
                        file_hash,
                    };
                    let mut task = TransferTask::new_incoming(transfer_id.clone(), filename, plan);
                    task.state = TransferState::Transferring;
                    let needed = task.pending_chunks();
                    incoming.insert(
                        transfer_id.clone(),
                        IncomingEntry {
                            task,
                            buffer: vec![0u8; file_size as usize],
                        },
                    );
                    self.receive_queue.lock().add(transfer_id.clone());
                    needed
                }
            }
        };

        self.save_state().await?;

        Ok(Envelope::ChunkedTransferAck {
            transfer_id,
            needed_chunks,
        })
    }

    /// Returns `Ok(None)` for an unknown `transfer_id` — the caller
    /// should drop the message silently (after logging), per the
    /// unknown-id policy.
    pub async fn handle_chunk_data(&self, chunk: &Envelope) -> Result<Option<Envelope>> {
        let (transfer_id, chunk_index, offset, size, checksum, data, compressed) = match chunk {
            Envelope::ChunkData {
                transfer_id,
                chunk_index,
                offset,
                size,
                checksum,
                data,
                compressed,
            } => (
                transfer_id.clone(),
                *chunk_index,
                *offset,
                *size,
                checksum.clone(),
                data.clone(),
                *compressed,
            ),
            _ => return Err(Error::MalformedMessage("expected chunk_data".into())),
        };

        let decoded = match codec::decode(&data, compressed) {
            Ok(bytes) => bytes,
            Err(_) => {
                return Ok(Some(Envelope::ChunkNack {
                    transfer_id,
                    chunk_index,
                    error: ChunkNackReason::DecodeError,
                }))
            }
        };

        let descriptor = ChunkDescriptor {
            index: chunk_index,
            offset,
            size,
            checksum,
        };
        if chunking::verify_chunk(&descriptor, &decoded).is_err() {
            return Ok(Some(Envelope::ChunkNack {
                transfer_id,
                chunk_index,
                error: ChunkNackReason::ChecksumError,
            }));
        }

        enum Outcome {
            UnknownTransfer,
            Ack,
            NeedsPersist,
            Complete { filename: String, bytes: Vec<u8> },
            HashMismatch,
        }

        let outcome = {
            let mut incoming = self.incoming.lock();
            match incoming.get_mut(&transfer_id) {
                None => {
                    tracing::warn!(transfer_id = %transfer_id, "chunk_data for unknown transfer_id; dropping");
                    Outcome::UnknownTransfer
                }
                Some(entry) => {
                    let start = offset as usize;
                    let end = start + size as usize;
                    if end > entry.buffer.len() {
                        entry.buffer.resize(end, 0);
                    }
                    entry.buffer[start..end].copy_from_slice(&decoded);
                    entry.task.mark_transferred(chunk_index);

                    if entry.task.transferred_chunks == entry.task.total_chunks() {
                        if chunking::verify_whole(&entry.task.plan, &entry.buffer, &transfer_id).is_ok() {
                            Outcome::Complete {
                                filename: entry.task.filename.clone(),
                                bytes: entry.buffer.clone(),
                            }
                        } else {
                            entry.task.mark_failed("hash_mismatch");
                            Outcome::HashMismatch
                        }
                    } else if entry.task.transferred_chunks % PERSIST_EVERY_N_CHUNKS == 0 {
                        Outcome::NeedsPersist
                    } else {
                        Outcome::Ack
                    }
                }
            }
        };

        match outcome {
            Outcome::UnknownTransfer => Ok(None),
            Outcome::Ack => Ok(Some(Envelope::ChunkAck {
                transfer_id,
                chunk_index,
            })),
            Outcome::NeedsPersist => {
                self.save_partial(&transfer_id).await?;
                self.save_state().await?;
                Ok(Some(Envelope::ChunkAck {
                    transfer_id,
                    chunk_index,
                }))
            }
            Outcome::HashMismatch => {
                self.cleanup_transfer(&transfer_id).await?;
                Ok(Some(Envelope::TransferError {
                    transfer_id,
                    error: "hash_mismatch".to_string(),
                }))
            }
            Outcome::Complete { filename, bytes } => {
                let file_size = bytes.len() as u64;
                (self.on_complete)(CompletedTransfer {
                    transfer_id: transfer_id.clone(),
                    filename: filename.clone(),
                    bytes,
                });
                self.cleanup_transfer(&transfer_id).await?;
                Ok(Some(Envelope::TransferComplete {
                    transfer_id,
                    filename,
                    file_size,
                }))
            }
        }
    }

    pub async fn cancel(&self, transfer_id: &str) -> Result<bool> {
        let found_outgoing = self.outgoing.lock().remove(transfer_id).is_some();
        let found_incoming = {
            let mut incoming = self.incoming.lock();
            if let Some(mut entry) = incoming.remove(transfer_id) {
                entry.task.mark_cancelled();
                true
            } else {
                false
            }
        };
        self.send_queue.lock().cancel(transfer_id);
        self.receive_queue.lock().cancel(transfer_id);

        if found_incoming {
            let _ = tokio::fs::remove_file(self.partial_path(transfer_id)).await;
            self.save_state().await?;
        }
        Ok(found_outgoing || found_incoming)
    }

    async fn cleanup_transfer(&self, transfer_id: &str) -> Result<()> {
        self.incoming.lock().remove(transfer_id);
        self.receive_queue.lock().complete(transfer_id);
        let _ = tokio::fs::remove_file(self.partial_path(transfer_id)).await;
        self.save_state().await
    }

    // ── Persistence ──────────────────────────────────────────────────

    async fn save_partial(&self, transfer_id: &str) -> Result<()> {
        let buffer = {
            let incoming = self.incoming.lock();
            incoming.get(transfer_id).map(|e| e.buffer.clone())
        };
        if let Some(buffer) = buffer {
            tokio::fs::write(self.partial_path(transfer_id), buffer).await?;
        }
        Ok(())
    }

    async fn save_state(&self) -> Result<()> {
        let snapshot: Vec<PersistedIncoming> = {
            let incoming = self.incoming.lock();
            incoming
                .values()
                .filter(|e| !e.task.state.is_terminal())
                .map(|e| PersistedIncoming {
                    task: e.task.clone(),
                    buffer_path: self
                        .partial_path(&e.task.transfer_id)
                        .to_string_lossy()
                        .to_string(),
                })
                .collect()
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(self.state_file_path(), json).await?;
        Ok(())
    }

    /// Scans `transfer_state.json` for incoming tasks in non-terminal
    /// states, coerces them to `Paused`, and rebinds their partial
    /// buffer (zero-padded if the sidecar is missing). Corrupt or
    /// unreadable state is treated as "no prior state" — logged and
    /// discarded, never propagated as a load failure.
    pub async fn load_resumable(&self) -> Result<()> {
        let raw = match tokio::fs::read(self.state_file_path()).await {
            Ok(raw) => raw,
            Err(_) => return Ok(()),
        };
        let entries: Vec<PersistedIncoming> = match serde_json::from_slice(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "corrupt transfer_state.json; starting with no prior state");
                return Ok(());
            }
        };

        let mut incoming = self.incoming.lock();
        for mut persisted in entries {
            let total_size = persisted.task.plan.total_size as usize;
            let buffer = match tokio::fs::read(&persisted.buffer_path).await {
                Ok(buf) if buf.len() == total_size => buf,
                _ => vec![0u8; total_size],
            };
            persisted.task.mark_paused();
            self.receive_queue.lock().add(persisted.task.transfer_id.clone());
            incoming.insert(
                persisted.task.transfer_id.clone(),
                IncomingEntry {
                    task: persisted.task,
                    buffer,
                },
            );
        }
        Ok(())
    }
}

fn plan_to_init_envelope(transfer_id: &str, filename: &str, plan: &ChunkPlan) -> Envelope {
    Envelope::ChunkedTransferInit {
        transfer_id: transfer_id.to_string(),
        filename: filename.to_string(),
        file_size: plan.total_size,
        file_hash: plan.file_hash.clone(),
        total_chunks: plan.total_chunks,
        chunk_size: plan.chunk_size,
        chunks: plan.chunks.iter().map(WireChunkDescriptor::from).collect(),
    }
}

/// Whether a path looks like a transfer engine data directory that's
/// actually been initialized (used by callers deciding whether to call
/// [`TransferEngine::load_resumable`]).
pub fn has_persisted_state(data_dir: &Path) -> bool {
    data_dir.join("transfer_state.json").exists()
}
