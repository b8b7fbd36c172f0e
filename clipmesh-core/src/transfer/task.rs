//! Lifecycle record for one chunked transfer, outgoing or incoming.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chunking::ChunkPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Pending,
    Transferring,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, TransferState::Pending | TransferState::Transferring)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTask {
    pub transfer_id: String,
    pub filename: String,
    pub plan: ChunkPlan,
    pub direction: Direction,
    pub state: TransferState,
    /// Outgoing: chunk has been sent. Incoming: chunk has been received
    /// and validated.
    pub transferred: Vec<bool>,
    /// Outgoing only: receiver has acknowledged this chunk.
    pub received: Vec<bool>,
    pub transferred_chunks: u32,
    pub started_at: i64,
    pub updated_at: i64,
    pub error_message: Option<String>,
}

impl TransferTask {
    pub fn new_outgoing(transfer_id: String, filename: String, plan: ChunkPlan) -> Self {
        let total = plan.total_chunks as usize;
        let now = now_ms();
        Self {
            transfer_id,
            filename,
            transferred: vec![false; total],
            received: vec![false; total],
            transferred_chunks: 0,
            plan,
            direction: Direction::Outgoing,
            state: TransferState::Pending,
            started_at: now,
            updated_at: now,
            error_message: None,
        }
    }

    pub fn new_incoming(transfer_id: String, filename: String, plan: ChunkPlan) -> Self {
        let total = plan.total_chunks as usize;
        let now = now_ms();
        Self {
            transfer_id,
            filename,
            transferred: vec![false; total],
            received: vec![false; total],
            transferred_chunks: 0,
            plan,
            direction: Direction::Incoming,
            state: TransferState::Pending,
            started_at: now,
            updated_at: now,
            error_message: None,
        }
    }

    pub fn total_chunks(&self) -> u32 {
        self.plan.total_chunks
    }

    pub fn progress(&self) -> f64 {
        if self.plan.total_chunks == 0 {
            return 1.0;
        }
        self.transferred_chunks as f64 / self.plan.total_chunks as f64
    }

    /// Fraction of chunks acknowledged by the receiver (outgoing tasks
    /// only). End-to-end progress for a hub-originated transfer is
    /// `0.5 * progress() + 0.5 * ack_progress()`: the first half of the
    /// bar fills as chunks go out, the second half as they're acked.
    pub fn ack_progress(&self) -> f64 {
        if self.plan.total_chunks == 0 {
            return 1.0;
        }
        let acked = self.received.iter().filter(|r| **r).count();
        acked as f64 / self.plan.total_chunks as f64
    }

    pub fn pending_chunks(&self) -> Vec<u32> {
        self.transferred
            .iter()
            .enumerate()
            .filter(|(_, done)| !**done)
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Mark a chunk transferred; idempotent. Returns `true` if this call
    /// was the one that flipped the flag (so callers only advance
    /// counters once).
    pub fn mark_transferred(&mut self, index: u32) -> bool {
        let idx = index as usize;
        if idx >= self.transferred.len() || self.transferred[idx] {
            return false;
        }
        self.transferred[idx] = true;
        self.transferred_chunks += 1;
        self.updated_at = now_ms();
        if self.state == TransferState::Pending {
            self.state = TransferState::Transferring;
        }
        if self.transferred_chunks == self.plan.total_chunks {
            self.state = TransferState::Completed;
        }
        true
    }

    /// Mark a chunk as acknowledged by the receiver (outgoing tasks
    /// only). Returns `true` once every chunk has been acked.
    pub fn mark_acked(&mut self, index: u32) -> bool {
        let idx = index as usize;
        if idx < self.received.len() {
            self.received[idx] = true;
        }
        self.updated_at = now_ms();
        let all_acked = self.received.iter().all(|r| *r);
        if all_acked {
            self.state = TransferState::Completed;
        }
        all_acked
    }

    pub fn mark_failed(&mut self, error_message: impl Into<String>) {
        self.state = TransferState::Failed;
        self.error_message = Some(error_message.into());
        self.updated_at = now_ms();
    }

    pub fn mark_cancelled(&mut self) {
        self.state = TransferState::Cancelled;
        self.updated_at = now_ms();
    }

    pub fn mark_paused(&mut self) {
        if !self.state.is_terminal() {
            self.state = TransferState::Paused;
            self.updated_at = now_ms();
        }
    }
}
