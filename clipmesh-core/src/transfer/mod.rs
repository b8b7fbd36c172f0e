//! The chunked transfer engine (C4): task lifecycle, a concurrency-gated
//! queue, and the engine tying both to the wire protocol.

mod engine;
mod queue;
mod task;

pub use engine::{has_persisted_state, CompletedTransfer, TransferEngine};
pub use queue::{TransferQueue, DEFAULT_MAX_CONCURRENT};
pub use task::{Direction, TransferState, TransferTask};
