//! Shared hub state: connected clients, per-transfer routing, and the
//! hub's own `TransferEngine` for hub-originated pushes. Grounded in
//! `packages/umbra-relay/src/state.rs`'s `RelayState` (`DashMap`-backed
//! client/session maps, a `RelayConfig` with `Default`).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use clipmesh_core::protocol::Envelope;
use clipmesh_core::transfer::TransferEngine;
use dashmap::DashMap;
use tokio::sync::mpsc;

pub type ClientSender = mpsc::UnboundedSender<Envelope>;

/// CLI-configurable hub behavior. Mirrors `umbra-relay`'s `RelayConfig`.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub port: u16,
    pub shared_secret: Option<String>,
    pub chunk_size: u32,
    pub chunk_threshold: u64,
    pub data_dir: PathBuf,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: 2580,
            shared_secret: None,
            chunk_size: 256 * 1024,
            chunk_threshold: 10 * 1024 * 1024,
            data_dir: std::env::temp_dir().join("clipmesh-hub"),
        }
    }
}

/// Routing record for one active transfer. `origin = None` denotes a
/// transfer the hub itself initiated; `Some(session_id)` denotes a
/// relay from that spoke to the others.
#[derive(Debug, Clone)]
pub struct HubTransferRoute {
    pub origin: Option<String>,
    pub filename: String,
}

/// Per-receiver pending-chunk queue for a hub-originated transfer,
/// consumed by the batch sender.
pub type PendingSends = Arc<DashMap<String, DashMap<String, VecDeque<u32>>>>;

#[derive(Clone)]
pub struct HubState {
    pub clients: Arc<DashMap<String, ClientSender>>,
    pub routes: Arc<DashMap<String, HubTransferRoute>>,
    pub pending_sends: PendingSends,
    pub engine: Arc<TransferEngine>,
    pub config: HubConfig,
}

impl HubState {
    pub fn new(config: HubConfig) -> clipmesh_core::Result<Self> {
        let engine = TransferEngine::new(config.data_dir.clone(), |_completed| {
            // The hub does not materialize files for transfers it
            // originates from its own clipboard; origination flows that
            // need the bytes keep them at the call site instead.
        })?;
        Ok(Self {
            clients: Arc::new(DashMap::new()),
            routes: Arc::new(DashMap::new()),
            pending_sends: Arc::new(DashMap::new()),
            engine: Arc::new(engine),
            config,
        })
    }

    pub fn register_client(&self, session_id: &str, sender: ClientSender) {
        self.clients.insert(session_id.to_string(), sender);
        tracing::info!(session_id, clients = self.clients.len(), "client registered");
    }

    pub fn unregister_client(&self, session_id: &str) {
        self.clients.remove(session_id);
        self.routes
            .retain(|_, route| route.origin.as_deref() != Some(session_id));
        tracing::info!(session_id, clients = self.clients.len(), "client unregistered");
    }

    /// Send `envelope` to every client except `exclude`.
    pub fn broadcast_except(&self, exclude: &str, envelope: &Envelope) {
        for entry in self.clients.iter() {
            if entry.key() != exclude {
                let _ = entry.value().send(envelope.clone());
            }
        }
    }

    pub fn send_to(&self, session_id: &str, envelope: Envelope) -> bool {
        match self.clients.get(session_id) {
            Some(sender) => sender.send(envelope).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_state() -> HubState {
        let dir = tempfile::tempdir().unwrap();
        HubState::new(HubConfig {
            data_dir: dir.into_path(),
            ..HubConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn register_and_send_to_round_trips() {
        let state = new_state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.register_client("a", tx);
        assert!(state.send_to("a", Envelope::Ping));
        assert!(matches!(rx.try_recv().unwrap(), Envelope::Ping));
    }

    #[test]
    fn send_to_unknown_session_returns_false() {
        let state = new_state();
        assert!(!state.send_to("ghost", Envelope::Ping));
    }

    #[test]
    fn broadcast_except_skips_the_excluded_client() {
        let state = new_state();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        state.register_client("a", tx_a);
        state.register_client("b", tx_b);

        state.broadcast_except("a", &Envelope::Ping);

        assert!(rx_a.try_recv().is_err());
        assert!(matches!(rx_b.try_recv().unwrap(), Envelope::Ping));
    }

    #[test]
    fn unregister_prunes_routes_originated_by_that_client() {
        let state = new_state();
        state.routes.insert(
            "t1".to_string(),
            HubTransferRoute {
                origin: Some("a".to_string()),
                filename: "f.bin".to_string(),
            },
        );
        state.routes.insert(
            "t2".to_string(),
            HubTransferRoute {
                origin: None,
                filename: "g.bin".to_string(),
            },
        );

        state.unregister_client("a");

        assert!(!state.routes.contains_key("t1"));
        assert!(state.routes.contains_key("t2"));
    }
}
