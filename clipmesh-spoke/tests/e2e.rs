//! End-to-end spoke tests: a real hub (`clipmesh-hub`'s router, in
//! process) and real `PeerSession`s talking to it over loopback
//! WebSockets.

use std::sync::Arc;
use std::time::Duration;

use clipmesh_core::item::{ClipboardItem, Payload, Source};
use clipmesh_core::transfer::TransferEngine;
use clipmesh_hub::state::{HubConfig, HubState};
use clipmesh_spoke::session::{PeerSession, SessionCallbacks};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

async fn spawn_hub() -> String {
    let dir = tempfile::tempdir().unwrap();
    let config = HubConfig {
        data_dir: dir.into_path(),
        ..HubConfig::default()
    };
    let state = HubState::new(config).unwrap();
    state.engine.load_resumable().await.unwrap();
    let app = clipmesh_hub::router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

/// Spawns a `PeerSession` against `url`, returning it alongside a
/// receiver of every item its `on_item_received` callback fires and a
/// notifier that fires once the session reports connected.
fn spawn_session(
    url: &str,
    data_dir: std::path::PathBuf,
) -> (Arc<PeerSession>, mpsc::UnboundedReceiver<ClipboardItem>, Arc<tokio::sync::Notify>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connected = Arc::new(tokio::sync::Notify::new());
    let connected_signal = connected.clone();

    let engine = Arc::new(TransferEngine::new(data_dir, |_| {}).unwrap());
    let callbacks = SessionCallbacks {
        on_connected: Box::new(move |ok| {
            if ok {
                connected_signal.notify_one();
            }
        }),
        on_item_received: Box::new(move |item| {
            let _ = tx.send(item);
        }),
        ..SessionCallbacks::default()
    };

    let session = PeerSession::new(url.to_string(), None, engine, callbacks, 64 * 1024, 256 * 1024);
    tokio::spawn(session.clone().start());
    (session, rx, connected)
}

async fn await_connected(n: &tokio::sync::Notify) {
    tokio::time::timeout(Duration::from_secs(2), n.notified())
        .await
        .expect("session never connected");
}

async fn await_item(rx: &mut mpsc::UnboundedReceiver<ClipboardItem>) -> ClipboardItem {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for item")
        .expect("channel closed")
}

#[tokio::test]
async fn small_text_round_trips_and_does_not_echo() {
    let url = spawn_hub().await;
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (session_a, _rx_a, connected_a) = spawn_session(&url, dir_a.into_path());
    let (_session_b, mut rx_b, connected_b) = spawn_session(&url, dir_b.into_path());

    await_connected(&connected_a).await;
    await_connected(&connected_b).await;

    let item = ClipboardItem::from_text("hello", Source::Local);
    session_a.send_item(&item);

    let received = await_item(&mut rx_b).await;
    match received.payload {
        Payload::Text(ref s) => assert_eq!(s, "hello"),
        _ => panic!("expected text payload"),
    }
    assert_eq!(received.content_hash, item.content_hash);
}

#[tokio::test]
async fn large_text_is_compressed_in_flight_and_decodes_back() {
    let url = spawn_hub().await;
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (session_a, _rx_a, connected_a) = spawn_session(&url, dir_a.into_path());
    let (_session_b, mut rx_b, connected_b) = spawn_session(&url, dir_b.into_path());

    await_connected(&connected_a).await;
    await_connected(&connected_b).await;

    let big_text = "x".repeat(10_000);
    let item = ClipboardItem::from_text(big_text.clone(), Source::Local);
    session_a.send_item(&item);

    let received = await_item(&mut rx_b).await;
    match received.payload {
        Payload::Text(ref s) => assert_eq!(s, &big_text),
        _ => panic!("expected text payload"),
    }
}

#[tokio::test]
async fn chunked_file_transfer_completes_and_materializes_bytes() {
    let url = spawn_hub().await;

    let dir_a = tempfile::tempdir().unwrap();
    let connected_a = Arc::new(tokio::sync::Notify::new());
    let signal_a = connected_a.clone();
    let engine_a = Arc::new(TransferEngine::new(dir_a.into_path(), |_| {}).unwrap());
    let callbacks_a = SessionCallbacks {
        on_connected: Box::new(move |ok| if ok { signal_a.notify_one() }),
        ..SessionCallbacks::default()
    };
    let session_a = PeerSession::new(url.clone(), None, engine_a, callbacks_a, 4096, 8192);
    tokio::spawn(session_a.clone().start());

    let dir_b = tempfile::tempdir().unwrap();
    let (complete_tx, mut complete_rx) = mpsc::unbounded_channel();
    let connected_b = Arc::new(tokio::sync::Notify::new());
    let signal_b = connected_b.clone();
    let engine_b = Arc::new(TransferEngine::new(dir_b.into_path(), move |completed| {
        let _ = complete_tx.send((completed.filename, completed.bytes));
    }).unwrap());
    let callbacks_b = SessionCallbacks {
        on_connected: Box::new(move |ok| if ok { signal_b.notify_one() }),
        ..SessionCallbacks::default()
    };
    let session_b = PeerSession::new(url, None, engine_b, callbacks_b, 4096, 8192);
    tokio::spawn(session_b.clone().start());

    await_connected(&connected_a).await;
    await_connected(&connected_b).await;

    // Larger than the 8 KiB threshold so it routes through the chunked
    // transfer engine instead of an inline `clipboard` envelope.
    let bytes: Vec<u8> = (0..20_000u32).map(|i| (i % 256) as u8).collect();
    let (item, skipped) = ClipboardItem::from_file_contents(
        vec![("r.bin".to_string(), bytes.clone(), None)],
        clipmesh_core::item::DEFAULT_MAX_FILE_SIZE,
        clipmesh_core::item::DEFAULT_MAX_TOTAL_FILE_SIZE,
        Source::Local,
    );
    assert!(skipped.is_empty());
    session_a.send_item(&item);

    let (filename, received_bytes) = tokio::time::timeout(Duration::from_secs(5), complete_rx.recv())
        .await
        .expect("timed out waiting for transfer completion")
        .expect("completion channel closed");
    assert_eq!(filename, "r.bin");
    assert_eq!(received_bytes, bytes);
}
