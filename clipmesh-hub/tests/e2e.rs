//! End-to-end hub tests: a real axum server bound to an ephemeral port,
//! driven by plain `tokio-tungstenite` clients standing in for spokes.

use clipmesh_core::protocol::{ChunkNackReason, Envelope, WireChunkDescriptor};
use clipmesh_hub::state::{HubConfig, HubState};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_hub(secret: Option<String>) -> String {
    let dir = tempfile::tempdir().unwrap();
    let config = HubConfig {
        port: 0,
        shared_secret: secret,
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

async fn connect(url: &str) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut (impl SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin), env: &Envelope) {
    ws.send(Message::Text(env.to_json().unwrap())).await.unwrap();
}

async fn recv(ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin)) -> Envelope {
    let msg = tokio::time::timeout(std::time::Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for message")
        .expect("stream ended")
        .unwrap();
    match msg {
        Message::Text(text) => Envelope::from_json(&text).unwrap(),
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn text_clipboard_is_relayed_but_not_echoed() {
    let url = spawn_hub(None).await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;

    let item = Envelope::Clipboard {
        content_type: clipmesh_core::protocol::ContentType::Text,
        content_hash: "h1".into(),
        timestamp: 0,
        compressed: false,
        content: Some("hello".into()),
        image_data: None,
        files: None,
        file_paths: None,
    };
    send(&mut a, &item).await;

    let received = recv(&mut b).await;
    assert!(matches!(received, Envelope::Clipboard { ref content, .. } if content.as_deref() == Some("hello")));

    // A should not receive its own broadcast.
    let nothing = tokio::time::timeout(std::time::Duration::from_millis(200), a.next()).await;
    assert!(nothing.is_err(), "sender should not receive its own clipboard broadcast");
}

#[tokio::test]
async fn auth_required_rejects_wrong_password() {
    let url = spawn_hub(Some("correct".into())).await;
    let mut client = connect(&url).await;

    send(
        &mut client,
        &Envelope::Auth {
            password: Some("wrong".into()),
            success: None,
        },
    )
    .await;

    let reply = recv(&mut client).await;
    assert!(matches!(reply, Envelope::Auth { success: Some(false), .. }));
}

#[tokio::test]
async fn auth_required_accepts_correct_password() {
    let url = spawn_hub(Some("correct".into())).await;
    let mut client = connect(&url).await;

    send(
        &mut client,
        &Envelope::Auth {
            password: Some("correct".into()),
            success: None,
        },
    )
    .await;

    let reply = recv(&mut client).await;
    assert!(matches!(reply, Envelope::Auth { success: Some(true), .. }));
}

#[tokio::test]
async fn chunked_transfer_acks_and_nacks_route_back_to_the_originator_only() {
    let url = spawn_hub(None).await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;

    let init = Envelope::ChunkedTransferInit {
        transfer_id: "t1".into(),
        filename: "r.bin".into(),
        file_size: 4,
        file_hash: "h".into(),
        total_chunks: 1,
        chunk_size: 4,
        chunks: vec![WireChunkDescriptor {
            chunk_index: 0,
            offset: 0,
            size: 4,
            checksum: "h".into(),
        }],
    };
    send(&mut a, &init).await;
    let relayed = recv(&mut b).await;
    assert!(matches!(relayed, Envelope::ChunkedTransferInit { ref transfer_id, .. } if transfer_id == "t1"));

    send(
        &mut b,
        &Envelope::ChunkedTransferAck {
            transfer_id: "t1".into(),
            needed_chunks: vec![0],
        },
    )
    .await;
    let back_to_a = recv(&mut a).await;
    assert!(matches!(back_to_a, Envelope::ChunkedTransferAck { ref transfer_id, .. } if transfer_id == "t1"));

    send(
        &mut b,
        &Envelope::ChunkNack {
            transfer_id: "t1".into(),
            chunk_index: 0,
            error: ChunkNackReason::ChecksumError,
        },
    )
    .await;
    let nack_to_a = recv(&mut a).await;
    assert!(matches!(nack_to_a, Envelope::ChunkNack { chunk_index: 0, .. }));
}

#[tokio::test]
async fn chunk_data_only_relays_from_the_recorded_origin() {
    let url = spawn_hub(None).await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    let mut c = connect(&url).await;

    send(
        &mut a,
        &Envelope::ChunkedTransferInit {
            transfer_id: "t2".into(),
            filename: "r.bin".into(),
            file_size: 4,
            file_hash: "h".into(),
            total_chunks: 1,
            chunk_size: 4,
            chunks: vec![],
        },
    )
    .await;
    let _ = recv(&mut b).await;
    let _ = recv(&mut c).await;

    // C did not originate t2; its chunk_data must not be relayed.
    send(
        &mut c,
        &Envelope::ChunkData {
            transfer_id: "t2".into(),
            chunk_index: 0,
            offset: 0,
            size: 4,
            checksum: "h".into(),
            data: "ZGF0YQ==".into(),
            compressed: false,
        },
    )
    .await;
    let spurious = tokio::time::timeout(std::time::Duration::from_millis(200), b.next()).await;
    assert!(spurious.is_err(), "chunk_data from a non-origin session must not relay");

    // A did originate t2; its chunk_data relays to both B and C.
    send(
        &mut a,
        &Envelope::ChunkData {
            transfer_id: "t2".into(),
            chunk_index: 0,
            offset: 0,
            size: 4,
            checksum: "h".into(),
            data: "ZGF0YQ==".into(),
            compressed: false,
        },
    )
    .await;
    let to_b = recv(&mut b).await;
    assert!(matches!(to_b, Envelope::ChunkData { chunk_index: 0, .. }));
}
