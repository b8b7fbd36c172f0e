//! Spoke binary entry point: CLI args, tracing setup, and a file/stdio
//! stand-in for the OS clipboard (out of scope here; see
//! `clipmesh-core::item`). Grounded in
//! `packages/umbra-relay/src/main.rs`'s `Args`/tracing-subscriber setup,
//! adapted to the spoke's outbound-client shape.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clipmesh_core::item::{ClipboardItem, Source};
use clipmesh_core::transfer::TransferEngine;
use clipmesh_spoke::session::{PeerSession, SessionCallbacks};

#[derive(Parser, Debug)]
#[command(name = "clipmesh-spoke", about = "Clipboard sync spoke client")]
struct Args {
    /// WebSocket URL of the hub to connect to, e.g. ws://localhost:2580/ws.
    #[arg(env = "CLIPMESH_HUB_URL")]
    hub_url: String,

    /// Shared secret to present during the auth handshake.
    #[arg(long, env = "CLIPMESH_PASSWORD")]
    password: Option<String>,

    /// Send the given text once connected, then keep running to receive.
    #[arg(long)]
    send_text: Option<String>,

    /// Send stdin's contents as text once connected.
    #[arg(long, conflicts_with = "send_text")]
    send_stdin: bool,

    /// Send one or more files once connected.
    #[arg(long)]
    send_file: Vec<PathBuf>,

    /// Directory received files are written into.
    #[arg(long, default_value = "./clipmesh-received")]
    output_dir: PathBuf,

    /// Directory for transfer resume state.
    #[arg(long, env = "CLIPMESH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 256 * 1024, env = "CLIPMESH_CHUNK_SIZE")]
    chunk_size: u32,

    #[arg(long, default_value_t = 10 * 1024 * 1024, env = "CLIPMESH_CHUNK_THRESHOLD")]
    chunk_threshold: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipmesh_spoke=info,clipmesh_core=info".into()),
        )
        .init();

    let args = Args::parse();
    let connected = Arc::new(tokio::sync::Notify::new());
    let data_dir = args
        .data_dir
        .clone()
        .or_else(|| clipmesh_core::config::Config::app_dir().map(|d| d.join("transfers")))
        .unwrap_or_else(|| std::env::temp_dir().join("clipmesh-spoke"));

    std::fs::create_dir_all(&args.output_dir)?;
    let output_dir = args.output_dir.clone();

    if clipmesh_core::transfer::has_persisted_state(&data_dir) {
        tracing::info!(data_dir = %data_dir.display(), "resuming prior transfer state");
    }
    let engine = Arc::new(TransferEngine::new(data_dir, move |completed| {
        let path = output_dir.join(&completed.filename);
        if let Err(e) = std::fs::write(&path, &completed.bytes) {
            tracing::warn!(error = %e, path = %path.display(), "failed to write received file");
        } else {
            tracing::info!(path = %path.display(), "wrote received file");
        }
    })?);
    engine.load_resumable().await?;

    let connected_signal = connected.clone();
    let callbacks = SessionCallbacks {
        on_connected: Box::new(move |ok| {
            if ok {
                tracing::info!("connected to hub");
                connected_signal.notify_one();
            }
        }),
        on_reconnecting: Box::new(|| tracing::info!("reconnecting")),
        on_item_received: Box::new(|item: ClipboardItem| match &item.payload {
            clipmesh_core::item::Payload::Text(text) => println!("{text}"),
            clipmesh_core::item::Payload::Image(bytes) => {
                tracing::info!(bytes = bytes.len(), "received image item");
            }
            clipmesh_core::item::Payload::Files(blobs) => {
                for blob in blobs {
                    tracing::info!(name = %blob.name, bytes = blob.bytes.len(), "received file");
                }
            }
        }),
        on_transfer_progress: Box::new(|transfer_id, fraction| {
            tracing::debug!(transfer_id, fraction, "transfer progress");
        }),
        on_log: Box::new(|line| tracing::info!("{line}")),
    };

    let session = PeerSession::new(
        args.hub_url.clone(),
        args.password.clone(),
        engine,
        callbacks,
        args.chunk_size,
        args.chunk_threshold,
    );

    let has_send = args.send_text.is_some() || args.send_stdin || !args.send_file.is_empty();
    let background = tokio::spawn(session.clone().start());

    if has_send {
        connected.notified().await;

        if let Some(text) = &args.send_text {
            session.send_item(&ClipboardItem::from_text(text.clone(), Source::Local));
        }
        if args.send_stdin {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            session.send_item(&ClipboardItem::from_text(buf, Source::Local));
        }
        if !args.send_file.is_empty() {
            let mut candidates = Vec::with_capacity(args.send_file.len());
            for path in &args.send_file {
                let bytes = std::fs::read(path)?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "file".to_string());
                candidates.push((name, bytes, Some(path.clone())));
            }
            let (item, skipped) = ClipboardItem::from_file_contents(
                candidates,
                clipmesh_core::item::DEFAULT_MAX_FILE_SIZE,
                clipmesh_core::item::DEFAULT_MAX_TOTAL_FILE_SIZE,
                Source::Local,
            );
            for skip in &skipped {
                tracing::warn!(name = %skip.name, reason = %skip.reason, "skipped file");
            }
            session.send_item(&item);
        }
    }

    tokio::signal::ctrl_c().await?;
    session.stop();
    let _ = background.await;
    Ok(())
}
