//! Hub binary entry point: CLI args, tracing setup, and the axum
//! WebSocket listener. Grounded in
//! `packages/umbra-relay/src/main.rs`'s `Args`/tracing-subscriber setup.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use clipmesh_hub::state::{HubConfig, HubState};

#[derive(Parser, Debug)]
#[command(name = "clipmesh-hub", about = "Clipboard sync hub")]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 2580, env = "CLIPMESH_PORT")]
    port: u16,

    /// Optional shared secret spokes must present on connect.
    #[arg(long, env = "CLIPMESH_SECRET")]
    secret: Option<String>,

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
                .unwrap_or_else(|_| "clipmesh_hub=info,clipmesh_core=info".into()),
        )
        .init();

    let args = Args::parse();
    let data_dir = args
        .data_dir
        .or_else(|| clipmesh_core::config::Config::app_dir().map(|d| d.join("transfers")))
        .unwrap_or_else(|| std::env::temp_dir().join("clipmesh-hub"));

    let config = HubConfig {
        port: args.port,
        shared_secret: args.secret,
        chunk_size: args.chunk_size,
        chunk_threshold: args.chunk_threshold,
        data_dir,
    };

    if clipmesh_core::transfer::has_persisted_state(&config.data_dir) {
        tracing::info!(data_dir = %config.data_dir.display(), "resuming prior transfer state");
    }
    let state = HubState::new(config.clone())?;
    state.engine.load_resumable().await?;

    let app = clipmesh_hub::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "clipmesh-hub listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
