//! Demo binary: replays a small scripted sequence against the in-memory
//! stub surface and prints each step's outcome.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use replaykit::{InitOptions, NoopHost, ReplayEngine};
use replaykit_surface::stub::{StubDebugConnector, StubDebugSession, StubSurface};
use replaykit_surface::BrowserSurface;

#[derive(Parser, Debug)]
#[command(name = "replaykit", about = "Replay a demo command sequence against a stub browser")]
struct Args {
    /// Base URL relative script URLs resolve against
    #[arg(long, default_value = "https://example.test")]
    base_url: String,

    /// Run identifier for the playback session
    #[arg(long, default_value = "demo-run")]
    run_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let surface = Arc::new(StubSurface::new());
    let connector = Arc::new(StubDebugConnector::new(Arc::new(StubDebugSession::new())));
    let engine = ReplayEngine::new(
        args.run_id,
        Arc::clone(&surface) as Arc<dyn BrowserSurface>,
        connector,
        Arc::new(NoopHost),
    );

    engine.init(&args.base_url, InitOptions::default()).await?;

    let script: &[(&str, &str, &str)] = &[
        ("open", "/login", ""),
        ("store", "alice", "user"),
        ("echo", "logging in", ""),
        ("setWindowSize", "1280x800", ""),
        ("clickElement", "id=submit", ""),
        ("close", "", ""),
    ];

    for &(command, target, value) in script {
        match engine.execute(command, target, value).await {
            Ok(response) => info!(command, target, %response, "step ok"),
            Err(err) => info!(command, target, %err, "step failed"),
        }
    }

    engine.cleanup();
    Ok(())
}
