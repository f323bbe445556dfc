//! Talk to Gemini Live from the terminal.
//!
//! Uses the default microphone and speaker. Set `GEMINI_API_KEY` (or
//! `API_KEY`), optionally pass a YAML config path, then press Enter to end
//! the session.
//!
//! ```text
//! GEMINI_API_KEY=... RUST_LOG=connect_live=debug \
//!     cargo run --example live_console --features cpal -- live.yaml
//! ```

use anyhow::{Context, Result};
use connect_live::devices::{CpalDevices, CpalOutput};
use connect_live::transports::GeminiTransport;
use connect_live::{LiveConfig, LiveSession, SessionState};
use futures::StreamExt;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("connect_live=info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => LiveConfig::from_path(&path).with_context(|| format!("loading {}", path))?,
        None => LiveConfig::default(),
    };

    let output = CpalOutput::open_default().context("opening speaker")?;
    let mut session = LiveSession::new(
        Arc::new(GeminiTransport::from_env().context("configuring Gemini transport")?),
        Arc::new(CpalDevices::new()),
        Arc::new(output),
        config,
    )?;

    let mut transcript = session.transcript_updates();
    tokio::spawn(async move {
        let mut previous: Vec<String> = Vec::new();
        while let Some(snapshot) = transcript.next().await {
            let lines = snapshot.lines();
            // The window slides; skip the part already printed
            let seen = (0..=previous.len().min(lines.len()))
                .rev()
                .find(|&k| previous[previous.len() - k..] == lines[..k])
                .unwrap_or(0);
            for line in &lines[seen..] {
                println!("{}", line);
            }
            previous = lines;
        }
    });

    let mut states = session.state_updates();
    tokio::spawn(async move {
        while let Some(state) = states.next().await {
            eprintln!("[{}]", state);
        }
    });

    session.start().await.context("starting session")?;
    eprintln!("Listening. Press Enter to stop.");

    let mut line = String::new();
    tokio::task::spawn_blocking(move || std::io::stdin().read_line(&mut line)).await??;

    if session.state() == SessionState::Error {
        if let Some(error) = session.last_error() {
            eprintln!("Session failed: {}", error);
            for suggestion in error.recovery_suggestions() {
                eprintln!("  - {}", suggestion);
            }
        }
    }

    session.stop().await;
    session.playback_drained().await;
    Ok(())
}
