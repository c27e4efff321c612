use anyhow::{Context, Result};
use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use thursday::audio::CpalDevices;
use thursday::memory::VolatileMemory;
use thursday::session::{SessionConfig, SessionHandle, SessionUpdate};
use thursday::transport::LiveTransport;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thursday=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SessionConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => SessionConfig::default(),
    }
    .with_env();

    info!("Starting Thursday ({} voice)", config.voice);

    let transport = LiveTransport::new(
        config.endpoint.clone(),
        config.api_key.clone().unwrap_or_default(),
    )?;
    let mut session = SessionHandle::start(
        config,
        Arc::new(CpalDevices),
        Arc::new(transport),
        Arc::new(VolatileMemory::new()),
    )?;

    let updates = session.updates().clone();
    thread::Builder::new()
        .name("updates".into())
        .spawn(move || {
            for update in updates.iter() {
                match update {
                    SessionUpdate::StatusChanged(status) => println!("[status] {}", status),
                    SessionUpdate::TranscriptChanged(t) => {
                        println!("[you] {}\n[thursday] {}", t.user, t.model)
                    }
                    SessionUpdate::SpeakingChanged(true) => println!("[thursday is speaking]"),
                    SessionUpdate::MuteChanged(muted) => println!("[mic {}]", if muted { "muted" } else { "live" }),
                    SessionUpdate::ToolHandled { name, ok } => println!("[tool] {} {}", name, if ok { "ok" } else { "failed" }),
                    SessionUpdate::Error(message) => println!("[error] {}", message),
                    // Levels arrive every few milliseconds
                    SessionUpdate::Volume(_)
                    | SessionUpdate::SpeakingChanged(false)
                    | SessionUpdate::TurnComplete => {}
                }
            }
        })?;

    if let Err(e) = session.connect() {
        println!("[error] {}", e.user_message());
    }

    println!("Commands: m = mute, r = reconnect, d = disconnect, l = log, q = quit, anything else is sent as text");
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        match line.trim() {
            "" => {}
            "m" => {
                session.toggle_mute();
            }
            "r" => {
                if let Err(e) = session.connect() {
                    println!("[error] {}", e.user_message());
                }
            }
            "d" => session.disconnect()?,
            "l" => {
                for entry in session.logs() {
                    println!("{}", entry);
                }
            }
            "q" => break,
            text => session.send_text(text)?,
        }
    }

    session.shutdown();
    Ok(())
}
