//! # Regimen Companion - Main Application Entry Point
//!
//! Runs one voice session against the realtime service, or with `chat` as
//! the first argument, a text support chat on stdin/stdout.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: the session is driven by awaiting channel and playback events
//! - **static**: a global shutdown flag set from the signal handler task
//! - **Feature flags**: real sound devices only with `device-audio`
//!
//! ## Startup Order:
//! 1. `.env`, tracing, and layered configuration
//! 2. Local journal, with today's adherence summary logged
//! 3. Audio backends and the websocket connector
//! 4. Connect, then drive the session until it ends or a signal arrives

use anyhow::Result;
use chrono::Local;
use regimen_companion::audio::capture::CapturePipeline;
use regimen_companion::audio::playback::PlaybackScheduler;
use regimen_companion::chat::{ChatSession, GeminiTextClient};
use regimen_companion::config::AppConfig;
use regimen_companion::health::status_report;
use regimen_companion::state::AppState;
use regimen_companion::store::{Journal, LocalStore};
use regimen_companion::voice::controller::SessionOptions;
use regimen_companion::voice::live::LiveConnector;
use regimen_companion::voice::SessionController;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting regimen-companion v{}", env!("CARGO_PKG_VERSION"));
    info!("Voice model {} via {}", config.voice.model, config.voice.endpoint);

    let app_state = AppState::new(config.clone());

    let journal = Journal::load(LocalStore::open(config.data_dir())?)?;
    let summary = journal.summary(Local::now().date_naive());
    info!(
        "Today: {}/{} doses taken ({}%), streak {} days, symptoms logged: {}",
        summary.taken, summary.total, summary.progress_percent, summary.streak_days, summary.logged_today
    );

    setup_signal_handlers();

    if std::env::args().nth(1).as_deref() == Some("chat") {
        return run_chat(&config).await;
    }

    run_voice(&config, app_state).await
}

async fn run_voice(config: &AppConfig, app_state: AppState) -> Result<()> {
    let connector = LiveConnector::new(config.voice.endpoint.clone(), config.api.key.clone())?;
    let (capture, playback) = audio_backends(config)?;
    info!("Audio: {} -> {}", capture.describe_source(), playback.describe_output());

    let mut controller = SessionController::new(
        capture,
        playback,
        Arc::new(connector),
        config.connect_request(),
        SessionOptions::from_config(&config.audio),
        app_state.clone(),
    );

    if let Err(e) = controller.connect() {
        error!("Could not start the voice session: {}", e);
        return Err(e.into());
    }
    log_status(&app_state, &controller);

    controller
        .run_until(wait_for_shutdown(), |c| log_status(&app_state, c))
        .await;

    info!("Voice session ended");
    controller.outcome()?;
    Ok(())
}

async fn run_chat(config: &AppConfig) -> Result<()> {
    let client = GeminiTextClient::new(&config.chat, config.api.key.clone())?;
    let mut session = ChatSession::new(client, &config.chat);
    if let Some(welcome) = session.messages().first() {
        println!("{}", welcome.text);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = wait_for_shutdown() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if let Some(reply) = session.send(&line).await {
            println!("{}", reply.text);
        }
    }
    info!("Chat ended after {} messages", session.messages().len());
    Ok(())
}

#[cfg(feature = "device-audio")]
fn audio_backends(config: &AppConfig) -> Result<(CapturePipeline, PlaybackScheduler)> {
    use regimen_companion::audio::device::{CpalMicrophone, CpalSpeaker, DeviceSelector};

    let input: DeviceSelector = config.audio.input_device.parse().unwrap_or_default();
    let output: DeviceSelector = config.audio.output_device.parse().unwrap_or_default();
    let microphone = CpalMicrophone::new(input, config.audio.input_sample_rate);
    let speaker = CpalSpeaker::open(&output)?;
    Ok((
        CapturePipeline::new(Box::new(microphone), config.audio.frame_size),
        PlaybackScheduler::new(Box::new(speaker)),
    ))
}

#[cfg(not(feature = "device-audio"))]
fn audio_backends(config: &AppConfig) -> Result<(CapturePipeline, PlaybackScheduler)> {
    use regimen_companion::audio::capture::SilentMicrophone;
    use regimen_companion::audio::playback::VirtualOutput;

    warn!("Built without device-audio: sending silence and discarding replies");
    let microphone = SilentMicrophone::new(config.audio.input_sample_rate, config.audio.frame_size / 4);
    Ok((
        CapturePipeline::new(Box::new(microphone), config.audio.frame_size),
        PlaybackScheduler::new(Box::new(VirtualOutput::new())),
    ))
}

fn log_status(app_state: &AppState, controller: &SessionController) {
    let report = status_report(app_state, controller.state(), controller.live_segments().len());
    info!("Status: {}", report);
}

/// Set up structured logging. `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "regimen_companion=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(term), Ok(int)) => (term, int),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!("Failed to install signal handlers: {}", e);
                        return;
                    }
                };
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C");
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Resolves once the shutdown flag is set. Polls every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
