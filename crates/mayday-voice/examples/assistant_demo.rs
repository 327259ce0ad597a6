//! Assistant demo - typed turns against real or scripted backends, with
//! optional microphone input.
//!
//! Reads lines from stdin as user turns. `/talk` runs one voice turn when a
//! microphone and an STT key are available; `/yes` and `/no` answer the
//! confirmation prompt; `/quit` closes the session.
//!
//! Set `MAYDAY_CLASSIFIER_URL` / `MAYDAY_DISPATCH_URL` / `MAYDAY_API_KEY` in
//! `.env` to run against real endpoints; without them the scripted classifier
//! echoes and never detects a category.

use mayday_core::{
    AssistConfig, Classifier, DispatchBackend, FixedPosition, Geocoder, HttpClassifier,
    HttpDispatch, HttpGeocoder, LocationResolver, RecordingDispatch, ScriptedClassifier,
    StaticGeocoder,
};
use mayday_voice::{
    AudioCapture, AudioConfig, AudioLevelMonitor, ConversationSession, HttpTts, PlaceholderTts,
    SessionEvent, SpeechPlayback, SpeechRecognitionController, SpeechSynthesizer, TurnRecognizer,
};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = AssistConfig::from_env();

    let classifier: Arc<dyn Classifier> = if std::env::var("MAYDAY_CLASSIFIER_URL").is_ok() {
        info!("classifier: {}", config.classifier_url);
        Arc::new(HttpClassifier::new(
            config.classifier_url.clone(),
            config.api_key.clone(),
        )?)
    } else {
        info!("classifier: scripted (set MAYDAY_CLASSIFIER_URL for the real one)");
        Arc::new(ScriptedClassifier::new())
    };

    let dispatch: Arc<dyn DispatchBackend> = if std::env::var("MAYDAY_DISPATCH_URL").is_ok() {
        Arc::new(HttpDispatch::new(
            config.dispatch_url.clone(),
            config.api_key.clone(),
        )?)
    } else {
        info!("dispatch: recording only (set MAYDAY_DISPATCH_URL for the real one)");
        Arc::new(RecordingDispatch::new())
    };

    let geocode_url = config.geocode_url.clone();
    let api_key = config.api_key.clone();
    let (mut session, mut events) = ConversationSession::new(config, classifier, dispatch);

    // Microphone + recognition are optional; typed input always works.
    match AudioLevelMonitor::open(AudioConfig::default()) {
        Ok(monitor) => match TurnRecognizer::from_env(monitor.mic_tap()) {
            Ok(engine) => {
                session = session
                    .with_level_monitor(monitor)
                    .with_recognition(SpeechRecognitionController::new(Box::new(engine)));
                info!("microphone ready - use /talk for a voice turn");
            }
            Err(e) => warn!("voice input disabled: {}", e),
        },
        Err(e) => {
            warn!("no microphone: {}", e);
            if let Ok(devices) = AudioCapture::list_input_devices() {
                info!("input devices seen: {:?}", devices);
            }
        }
    }

    if let Ok(playback) = SpeechPlayback::new() {
        let tts: Arc<dyn SpeechSynthesizer> = match HttpTts::from_env() {
            Ok(t) => Arc::new(t),
            Err(_) => Arc::new(PlaceholderTts),
        };
        session = session.with_voice(playback, tts);
    }

    // No real positioning source on a desktop demo; a fixed position stands
    // in, and the resolver still reverse-geocodes (or falls back to the
    // coordinate text) exactly as in production.
    let geocoder: Arc<dyn Geocoder> = if std::env::var("MAYDAY_GEOCODE_URL").is_ok() {
        Arc::new(HttpGeocoder::new(geocode_url, api_key)?)
    } else {
        Arc::new(StaticGeocoder::failing())
    };
    let resolver = LocationResolver::new(
        Arc::new(FixedPosition {
            lat: 52.520008,
            lng: 13.404954,
        }),
        geocoder,
    );
    match resolver.locate_device().await {
        Ok(location) => {
            info!("location: {}", location.display_string());
            session.set_location(location);
        }
        Err(e) => warn!("no device location ({}), type an address instead", e),
    }

    println!("Type your message ( /talk, /yes, /no, /addr <address>, /quit ):");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        match line.trim() {
            "/quit" => break,
            "/yes" => {
                if let Some(id) = session.confirm_category().await? {
                    println!("case created: {}", id);
                }
            }
            "/no" => session.decline_category().await?,
            typed if typed.starts_with("/addr ") => {
                let text = typed.trim_start_matches("/addr ").trim();
                if let Some(location) = resolver.resolve_typed_address(text).await? {
                    info!("location set: {}", location.display_string());
                    session.set_location(location);
                }
            }
            "/talk" => {
                if session.start_listening().is_ok() {
                    println!("listening... (speak, then pause)");
                    session.run_listening_turn().await?;
                }
            }
            text => session.handle_user_text(text).await?,
        }

        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::Message(m) => println!("[{}] {}", m.role.as_str(), m.content),
                SessionEvent::CategoryDetected(c) => {
                    println!("detected: {} ({:.0}%) - /yes to confirm, /no to decline",
                        c.name, c.confidence * 100.0)
                }
                SessionEvent::CaseCreated { id } => println!("dispatched as case {}", id),
                SessionEvent::Notice(n) => println!("! {}", n),
                SessionEvent::Closed => return Ok(()),
                _ => {}
            }
        }
        if session.is_closed() {
            break;
        }
    }

    session.close();
    Ok(())
}
