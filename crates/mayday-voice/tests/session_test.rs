//! End-to-end session scenarios with scripted backends.
//!
//! No audio hardware or network: the recognizer, classifier, and dispatch are
//! all scripted doubles, so these run anywhere.

use mayday_core::{
    AssistConfig, Classifier, DetectedCategory, DispatchBackend, Location, Phase,
    RecordingDispatch, ScriptedClassifier,
};
use mayday_voice::{
    ConversationSession, RecognitionErrorKind, RecognitionEvent, ScriptedRecognizer,
    SessionEvent, SpeechRecognitionController, VoiceError,
};
use std::sync::Arc;
use tokio::sync::mpsc;

fn fire_category() -> DetectedCategory {
    DetectedCategory {
        id: "fire-1".to_string(),
        name: "Fire".to_string(),
        confidence: 0.92,
    }
}

fn test_session() -> (
    ConversationSession,
    mpsc::UnboundedReceiver<SessionEvent>,
    Arc<ScriptedClassifier>,
    Arc<RecordingDispatch>,
) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let classifier = Arc::new(ScriptedClassifier::new());
    let dispatch = Arc::new(RecordingDispatch::new());
    let config = AssistConfig {
        close_delay_ms: 0,
        ..Default::default()
    };
    let (session, rx) = ConversationSession::new(
        config,
        Arc::clone(&classifier) as Arc<dyn Classifier>,
        Arc::clone(&dispatch) as Arc<dyn DispatchBackend>,
    );
    (session, rx, classifier, dispatch)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

#[tokio::test]
async fn fire_report_reaches_dispatch_and_closes() {
    let (mut session, mut rx, classifier, dispatch) = test_session();
    session.set_location(Location::new(52.52, 13.405).with_address("Alexanderplatz 1"));

    classifier.push_detection("That sounds like a fire. Are you safe?", fire_category());
    dispatch.push_success("case-123");

    session.handle_user_text("fire in my kitchen").await.unwrap();
    assert_eq!(session.phase(), Phase::Confirmation);
    assert_eq!(session.detected_category().unwrap().name, "Fire");

    let id = session.confirm_category().await.unwrap();
    assert_eq!(id.as_deref(), Some("case-123"));
    assert!(session.is_closed());

    // Exactly one submission, carrying category and the two-message transcript.
    let submissions = dispatch.submissions();
    assert_eq!(submissions.len(), 1);
    let case = &submissions[0];
    assert_eq!(case.category_name, "Fire");
    assert!(case.description.contains("fire in my kitchen"));
    assert!(case.description.contains("Are you safe?"));
    assert_eq!(case.address, "Alexanderplatz 1");

    // Exactly one reported id and one close.
    let events = drain(&mut rx);
    let created: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::CaseCreated { id } => Some(id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(created, vec!["case-123".to_string()]);
    let closes = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Closed))
        .count();
    assert_eq!(closes, 1);
}

#[tokio::test]
async fn low_confidence_stays_in_chat() {
    let (mut session, mut rx, classifier, _) = test_session();
    classifier.push_detection(
        "Can you describe it a bit more?",
        DetectedCategory {
            id: "fire-1".to_string(),
            name: "Fire".to_string(),
            confidence: 0.5,
        },
    );

    session.handle_user_text("I smell something odd").await.unwrap();
    assert_eq!(session.phase(), Phase::Chat);
    assert!(session.detected_category().is_none());

    // No confirmation surfaced to the UI.
    let events = drain(&mut rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::CategoryDetected(_))));
}

#[tokio::test]
async fn failed_broadcast_preserves_transcript_and_returns_to_chat() {
    let (mut session, mut rx, classifier, dispatch) = test_session();
    session.set_location(Location::new(52.52, 13.405).with_address("Alexanderplatz 1"));

    classifier.push_detection("Confirming a fire report.", fire_category());
    dispatch.push_failure("dispatch backend unreachable");

    session.handle_user_text("my stove is burning").await.unwrap();
    assert_eq!(session.phase(), Phase::Confirmation);
    let messages_before = session.messages().len();

    let id = session.confirm_category().await.unwrap();
    assert!(id.is_none());
    assert_eq!(session.phase(), Phase::Chat);
    assert!(!session.is_closed());

    // One submission attempted, zero cases created, one apology appended.
    assert_eq!(dispatch.submissions().len(), 1);
    assert_eq!(session.messages().len(), messages_before + 1);
    assert!(session.messages()[..messages_before]
        .iter()
        .any(|m| m.content == "my stove is burning"));

    let events = drain(&mut rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::CaseCreated { .. })));
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::Closed)));

    // Re-confirming after another detection works on the same transcript.
    classifier.push_detection("Still a fire.", fire_category());
    dispatch.push_success("case-200");
    session.handle_user_text("please hurry").await.unwrap();
    assert_eq!(session.phase(), Phase::Confirmation);
    let id = session.confirm_category().await.unwrap();
    assert_eq!(id.as_deref(), Some("case-200"));
}

#[tokio::test]
async fn denied_microphone_leaves_typed_input_usable() {
    let (session, mut rx, classifier, _) = test_session();
    let engine = ScriptedRecognizer::unavailable("speech engine missing");
    let mut session = session.with_recognition(SpeechRecognitionController::new(Box::new(engine)));

    let err = session.start_listening().unwrap_err();
    assert!(matches!(err, VoiceError::CapabilityUnavailable(_)));
    assert!(!session.is_listening());

    // Exactly one user-facing notification.
    let notices = drain(&mut rx)
        .iter()
        .filter(|e| matches!(e, SessionEvent::Notice(_)))
        .count();
    assert_eq!(notices, 1);

    // Typed input still works.
    classifier.push_reply("I can still read you.");
    session.handle_user_text("typing instead").await.unwrap();
    assert_eq!(session.messages().len(), 2);
    assert_eq!(session.phase(), Phase::Chat);
}

#[tokio::test]
async fn spoken_turn_flows_into_the_conversation() {
    let (session, mut rx, classifier, _) = test_session();
    let mut engine = ScriptedRecognizer::new();
    engine.push_turn(vec![
        RecognitionEvent::Interim("fire in".to_string()),
        RecognitionEvent::Final("fire in my kitchen".to_string()),
    ]);
    let mut session = session.with_recognition(SpeechRecognitionController::new(Box::new(engine)));

    classifier.push_reply("Where exactly are you?");

    session.start_listening().unwrap();
    assert!(session.is_listening());
    session.run_listening_turn().await.unwrap();

    assert!(!session.is_listening());
    assert_eq!(session.messages().len(), 2);
    assert_eq!(session.messages()[0].content, "fire in my kitchen");

    // Interim updated the live transcript, the final cleared it.
    let events = drain(&mut rx);
    let transcripts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::TranscriptChanged(t) => Some(t.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(transcripts, vec!["fire in".to_string(), String::new()]);
    assert_eq!(session.live_transcript(), "");
}

#[tokio::test]
async fn no_speech_turn_is_silent() {
    let (session, mut rx, _, _) = test_session();
    let mut engine = ScriptedRecognizer::new();
    engine.push_turn(vec![RecognitionEvent::Error(RecognitionErrorKind::NoSpeech)]);
    let mut session = session.with_recognition(SpeechRecognitionController::new(Box::new(engine)));

    session.start_listening().unwrap();
    session.run_listening_turn().await.unwrap();

    assert!(session.messages().is_empty());
    // A clean empty turn: no notice, no message, nothing user-visible.
    let events = drain(&mut rx);
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::Notice(_))));
}

#[tokio::test]
async fn engine_fault_surfaces_one_notice() {
    let (session, mut rx, _, _) = test_session();
    let mut engine = ScriptedRecognizer::new();
    engine.push_turn(vec![RecognitionEvent::Error(RecognitionErrorKind::Engine(
        "decoder crashed".to_string(),
    ))]);
    let mut session = session.with_recognition(SpeechRecognitionController::new(Box::new(engine)));

    session.start_listening().unwrap();
    session.run_listening_turn().await.unwrap();

    let notices = drain(&mut rx)
        .iter()
        .filter(|e| matches!(e, SessionEvent::Notice(_)))
        .count();
    assert_eq!(notices, 1);
}
