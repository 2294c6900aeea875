//! Integration tests for `SpeechCaptureEndpointer`.
//!
//! The capture loop is driven with a mock recognizer and a mock microphone
//! producing steady noise on tokio's paused clock, so silence timers, retry
//! backoff and restart delays are checked to the millisecond.

mod common;

use std::time::Duration;

use common::{MockCapturer, MockRecognizer, drain};
use echo_voice::config::EndpointerConfig;
use echo_voice::{
    EndpointerEvent, EndpointerHandle, RecognitionErrorKind, RecognitionEvent,
    SpeechCaptureEndpointer, VoiceError,
};
use tokio::sync::mpsc;
use tokio::time::sleep;

const LOUD: f32 = 0.1;
const QUIET: f32 = 0.0;

async fn start(
    recognizer: &MockRecognizer,
    capturer: &MockCapturer,
) -> (EndpointerHandle, mpsc::UnboundedReceiver<EndpointerEvent>) {
    SpeechCaptureEndpointer::start_session(
        EndpointerConfig::default(),
        Box::new(recognizer.clone()),
        Box::new(capturer.clone()),
    )
    .await
    .unwrap()
}

fn utterances(events: &[EndpointerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            EndpointerEvent::Utterance(u) => Some(u.text.clone()),
            _ => None,
        })
        .collect()
}

fn interim_count(events: &[EndpointerEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, EndpointerEvent::InterimActivity))
        .count()
}

/// Make the open recognition stream report `kind`.
fn fail_active(recognizer: &MockRecognizer, kind: RecognitionErrorKind) {
    let tx = recognizer.state.lock().unwrap().active.clone().unwrap();
    tx.send(RecognitionEvent::Error(kind)).unwrap();
}

const fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

// ── Endpointing ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn silence_after_transcript_finalizes_one_utterance() {
    let recognizer = MockRecognizer::default();
    let capturer = MockCapturer::default();
    let (handle, mut rx) = start(&recognizer, &capturer).await;

    sleep(ms(10)).await;
    capturer.set_level(LOUD);
    sleep(ms(300)).await;
    recognizer.say("turn the lights", false);
    recognizer.say("turn the lights on", true);
    sleep(ms(100)).await;

    capturer.set_level(QUIET);
    sleep(ms(1300)).await;

    let events = drain(&mut rx);
    assert_eq!(utterances(&events), vec!["turn the lights on".to_string()]);
    assert!(interim_count(&events) >= 1);

    // Buffer was cleared: more silence emits nothing.
    sleep(ms(3000)).await;
    let later = drain(&mut rx);
    assert!(utterances(&later).is_empty());

    // Recognition restarted after the utterance, never overlapping.
    let state = recognizer.state.lock().unwrap();
    assert_eq!(state.starts.len(), 2);
    assert_eq!(state.overlapping_starts, 0);
    drop(state);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn speech_resets_the_silence_timer() {
    let recognizer = MockRecognizer::default();
    let capturer = MockCapturer::default();
    let (handle, mut events) = start(&recognizer, &capturer).await;

    sleep(ms(10)).await;
    recognizer.say("what is", true);
    // Quiet for less than the silence duration, then loud again.
    sleep(ms(700)).await;
    capturer.set_level(LOUD);
    sleep(ms(500)).await;
    recognizer.say("the weather", true);
    capturer.set_level(QUIET);
    sleep(ms(600)).await;
    assert!(utterances(&drain(&mut events)).is_empty());

    sleep(ms(600)).await;
    assert_eq!(utterances(&drain(&mut events)), vec!["what is the weather".to_string()]);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn single_character_transcript_is_not_emitted() {
    let recognizer = MockRecognizer::default();
    let capturer = MockCapturer::default();
    let (handle, mut events) = start(&recognizer, &capturer).await;

    sleep(ms(10)).await;
    recognizer.say("a", true);
    sleep(ms(3000)).await;

    assert!(utterances(&drain(&mut events)).is_empty());
    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn audio_levels_are_reported_each_poll() {
    let recognizer = MockRecognizer::default();
    let capturer = MockCapturer::default();
    capturer.set_level(0.003);
    let (handle, mut events) = start(&recognizer, &capturer).await;

    sleep(ms(1050)).await;
    let levels: Vec<f32> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            EndpointerEvent::AudioLevel(level) => Some(level),
            _ => None,
        })
        .collect();

    assert!(levels.len() >= 10);
    // A steady signal reads the same every poll.
    assert!(levels.iter().all(|l| (l - levels[0]).abs() < 1e-6));
    assert!(levels[0] > 0.3 && levels[0] < 0.4, "level {}", levels[0]);
    handle.stop().await;
}

// ── Retry and restart ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn recognition_failures_back_off_then_hard_restart() {
    let recognizer = MockRecognizer::failing(RecognitionErrorKind::NoSpeech);
    let capturer = MockCapturer::default();
    let (handle, _events) = start(&recognizer, &capturer).await;

    sleep(ms(9000)).await;

    let gaps = recognizer.start_gaps();
    assert!(gaps.len() >= 6, "gaps: {gaps:?}");
    assert_eq!(&gaps[..5], &[ms(700), ms(1200), ms(1700), ms(2200), ms(2700)]);
    // The sixth failure releases the mic and restarts 200 ms later.
    assert_eq!(gaps[5], ms(200));
    assert!(capturer.releases() >= 1);
    assert!(capturer.is_acquired());

    let state = recognizer.state.lock().unwrap();
    assert_eq!(state.overlapping_starts, 0);
    drop(state);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn a_result_resets_the_retry_counter() {
    let recognizer = MockRecognizer::default();
    let capturer = MockCapturer::default();
    let (handle, _events) = start(&recognizer, &capturer).await;
    sleep(ms(10)).await;

    // Two failures in a row (t=10 and t=710), then a healthy stream at 1910.
    recognizer.state.lock().unwrap().fail_with = Some(RecognitionErrorKind::AudioCapture);
    fail_active(&recognizer, RecognitionErrorKind::AudioCapture);
    sleep(ms(1000)).await;
    recognizer.state.lock().unwrap().fail_with = None;
    sleep(ms(1000)).await;

    recognizer.say("hello", false);
    sleep(ms(10)).await;

    // The next failure backs off from the first step again: 700 ms, not 1700.
    fail_active(&recognizer, RecognitionErrorKind::NoSpeech);
    sleep(ms(800)).await;

    assert_eq!(recognizer.start_gaps(), vec![ms(710), ms(1200), ms(810)]);
    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn permission_denied_is_fatal_and_releases_the_mic() {
    let recognizer = MockRecognizer::failing(RecognitionErrorKind::PermissionDenied);
    let capturer = MockCapturer::default();
    let (handle, mut events) = start(&recognizer, &capturer).await;

    sleep(ms(50)).await;

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        EndpointerEvent::Fatal(VoiceError::RecognitionFailed(RecognitionErrorKind::PermissionDenied))
    )));
    assert!(!capturer.is_acquired());
    assert!(!recognizer.is_active());
    assert_eq!(recognizer.start_count(), 1);
    assert!(!handle.is_running());
}

#[tokio::test]
async fn denied_microphone_fails_start() {
    let recognizer = MockRecognizer::default();
    let result = SpeechCaptureEndpointer::start_session(
        EndpointerConfig::default(),
        Box::new(recognizer.clone()),
        Box::new(MockCapturer::denied()),
    )
    .await;
    assert!(matches!(result, Err(VoiceError::MicrophonePermissionDenied)));
    assert_eq!(recognizer.start_count(), 0);
}

// ── Peer speaking ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn peer_speaking_suspends_recognition_and_detects_barge_in() {
    let recognizer = MockRecognizer::default();
    let capturer = MockCapturer::default();
    let (handle, mut events) = start(&recognizer, &capturer).await;
    sleep(ms(10)).await;
    recognizer.say("half a sente", false);
    sleep(ms(10)).await;
    drain(&mut events);

    handle.set_peer_speaking(true);
    sleep(ms(10)).await;
    assert!(!recognizer.is_active(), "recognition must be torn down");
    assert!(capturer.is_acquired(), "meter keeps the mic");

    // Speech-level, but below the barge-in threshold: nothing.
    capturer.set_level(0.001);
    sleep(ms(500)).await;
    assert_eq!(interim_count(&drain(&mut events)), 0);

    // Loud enough for long enough: exactly one barge-in signal.
    capturer.set_level(0.2);
    sleep(ms(1000)).await;
    let during = drain(&mut events);
    assert_eq!(interim_count(&during), 1);
    assert!(utterances(&during).is_empty(), "stale transcript was dropped");
    assert_eq!(recognizer.start_count(), 1);

    // Resume 200 ms after the peer stops.
    capturer.set_level(QUIET);
    handle.set_peer_speaking(false);
    sleep(ms(150)).await;
    assert!(!recognizer.is_active());
    sleep(ms(100)).await;
    assert!(recognizer.is_active());
    assert_eq!(recognizer.start_count(), 2);

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn barge_in_is_heard_while_a_hard_restart_is_pending() {
    let recognizer = MockRecognizer::failing(RecognitionErrorKind::NoSpeech);
    let capturer = MockCapturer::default();
    let (handle, mut events) = start(&recognizer, &capturer).await;

    // The sixth failure (t=8500) releases the mic until the restart at 8700.
    sleep(ms(8550)).await;
    assert!(!capturer.is_acquired());
    drain(&mut events);

    // The peer starts talking and cancels that restart; the meter still
    // needs the microphone.
    handle.set_peer_speaking(true);
    capturer.set_level(0.2);
    sleep(ms(500)).await;

    assert!(capturer.is_acquired());
    assert!(!recognizer.is_active());
    assert_eq!(interim_count(&drain(&mut events)), 1);

    handle.stop().await;
    assert!(!capturer.is_acquired());
}

#[tokio::test(start_paused = true)]
async fn stop_releases_every_device() {
    let recognizer = MockRecognizer::default();
    let capturer = MockCapturer::default();
    let (handle, _events) = start(&recognizer, &capturer).await;
    sleep(ms(10)).await;
    assert!(recognizer.is_active());

    handle.stop().await;

    assert!(!recognizer.is_active());
    assert!(!capturer.is_acquired());
    assert_eq!(capturer.releases(), 1);
    assert!(!handle.is_running());

    // Stopping twice is harmless.
    handle.stop().await;
}
