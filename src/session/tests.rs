use super::*;
use crate::bridge::MockAudioBridge;
use crate::generation::{Generator, Increments, TurnState};
use crate::synthesis::MockSynthesizer;
use crate::transcription::MockTranscriber;
use crate::types::ChatMessage;
use futures::{stream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Feed(Vec<u8>),
    KeepAlive,
    TranscriberClosed,
    Speak(String),
    Flush,
    Clear,
    SynthesizerClosed,
    Media(String, usize),
    PeerClear(String),
}

/// Stands in for every adapter and records what the session asked of them, in order.
#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
    /// Where clears are acknowledged, like a live synthesizer would.
    acks: Option<mpsc::Sender<SpeechEvent>>,
}

impl Recorder {
    fn acknowledging(acks: mpsc::Sender<SpeechEvent>) -> Self {
        Self {
            acks: Some(acks),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl AudioBridge for Recorder {
    fn send_media(&self, stream_sid: &str, audio: &[u8]) {
        self.record(Call::Media(stream_sid.to_string(), audio.len()));
    }

    fn send_clear(&self, stream_sid: &str) {
        self.record(Call::PeerClear(stream_sid.to_string()));
    }
}

impl Transcriber for Recorder {
    fn feed(&self, audio: Vec<u8>) {
        self.record(Call::Feed(audio));
    }

    fn keep_alive(&self) {
        self.record(Call::KeepAlive);
    }

    fn close(&self) {
        self.record(Call::TranscriberClosed);
    }
}

impl Synthesizer for Recorder {
    fn speak(&self, text: &str) {
        self.record(Call::Speak(text.to_string()));
    }

    fn flush(&self) {
        self.record(Call::Flush);
    }

    fn clear(&self) {
        self.record(Call::Clear);
        if let Some(acks) = &self.acks {
            let _ = acks.try_send(SpeechEvent::Cleared);
        }
    }

    fn close(&self) {
        self.record(Call::SynthesizerClosed);
    }
}

/// Answers every utterance with `words`, optionally leaving the response open.
struct Scripted {
    words: Vec<&'static str>,
    open_ended: bool,
    utterances: Mutex<Vec<String>>,
}

impl Scripted {
    fn finite(words: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            words: words.to_vec(),
            open_ended: false,
            utterances: Mutex::new(Vec::new()),
        })
    }

    fn open_ended(words: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            words: words.to_vec(),
            open_ended: true,
            utterances: Mutex::new(Vec::new()),
        })
    }

    fn utterances(&self) -> Vec<String> {
        self.utterances.lock().unwrap().clone()
    }
}

impl Generator for Scripted {
    fn stream(&self, messages: Vec<ChatMessage>) -> Increments {
        if let Some(last) = messages.last() {
            self.utterances.lock().unwrap().push(last.content.clone());
        }
        let words = stream::iter(self.words.clone()).map(|w| Ok::<_, anyhow::Error>(w.to_string()));
        if self.open_ended {
            words.chain(stream::pending()).boxed()
        } else {
            words.boxed()
        }
    }
}

fn session_with(generator: Arc<dyn Generator>) -> (Session, Recorder) {
    let recorder = Recorder::default();
    (session_recording(generator, &recorder), recorder)
}

fn session_recording(generator: Arc<dyn Generator>, recorder: &Recorder) -> Session {
    let turns = GenerationOrchestrator::new(generator, "be funny", false);
    Session::new(
        turns,
        Box::new(recorder.clone()),
        Box::new(recorder.clone()),
        Box::new(recorder.clone()),
    )
}

fn forwarded_media(recorder: &Recorder) -> usize {
    recorder
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::Media(..)))
        .count()
}

fn media_event(json: &str) -> MediaEvent {
    serde_json::from_str(json).unwrap()
}

fn start_event() -> MediaEvent {
    media_event(r#"{"event":"start","sequenceNumber":"1","start":{"streamSid":"MZ1","callSid":"CA1","tracks":["inbound"]}}"#)
}

fn inbound(payload: &[u8]) -> MediaEvent {
    media_event(&format!(
        r#"{{"event":"media","streamSid":"MZ1","media":{{"track":"inbound","chunk":"1","timestamp":"20","payload":"{}"}}}}"#,
        audio::encode(payload)
    ))
}

/// Pulls increments of the active turn until it completes.
async fn drain_turn(session: &mut Session) {
    while session.turns.is_generating() {
        let progress = session.turns.next().await;
        session.handle_progress(progress);
    }
}

#[tokio::test]
async fn final_fragments_start_a_turn() {
    let generator = Scripted::open_ended(&[]);
    let (mut session, _recorder) = session_with(generator.clone());

    session.handle_fragment(TranscriptFragment::finalized("I", false));
    session.handle_fragment(TranscriptFragment::finalized("need", false));
    assert!(!session.is_speaking());
    session.handle_fragment(TranscriptFragment::finalized("help today", true));

    assert!(session.is_speaking());
    assert!(session.turns.is_generating());
    assert!(session.utterances.is_empty());
    assert_eq!(generator.utterances(), vec!["I need help today"]);
    assert_eq!(session.stats().turns_started, 1);
}

#[tokio::test]
async fn interim_fragment_while_speaking_barges_in() {
    let (mut session, recorder) = session_with(Scripted::open_ended(&["Well,", " you see"]));
    session.handle_media(start_event());
    session.handle_fragment(TranscriptFragment::finalized("tell me a joke", true));
    for _ in 0..2 {
        let progress = session.turns.next().await;
        session.handle_progress(progress);
    }

    session.handle_fragment(TranscriptFragment::interim("wait"));

    assert_eq!(recorder.count(&Call::PeerClear("MZ1".to_string())), 1);
    assert_eq!(recorder.count(&Call::Clear), 1);
    assert!(!session.is_speaking());
    assert_eq!(session.turns.state(), TurnState::Cancelled);
    assert!(!session.turns.is_generating());
    assert_eq!(session.stats().turns_cancelled, 1);

    let calls = recorder.calls();
    let clear_at = calls.iter().position(|c| *c == Call::Clear).unwrap();
    assert!(calls[clear_at..].iter().all(|c| !matches!(c, Call::Speak(_))));
    assert_eq!(recorder.count(&Call::Flush), 0);
}

#[tokio::test]
async fn barge_in_is_idempotent() {
    let (mut session, recorder) = session_with(Scripted::open_ended(&[]));
    session.handle_media(start_event());

    session.handle_fragment(TranscriptFragment::interim("hello"));
    assert!(recorder.calls().is_empty());

    session.handle_fragment(TranscriptFragment::finalized("hello", true));
    session.handle_fragment(TranscriptFragment::interim("wait"));
    session.handle_fragment(TranscriptFragment::interim("wait a"));
    session.handle_fragment(TranscriptFragment::interim("wait a second"));

    assert_eq!(recorder.count(&Call::PeerClear("MZ1".to_string())), 1);
    assert_eq!(recorder.count(&Call::Clear), 1);
    assert_eq!(session.stats().turns_cancelled, 1);
}

#[tokio::test]
async fn audio_after_barge_in_is_discarded() {
    let (mut session, recorder) = session_with(Scripted::open_ended(&[]));
    session.handle_media(start_event());
    session.handle_fragment(TranscriptFragment::finalized("hi", true));

    session.handle_speech(SpeechEvent::Audio(vec![0xff; 160]));
    session.handle_fragment(TranscriptFragment::interim("no"));
    session.handle_speech(SpeechEvent::Audio(vec![0xff; 160]));

    let media: Vec<_> = recorder
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Media(..)))
        .collect();
    assert_eq!(media, vec![Call::Media("MZ1".to_string(), 160)]);
    assert_eq!(session.stats().frames_out, 1);
    assert_eq!(session.stats().frames_discarded, 1);
    assert_eq!(session.stats().audio_out_ms, 20);
}

#[tokio::test]
async fn utterance_end_closes_pending_finals() {
    let generator = Scripted::open_ended(&[]);
    let (mut session, _recorder) = session_with(generator.clone());

    session.handle_fragment(TranscriptFragment::finalized("call me back", false));
    assert!(!session.turns.is_generating());
    session.handle_transcript(TranscriptEvent::UtteranceEnd);

    assert!(session.is_speaking());
    assert_eq!(generator.utterances(), vec!["call me back"]);

    session.handle_transcript(TranscriptEvent::UtteranceEnd);
    assert_eq!(generator.utterances().len(), 1);
}

#[tokio::test]
async fn completed_turn_flushes_exactly_once() {
    let mut synthesizer = MockSynthesizer::new();
    synthesizer.expect_speak().times(3).return_const(());
    synthesizer.expect_flush().times(1).return_const(());
    synthesizer.expect_clear().never();
    synthesizer.expect_close().times(1).return_const(());
    let mut transcriber = MockTranscriber::new();
    transcriber.expect_close().times(1).return_const(());
    let mut bridge = MockAudioBridge::new();
    bridge.expect_send_clear().never();

    let turns = GenerationOrchestrator::new(Scripted::finite(&["Why", " not", "?"]), "be funny", false);
    let mut session = Session::new(turns, Box::new(bridge), Box::new(transcriber), Box::new(synthesizer));
    session.handle_fragment(TranscriptFragment::finalized("why", true));
    drain_turn(&mut session).await;

    assert_eq!(session.turns.state(), TurnState::Completed);
    let stats = session.teardown();
    assert_eq!(stats.turns_completed, 1);
    assert_eq!(stats.turns_cancelled, 0);
}

#[tokio::test]
async fn utterances_wait_for_the_active_turn() {
    let generator = Scripted::finite(&["Sure."]);
    let (mut session, recorder) = session_with(generator.clone());

    session.handle_fragment(TranscriptFragment::finalized("first", true));
    session.handle_fragment(TranscriptFragment::finalized("second", true));
    assert_eq!(generator.utterances(), vec!["first"]);
    assert_eq!(session.pending.len(), 1);

    drain_turn(&mut session).await;

    assert_eq!(generator.utterances(), vec!["first", "second"]);
    assert_eq!(recorder.count(&Call::Flush), 2);
    assert_eq!(session.stats().turns_completed, 2);
    assert!(session.pending.is_empty());
}

#[tokio::test]
async fn generation_failure_cancels_the_turn() {
    struct Failing;
    impl Generator for Failing {
        fn stream(&self, _messages: Vec<ChatMessage>) -> Increments {
            stream::iter(vec![Ok("Hm".to_string()), Err(anyhow::anyhow!("503"))]).boxed()
        }
    }

    let (mut session, recorder) = session_with(Arc::new(Failing));
    session.handle_media(start_event());
    session.handle_fragment(TranscriptFragment::finalized("hello", true));
    drain_turn(&mut session).await;

    assert!(!session.is_speaking());
    assert_eq!(session.turns.state(), TurnState::Cancelled);
    assert_eq!(recorder.count(&Call::Clear), 1);
    assert_eq!(recorder.count(&Call::Flush), 0);
    assert_eq!(session.stats().turns_cancelled, 1);

    session.handle_fragment(TranscriptFragment::finalized("hello again", true));
    assert!(!session.turns.is_generating());
    session.handle_speech(SpeechEvent::Cleared);
    assert!(session.turns.is_generating());
}

#[tokio::test]
async fn stale_audio_is_not_played_for_the_queued_turn() {
    let generator = Scripted::open_ended(&["Well,"]);
    let (mut session, recorder) = session_with(generator.clone());
    session.handle_media(start_event());
    session.handle_fragment(TranscriptFragment::finalized("first", true));
    let progress = session.turns.next().await;
    session.handle_progress(progress);
    session.handle_fragment(TranscriptFragment::finalized("second", true));
    assert_eq!(session.pending.len(), 1);

    session.handle_fragment(TranscriptFragment::interim("wait"));
    session.handle_speech(SpeechEvent::Audio(vec![0xff; 160]));

    assert_eq!(
        recorder.calls(),
        vec![
            Call::Speak("Well,".to_string()),
            Call::PeerClear("MZ1".to_string()),
            Call::Clear,
        ]
    );
    assert!(!session.is_speaking());
    assert!(session.is_awaiting_clear());
    assert_eq!(generator.utterances(), vec!["first"]);
    assert_eq!(session.stats().frames_discarded, 1);

    session.handle_speech(SpeechEvent::Cleared);
    assert!(session.is_speaking());
    assert!(session.pending.is_empty());
    assert_eq!(generator.utterances(), vec!["first", "second"]);

    session.handle_speech(SpeechEvent::Audio(vec![0xff; 160]));
    assert_eq!(forwarded_media(&recorder), 1);
}

#[tokio::test]
async fn audio_before_clear_acknowledgement_is_discarded() {
    let generator = Scripted::open_ended(&[]);
    let (mut session, recorder) = session_with(generator.clone());
    session.handle_media(start_event());

    session.handle_fragment(TranscriptFragment::finalized("first", true));
    session.handle_fragment(TranscriptFragment::interim("wait"));
    session.handle_fragment(TranscriptFragment::finalized("never mind", true));
    session.handle_speech(SpeechEvent::Audio(vec![0xff; 160]));

    assert_eq!(forwarded_media(&recorder), 0);
    assert!(!session.turns.is_generating());
    assert_eq!(generator.utterances(), vec!["first"]);

    session.handle_speech(SpeechEvent::Cleared);
    assert_eq!(generator.utterances(), vec!["first", "never mind"]);
    session.handle_speech(SpeechEvent::Audio(vec![0xff; 160]));
    assert_eq!(forwarded_media(&recorder), 1);
    assert_eq!(session.stats().frames_discarded, 1);
}

#[tokio::test]
async fn closed_synthesizer_releases_a_pending_clear() {
    let generator = Scripted::open_ended(&[]);
    let (mut session, recorder) = session_with(generator.clone());
    session.handle_media(start_event());
    session.handle_fragment(TranscriptFragment::finalized("first", true));
    session.handle_fragment(TranscriptFragment::interim("wait"));
    session.handle_fragment(TranscriptFragment::finalized("second", true));

    session.handle_speech(SpeechEvent::Closed);
    assert!(!session.is_awaiting_clear());
    assert_eq!(generator.utterances(), vec!["first", "second"]);

    session.handle_fragment(TranscriptFragment::interim("stop"));
    assert_eq!(recorder.count(&Call::Clear), 2);
    assert!(!session.is_awaiting_clear());
    session.handle_fragment(TranscriptFragment::finalized("third", true));
    assert_eq!(generator.utterances(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn inbound_audio_is_fed_and_outbound_ignored() {
    let (mut session, recorder) = session_with(Scripted::open_ended(&[]));

    session.handle_media(inbound(&[1, 2, 3]));
    session.handle_media(media_event(
        r#"{"event":"media","streamSid":"MZ1","media":{"track":"outbound","payload":"AAAA"}}"#,
    ));
    session.handle_media(media_event(
        r#"{"event":"media","streamSid":"MZ1","media":{"track":"inbound","payload":"%%%"}}"#,
    ));

    assert_eq!(session.stream_sid(), Some("MZ1"));
    assert_eq!(recorder.calls(), vec![Call::Feed(vec![1, 2, 3])]);
    assert_eq!(session.stats().frames_in, 1);
    assert!(session.has_seen_audio);
}

#[tokio::test]
async fn connected_and_start_events_only_adopt_the_sid() {
    let (mut session, recorder) = session_with(Scripted::open_ended(&[]));

    session.handle_media(media_event(r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#));
    session.handle_media(media_event(
        r#"{"event":"start","sequenceNumber":"1","start":{"streamSid":"MZ7","callSid":"CA7","tracks":["inbound"],"mediaFormat":{"encoding":"audio/x-mulaw","sampleRate":8000,"channels":1},"customParameters":{"campaign":"spring"}}}"#,
    ));

    assert_eq!(session.stream_sid(), Some("MZ7"));
    assert!(recorder.calls().is_empty());
    assert!(!session.closed);
}

#[tokio::test]
async fn clear_without_stream_sid_still_clears_synthesizer() {
    let (mut session, recorder) = session_with(Scripted::open_ended(&[]));
    session.handle_fragment(TranscriptFragment::finalized("hi", true));
    session.handle_fragment(TranscriptFragment::interim("stop"));

    assert_eq!(recorder.calls(), vec![Call::Clear]);
    assert!(!session.is_speaking());
}

struct Channels {
    media: mpsc::Sender<MediaEvent>,
    transcripts: mpsc::Sender<TranscriptEvent>,
    speech: mpsc::Sender<SpeechEvent>,
}

fn channels() -> (Channels, SessionInputs) {
    let (media_tx, media) = mpsc::channel(64);
    let (transcripts_tx, transcripts) = mpsc::channel(64);
    let (speech_tx, speech) = mpsc::channel(64);
    (
        Channels {
            media: media_tx,
            transcripts: transcripts_tx,
            speech: speech_tx,
        },
        SessionInputs {
            media,
            transcripts,
            speech,
        },
    )
}

#[tokio::test(start_paused = true)]
async fn keep_alive_runs_until_close() {
    let (session, recorder) = session_with(Scripted::open_ended(&[]));
    let (tx, inputs) = channels();
    let handle = tokio::spawn(session.run(inputs));

    tokio::time::sleep(Duration::from_secs(25)).await;
    tx.media.send(MediaEvent::Close).await.unwrap();
    handle.await.unwrap();

    assert_eq!(recorder.count(&Call::KeepAlive), 2);
    assert_eq!(recorder.count(&Call::TranscriberClosed), 1);
    assert_eq!(recorder.count(&Call::SynthesizerClosed), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(recorder.count(&Call::KeepAlive), 2);
}

#[tokio::test(start_paused = true)]
async fn keep_alive_stops_when_recognizer_closes() {
    let (session, recorder) = session_with(Scripted::open_ended(&[]));
    let (tx, inputs) = channels();
    let handle = tokio::spawn(session.run(inputs));

    tokio::time::sleep(Duration::from_secs(15)).await;
    tx.transcripts.send(TranscriptEvent::Closed).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    drop(tx);
    handle.await.unwrap();

    assert_eq!(recorder.count(&Call::KeepAlive), 1);
    assert_eq!(recorder.count(&Call::TranscriberClosed), 1);
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_the_active_turn() {
    let (session, recorder) = session_with(Scripted::open_ended(&["Once upon"]));
    let (tx, inputs) = channels();
    let handle = tokio::spawn(session.run(inputs));

    tx.media.send(start_event()).await.unwrap();
    tx.transcripts
        .send(TranscriptEvent::Fragment(TranscriptFragment::finalized("a story", true)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    tx.media
        .send(media_event(r#"{"event":"stop","streamSid":"MZ1","stop":{"callSid":"CA1"}}"#))
        .await
        .unwrap();
    let stats = handle.await.unwrap();

    assert_eq!(stats.turns_started, 1);
    assert_eq!(stats.turns_cancelled, 1);
    assert_eq!(recorder.count(&Call::Speak("Once upon".to_string())), 1);
    assert_eq!(recorder.count(&Call::TranscriberClosed), 1);
    assert_eq!(recorder.count(&Call::SynthesizerClosed), 1);
}

/// Emits a few slow increments and tracks how many of its streams are alive.
struct Counting {
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Generator for Counting {
    fn stream(&self, _messages: Vec<ChatMessage>) -> Increments {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let guard = ActiveGuard(self.active.clone());
        stream::unfold((0, guard), |(i, guard)| async move {
            if i == 5 {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
            Some((Ok::<_, anyhow::Error>(format!("w{} ", i)), (i + 1, guard)))
        })
        .boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn one_turn_at_a_time_under_concurrent_events() {
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let generator = Arc::new(Counting {
        active: active.clone(),
        max_active: max_active.clone(),
    });
    let (tx, inputs) = channels();
    let recorder = Recorder::acknowledging(tx.speech.clone());
    let session = session_recording(generator, &recorder);
    let handle = tokio::spawn(session.run(inputs));
    tx.media.send(start_event()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    let transcripts = tx.transcripts.clone();
    let talker = tokio::spawn(async move {
        for i in 0..12 {
            let text = format!("utterance {}", i);
            let fragment = TranscriptFragment::finalized(&text, true);
            transcripts.send(TranscriptEvent::Fragment(fragment)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(15)).await;
            if i % 3 == 0 {
                let interim = TranscriptFragment::interim("hold on");
                transcripts.send(TranscriptEvent::Fragment(interim)).await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    });
    let speech = tx.speech.clone();
    let synthesizer = tokio::spawn(async move {
        for _ in 0..40 {
            speech.send(SpeechEvent::Audio(vec![0x7f; 160])).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });
    let audio_in = tx.media.clone();
    let caller = tokio::spawn(async move {
        for _ in 0..40 {
            audio_in.send(inbound(&[0xff; 160])).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    talker.await.unwrap();
    synthesizer.await.unwrap();
    caller.await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    tx.media.send(MediaEvent::Close).await.unwrap();
    let stats = handle.await.unwrap();

    assert_eq!(max_active.load(Ordering::SeqCst), 1);
    assert_eq!(active.load(Ordering::SeqCst), 0);
    assert_eq!(stats.turns_started, 12);
    assert_eq!(stats.turns_started, stats.turns_completed + stats.turns_cancelled);
    assert_eq!(stats.frames_in, 40);
    assert_eq!(stats.frames_out + stats.frames_discarded, 40);
    assert_eq!(recorder.count(&Call::Flush) as u64, stats.turns_completed);
}
