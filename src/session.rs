//! Per-call orchestration.
//!
//! A [`Session`] binds one telephony media stream to a recognizer, a generator and a
//! synthesizer. Every event of the call funnels through the single loop in [`Session::run`],
//! which is the only place the `speaking` flag, the utterance buffer and the active turn change.

use crate::audio;
use crate::bridge::AudioBridge;
use crate::consts::KEEP_ALIVE_INTERVAL;
use crate::generation::{GenerationOrchestrator, TurnProgress};
use crate::synthesis::{SpeechEvent, Synthesizer};
use crate::transcription::{TranscriptEvent, TranscriptFragment, Transcriber, UtteranceBuffer};
use crate::types::{MediaEvent, Track};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

mod stats;

pub use stats::SessionStats;

/// Event sources of one call.
pub struct SessionInputs {
    pub media: mpsc::Receiver<MediaEvent>,
    pub transcripts: mpsc::Receiver<TranscriptEvent>,
    pub speech: mpsc::Receiver<SpeechEvent>,
}

pub struct Session {
    stream_sid: Option<String>,
    /// Agent audio is currently being played to the peer.
    speaking: bool,
    /// A clear was sent to the synthesizer and not yet acknowledged.
    awaiting_clear: bool,
    synthesizer_closed: bool,
    has_seen_audio: bool,
    utterances: UtteranceBuffer,
    /// Utterances that arrived while a turn was generating.
    pending: VecDeque<String>,
    turns: GenerationOrchestrator,
    bridge: Box<dyn AudioBridge>,
    transcriber: Box<dyn Transcriber>,
    synthesizer: Box<dyn Synthesizer>,
    keep_alive: Duration,
    stats: SessionStats,
    closed: bool,
}

impl Session {
    pub fn new(
        turns: GenerationOrchestrator,
        bridge: Box<dyn AudioBridge>,
        transcriber: Box<dyn Transcriber>,
        synthesizer: Box<dyn Synthesizer>,
    ) -> Self {
        Self {
            stream_sid: None,
            speaking: false,
            awaiting_clear: false,
            synthesizer_closed: false,
            has_seen_audio: false,
            utterances: UtteranceBuffer::new(),
            pending: VecDeque::new(),
            turns,
            bridge,
            transcriber,
            synthesizer,
            keep_alive: KEEP_ALIVE_INTERVAL,
            stats: SessionStats::default(),
            closed: false,
        }
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn is_awaiting_clear(&self) -> bool {
        self.awaiting_clear
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Runs the call until the peer goes away, then releases everything the session owns.
    pub async fn run(mut self, inputs: SessionInputs) -> SessionStats {
        let SessionInputs {
            mut media,
            mut transcripts,
            mut speech,
        } = inputs;
        let mut transcripts_open = true;
        let mut speech_open = true;

        let mut keep_alive = time::interval_at(Instant::now() + self.keep_alive, self.keep_alive);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.closed {
            tokio::select! {
                event = media.recv() => match event {
                    Some(event) => self.handle_media(event),
                    None => {
                        tracing::info!("media stream ended");
                        self.closed = true;
                    }
                },
                event = transcripts.recv(), if transcripts_open => match event {
                    Some(TranscriptEvent::Closed) | None => {
                        tracing::warn!("recognizer closed, no further transcripts for this call");
                        transcripts_open = false;
                    }
                    Some(event) => self.handle_transcript(event),
                },
                progress = self.turns.next(), if self.turns.is_generating() => {
                    self.handle_progress(progress);
                }
                event = speech.recv(), if speech_open => match event {
                    Some(SpeechEvent::Closed) | None => {
                        speech_open = false;
                        self.handle_speech(SpeechEvent::Closed);
                    }
                    Some(event) => self.handle_speech(event),
                },
                _ = keep_alive.tick(), if transcripts_open => {
                    self.transcriber.keep_alive();
                }
            }
        }

        self.teardown()
    }

    fn handle_media(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::Connected(connected) => {
                tracing::debug!(
                    "peer connected: protocol={:?} version={:?}",
                    connected.protocol(),
                    connected.version()
                );
            }
            MediaEvent::Start(start) => {
                if let Some(sid) = start.stream_sid() {
                    self.adopt_stream_sid(sid);
                }
                let metadata = start.metadata();
                tracing::info!(
                    call_sid = ?metadata.call_sid(),
                    tracks = ?metadata.tracks(),
                    sample_rate = ?metadata.media_format().map(|format| format.sample_rate),
                    "media stream started"
                );
                if !metadata.custom_parameters().is_empty() {
                    tracing::debug!("custom parameters: {:?}", metadata.custom_parameters());
                }
            }
            MediaEvent::Media(message) => {
                if let Some(sid) = message.stream_sid() {
                    self.adopt_stream_sid(sid);
                }
                if message.track() != Track::Inbound {
                    return;
                }
                let frame = audio::decode(message.payload());
                if frame.is_empty() {
                    return;
                }
                if !self.has_seen_audio {
                    self.has_seen_audio = true;
                    tracing::debug!("first inbound audio");
                }
                self.stats.frames_in += 1;
                self.transcriber.feed(frame);
            }
            MediaEvent::Mark(mark) => {
                tracing::debug!("mark: {:?}", mark.name());
            }
            MediaEvent::Stop(stop) => {
                tracing::info!(call_sid = ?stop.call_sid(), "media stream stopped");
                self.closed = true;
            }
            MediaEvent::Close => {
                tracing::info!("peer closed the media stream");
                self.closed = true;
            }
        }
    }

    fn adopt_stream_sid(&mut self, sid: &str) {
        if self.stream_sid.is_some() {
            return;
        }
        tracing::Span::current().record("stream_sid", sid);
        tracing::info!("stream sid: {}", sid);
        self.stream_sid = Some(sid.to_string());
    }

    fn handle_transcript(&mut self, event: TranscriptEvent) {
        match event {
            TranscriptEvent::Fragment(fragment) => self.handle_fragment(fragment),
            TranscriptEvent::UtteranceEnd => {
                if let Some(utterance) = self.utterances.utterance_end() {
                    self.submit(utterance);
                }
            }
            TranscriptEvent::Closed => {}
        }
    }

    fn handle_fragment(&mut self, fragment: TranscriptFragment) {
        tracing::debug!(
            is_final = fragment.is_final,
            speech_final = fragment.is_speech_final,
            "transcript: {}",
            fragment.text
        );
        if fragment.is_final {
            if let Some(utterance) = self.utterances.push(&fragment) {
                self.submit(utterance);
            }
        } else {
            self.barge_in();
        }
    }

    /// The callee is talking over the agent.
    fn barge_in(&mut self) {
        if !self.speaking {
            return;
        }
        tracing::info!("barge-in, clearing playback");
        self.clear_playback();
    }

    fn clear_playback(&mut self) {
        match self.stream_sid.as_deref() {
            Some(sid) => self.bridge.send_clear(sid),
            None => tracing::warn!("no stream sid, cannot clear peer playback"),
        }
        self.synthesizer.clear();
        self.speaking = false;
        self.awaiting_clear = !self.synthesizer_closed;
        if self.turns.cancel() {
            self.stats.turns_cancelled += 1;
        }
    }

    fn submit(&mut self, utterance: String) {
        if self.turns.is_generating() || self.awaiting_clear {
            tracing::debug!("turn in progress or playback clearing, queueing utterance");
            self.pending.push_back(utterance);
        } else {
            self.begin_turn(&utterance);
        }
    }

    fn begin_turn(&mut self, utterance: &str) {
        self.speaking = true;
        self.turns.start(utterance);
        self.stats.turns_started += 1;
    }

    fn start_pending(&mut self) {
        if self.turns.is_generating() || self.awaiting_clear {
            return;
        }
        if let Some(utterance) = self.pending.pop_front() {
            self.begin_turn(&utterance);
        }
    }

    fn handle_progress(&mut self, progress: TurnProgress) {
        match progress {
            TurnProgress::Increment(text) => self.turns.forward(&text, self.synthesizer.as_ref()),
            TurnProgress::Exhausted => {
                if self.turns.complete(self.synthesizer.as_ref()).is_some() {
                    self.stats.turns_completed += 1;
                }
                self.start_pending();
            }
            TurnProgress::Failed(e) => {
                tracing::error!("generation failed: {:#}", e);
                self.clear_playback();
            }
        }
    }

    fn handle_speech(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::Audio(frame) => {
                if !self.speaking || self.awaiting_clear {
                    self.stats.frames_discarded += 1;
                    tracing::trace!("discarding {} bytes of stale audio", frame.len());
                    return;
                }
                let Some(sid) = self.stream_sid.as_deref() else {
                    tracing::warn!("no stream sid, dropping synthesized audio");
                    return;
                };
                self.turns.mark_audio();
                self.bridge.send_media(sid, &frame);
                self.stats.frames_out += 1;
                self.stats.audio_out_ms +=
                    audio::frame_duration(&frame, audio::TELEPHONY_SAMPLE_RATE).as_millis() as u64;
            }
            SpeechEvent::Flushed => tracing::debug!("synthesizer flushed"),
            SpeechEvent::Cleared => {
                tracing::debug!("synthesizer cleared");
                self.awaiting_clear = false;
                self.start_pending();
            }
            SpeechEvent::Closed => {
                tracing::warn!("synthesizer closed, no further audio for this call");
                self.synthesizer_closed = true;
                self.awaiting_clear = false;
                self.start_pending();
            }
        }
    }

    fn teardown(mut self) -> SessionStats {
        if self.turns.cancel() {
            self.stats.turns_cancelled += 1;
        }
        self.speaking = false;
        self.transcriber.close();
        self.synthesizer.close();
        match serde_json::to_string(&self.stats) {
            Ok(stats) => tracing::info!("session ended: {}", stats),
            Err(e) => tracing::warn!("failed to serialize session stats: {}", e),
        }
        self.stats
    }
}

#[cfg(test)]
mod tests;
