use serde::Serialize;

/// Per-call counters, logged once when the session ends.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub turns_started: u64,
    pub turns_completed: u64,
    pub turns_cancelled: u64,
    /// Inbound audio frames forwarded to the recognizer.
    pub frames_in: u64,
    /// Synthesized frames sent to the peer.
    pub frames_out: u64,
    /// Synthesized frames dropped because the agent was no longer speaking.
    pub frames_discarded: u64,
    pub audio_out_ms: u64,
}
