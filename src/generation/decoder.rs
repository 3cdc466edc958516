use crate::types::ChatChunk;

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// Incremental decoder for a server-sent chat-completion body.
///
/// Network chunks may split lines anywhere, so bytes are buffered until a newline arrives.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl ChunkDecoder {
    /// Feeds raw body bytes and returns the text increments completed by them, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut increments = Vec::new();
        if self.done {
            return increments;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim().strip_prefix(DATA_PREFIX) else {
                continue;
            };
            let data = data.trim();
            if data == DONE_MARKER {
                self.done = true;
                self.buffer.clear();
                break;
            }
            match serde_json::from_str::<ChatChunk>(data) {
                Ok(chunk) => {
                    if let Some(text) = chunk.delta_content().filter(|text| !text.is_empty()) {
                        increments.push(text.to_string());
                    }
                    if let Some(reason) = chunk.finish_reason() {
                        tracing::debug!("generation finished: {}", reason);
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to deserialize chat chunk: {}, data=> {:?}", e, data);
                }
            }
        }
        increments
    }

    /// Whether the terminating `[DONE]` line was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }
}
