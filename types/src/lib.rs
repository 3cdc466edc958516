pub mod chat;
pub mod listen;
pub mod media;
pub mod speak;

pub use chat::{ChatChunk, ChatMessage, ChatRequest, Role};
pub use listen::{ListenControl, ListenEvent, ListenOptions};
pub use media::{MediaEvent, OutboundMessage, Track};
pub use speak::{SpeakCommand, SpeakEvent};
