pub mod bridge;
pub mod config;
mod consts;
pub mod generation;
pub mod server;
pub mod session;
pub mod synthesis;
pub mod telephony;
pub mod transcription;
mod utils;

pub use call_agent_types as types;
pub use call_agent_utils::audio;

pub use config::Config;
pub use session::{Session, SessionInputs, SessionStats};
