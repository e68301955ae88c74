pub mod chain;
pub mod engine;
pub mod markers;
pub mod scripted;
pub mod transcript;

pub use chain::{CaptureChain, CaptureStrategy, CaptureStream};
pub use engine::{ConversationEngine, Delivery, Sink, TeamController};
pub use markers::extract_credential_needs;
pub use scripted::ScriptedTeam;
pub use transcript::TranscriptParser;
