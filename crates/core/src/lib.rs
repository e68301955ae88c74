pub mod config;
pub mod error;
pub mod event;
pub mod paths;
pub mod redact;

pub use config::Config;
pub use error::{Error, Result};
pub use event::{
    ActionDescriptor, ActionKind, AgentMessage, CredentialNeed, CredentialRequest, Event,
    NeedSource, Notice, TaskSpec, TaskStatus, Verdict, VerdictKind, normalize_provider, now_ts,
};
pub use paths::Paths;
pub use redact::redact;
