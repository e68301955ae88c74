use serde::{Deserialize, Serialize};

use crate::redact::redact;

/// Unix-seconds timestamp used on every wire event.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Canonical provider identity: trimmed, lower-cased, internal whitespace
/// runs collapsed to a single underscore. `"GitHub "` and `"github"` map to
/// the same key, as do `"My Provider"` and `"my  provider"`.
pub fn normalize_provider(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Running,
    Paused,
    Finished,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Error)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Created => write!(f, "created"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Paused => write!(f, "paused"),
            TaskStatus::Finished => write!(f, "finished"),
            TaskStatus::Error => write!(f, "error"),
        }
    }
}

/// Everything a start request carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub verifier_api_key: Option<String>,
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,
    #[serde(default)]
    pub auto_apply: bool,
    pub user_id: String,
    /// Optional idempotency key. A live task under the same id rejects the
    /// start request; when absent a fresh UUID is assigned.
    #[serde(default)]
    pub task_id: Option<String>,
}

fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_max_participants() -> usize {
    3
}

/// One captured conversation message. Immutable once emitted; emission
/// order is monotonic per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub sender: String,
    pub recipient: String,
    pub content: String,
    pub ts: i64,
}

impl AgentMessage {
    pub fn new(sender: &str, recipient: &str, content: &str) -> Self {
        Self {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            content: content.to_string(),
            ts: now_ts(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Pass,
    Fail,
}

/// Structured audit result for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub verdict: VerdictKind,
    pub confidence: f64,
    pub reason: String,
    #[serde(default)]
    pub suggested_actions: Vec<ActionDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_for_agent: Option<String>,
    #[serde(default = "now_ts")]
    pub ts: i64,
}

impl Verdict {
    pub fn new(verdict: VerdictKind, confidence: f64, reason: &str) -> Self {
        Self {
            verdict,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.to_string(),
            suggested_actions: Vec::new(),
            patch_for_agent: None,
            ts: now_ts(),
        }
    }

    pub fn is_fail(&self) -> bool {
        self.verdict == VerdictKind::Fail
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    AddParticipant,
    RemoveParticipant,
    ModifyParticipantInstructions,
    RequestCredential,
    RequestReferences,
    ReduceTemperature,
    IncreaseTemperature,
    Other,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionKind::AddParticipant => "add_participant",
            ActionKind::RemoveParticipant => "remove_participant",
            ActionKind::ModifyParticipantInstructions => "modify_participant_instructions",
            ActionKind::RequestCredential => "request_credential",
            ActionKind::RequestReferences => "request_references",
            ActionKind::ReduceTemperature => "reduce_temperature",
            ActionKind::IncreaseTemperature => "increase_temperature",
            ActionKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// One corrective action suggested by the auditor, either auto-applied or
/// parked for manual approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub id: String,
    pub kind: ActionKind,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub detail: String,
}

impl ActionDescriptor {
    fn build(kind: ActionKind, target: &str, detail: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            target: target.trim().to_string(),
            detail: detail.trim().to_string(),
        }
    }

    /// Parse the auditor's `kind:target:detail` string grammar. Unknown
    /// heads are preserved as `other` rather than dropped.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (head, rest) = match raw.split_once(':') {
            Some((h, r)) => (h.trim(), r.trim()),
            None => (raw, ""),
        };

        match head {
            "add_agent" | "add_participant" => {
                let (target, detail) = match rest.split_once(':') {
                    Some((t, d)) => (t, d),
                    None => (rest, ""),
                };
                Self::build(ActionKind::AddParticipant, target, detail)
            }
            "remove_agent" | "remove_participant" => {
                Self::build(ActionKind::RemoveParticipant, rest, "")
            }
            "modify_agent_system_prompt" | "modify_participant_instructions" => {
                Self::build(ActionKind::ModifyParticipantInstructions, "", rest)
            }
            "request_credential" => {
                let (provider, reason) = match rest.split_once(':') {
                    Some((p, r)) => (p, r),
                    None => (rest, ""),
                };
                Self::build(
                    ActionKind::RequestCredential,
                    &normalize_provider(provider),
                    reason,
                )
            }
            "request_references" => Self::build(ActionKind::RequestReferences, "", ""),
            "reduce_temperature" => Self::build(ActionKind::ReduceTemperature, "", ""),
            "increase_temperature" => Self::build(ActionKind::IncreaseTemperature, "", ""),
            other => Self::build(ActionKind::Other, other, rest),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeedSource {
    Marker,
    Verdict,
}

/// The unified pause signal: one shape regardless of whether the need came
/// from an in-text marker or an auditor verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialNeed {
    pub provider: String,
    pub description: String,
    pub source: NeedSource,
}

impl CredentialNeed {
    pub fn new(provider: &str, description: &str, source: NeedSource) -> Self {
        Self {
            provider: normalize_provider(provider),
            description: description.to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRequest {
    pub provider: String,
    pub description: String,
    pub request_id: String,
    pub task_id: String,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: ActionKind,
    pub detail: String,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub msg: String,
    pub ts: i64,
}

/// Wire representation of everything pushed through the event bus, one
/// `{kind, payload}` object per frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Event {
    AgentMessage(AgentMessage),
    VerifierResult(Verdict),
    CredentialRequest(CredentialRequest),
    ActionResult(ActionResult),
    Info(Notice),
    Error(Notice),
    Finished(Notice),
}

impl Event {
    pub fn info(msg: &str) -> Self {
        Event::Info(Notice {
            msg: redact(msg),
            ts: now_ts(),
        })
    }

    pub fn error(msg: &str) -> Self {
        Event::Error(Notice {
            msg: redact(msg),
            ts: now_ts(),
        })
    }

    pub fn finished(msg: &str) -> Self {
        Event::Finished(Notice {
            msg: msg.to_string(),
            ts: now_ts(),
        })
    }

    pub fn action_result(action: ActionKind, detail: &str) -> Self {
        Event::ActionResult(ActionResult {
            action,
            detail: detail.to_string(),
            ts: now_ts(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::AgentMessage(_) => "agent_message",
            Event::VerifierResult(_) => "verifier_result",
            Event::CredentialRequest(_) => "credential_request",
            Event::ActionResult(_) => "action_result",
            Event::Info(_) => "info",
            Event::Error(_) => "error",
            Event::Finished(_) => "finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_normalization_collapses_case_and_whitespace() {
        assert_eq!(normalize_provider("GitHub "), "github");
        assert_eq!(normalize_provider("github"), "github");
        assert_eq!(normalize_provider("My Provider"), "my_provider");
        assert_eq!(normalize_provider("my  provider"), "my_provider");
        assert_eq!(normalize_provider("  SerpAPI\t"), "serpapi");
    }

    #[test]
    fn action_grammar_maps_to_kinds() {
        let a = ActionDescriptor::parse("add_agent: Researcher : digs up sources");
        assert_eq!(a.kind, ActionKind::AddParticipant);
        assert_eq!(a.target, "Researcher");
        assert_eq!(a.detail, "digs up sources");

        let a = ActionDescriptor::parse("remove_agent:Writer");
        assert_eq!(a.kind, ActionKind::RemoveParticipant);
        assert_eq!(a.target, "Writer");

        let a = ActionDescriptor::parse("modify_agent_system_prompt: cite sources");
        assert_eq!(a.kind, ActionKind::ModifyParticipantInstructions);
        assert_eq!(a.detail, "cite sources");

        let a = ActionDescriptor::parse("request_credential:GitHub:private repo access");
        assert_eq!(a.kind, ActionKind::RequestCredential);
        assert_eq!(a.target, "github");
        assert_eq!(a.detail, "private repo access");

        let a = ActionDescriptor::parse("request_references");
        assert_eq!(a.kind, ActionKind::RequestReferences);

        let a = ActionDescriptor::parse("launch_missiles:now");
        assert_eq!(a.kind, ActionKind::Other);
        assert_eq!(a.target, "launch_missiles");
    }

    #[test]
    fn event_frames_carry_kind_and_payload() {
        let event = Event::AgentMessage(AgentMessage::new("Planner", "Researcher", "hello"));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "agent_message");
        assert_eq!(value["payload"]["sender"], "Planner");

        let parsed: Event = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.kind(), "agent_message");
    }

    #[test]
    fn error_events_redact_secrets() {
        let event = Event::error("token sk-abcdefghijklmnop leaked");
        let value = serde_json::to_value(&event).unwrap();
        let msg = value["payload"]["msg"].as_str().unwrap();
        assert!(!msg.contains("sk-abcdefghijklmnop"));
        assert!(msg.contains("[REDACTED]"));
    }

    #[test]
    fn verdict_confidence_is_clamped() {
        let verdict = Verdict::new(VerdictKind::Pass, 1.7, "fine");
        assert_eq!(verdict.confidence, 1.0);
    }
}
