use once_cell::sync::Lazy;
use overseer_core::AgentMessage;
use regex::Regex;

/// Matches `Planner (to chat_manager):`, the header line a conversation
/// engine prints before each message body on its raw output stream.
static HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9_. -]+?)\s*\(to\s+([A-Za-z0-9_. -]+?)\)\s*:\s*$").unwrap());

static SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-{20,}$").unwrap());

/// Stateful heuristic parser turning raw output lines back into messages.
/// A header opens a message, a long dash rule (or the next header, or end
/// of stream) closes it; lines outside any message are noise and dropped.
pub struct TranscriptParser {
    current: Option<(String, String, Vec<String>)>,
}

impl TranscriptParser {
    pub fn new() -> Self {
        Self { current: None }
    }

    fn complete(&mut self) -> Option<AgentMessage> {
        let (sender, recipient, body) = self.current.take()?;
        let content = body.join("\n").trim().to_string();
        if content.is_empty() {
            return None;
        }
        Some(AgentMessage::new(&sender, &recipient, &content))
    }

    /// Feed one line; returns a message when that line closed one.
    pub fn push_line(&mut self, line: &str) -> Option<AgentMessage> {
        let trimmed = line.trim_end();

        if let Some(caps) = HEADER.captures(trimmed) {
            let finished = self.complete();
            self.current = Some((caps[1].to_string(), caps[2].to_string(), Vec::new()));
            return finished;
        }

        if SEPARATOR.is_match(trimmed.trim()) {
            return self.complete();
        }

        if let Some((_, _, body)) = self.current.as_mut() {
            body.push(trimmed.to_string());
        }
        None
    }

    /// Close whatever is still open at end of stream.
    pub fn flush(&mut self) -> Option<AgentMessage> {
        self.complete()
    }
}

impl Default for TranscriptParser {
    fn default() -> Self {
        Self::new()
    }
}
