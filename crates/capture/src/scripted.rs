use std::sync::Arc;

use async_trait::async_trait;
use overseer_core::{AgentMessage, Error, Result};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::{deliver, ConversationEngine, Sink, TeamController};

#[derive(Debug, Clone)]
struct Participant {
    name: String,
    instructions: String,
}

#[derive(Default)]
struct Roster {
    participants: Vec<Participant>,
    patches: Vec<String>,
}

/// Built-in conversation engine that replays a deterministic team
/// exchange, including a credential-request beat, so the whole
/// orchestration surface can run without an external agent framework.
/// Stands in for the real engine in the gateway default path and in tests.
pub struct ScriptedTeam {
    task: String,
    roster: Arc<Mutex<Roster>>,
    script: Option<Vec<(String, String, String)>>,
    sink: Option<Sink>,
}

const DEFAULT_ROLES: [&str; 3] = ["Planner", "Researcher", "Writer"];

impl ScriptedTeam {
    pub fn new(task: &str, max_participants: usize) -> Self {
        let count = max_participants.clamp(1, DEFAULT_ROLES.len());
        let participants = DEFAULT_ROLES[..count]
            .iter()
            .map(|role| Participant {
                name: role.to_string(),
                instructions: format!("You are the team {} working on: {}", role, task),
            })
            .collect();

        Self {
            task: task.to_string(),
            roster: Arc::new(Mutex::new(Roster {
                participants,
                patches: Vec::new(),
            })),
            script: None,
            sink: None,
        }
    }

    /// Replace the built-in beats with an explicit
    /// (sender, recipient, content) script.
    pub fn with_script(task: &str, script: Vec<(String, String, String)>) -> Self {
        let mut team = Self::new(task, DEFAULT_ROLES.len());
        team.script = Some(script);
        team
    }

    pub async fn participant_names(&self) -> Vec<String> {
        self.roster
            .lock()
            .await
            .participants
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    async fn nth_beat(&self, index: usize) -> Option<AgentMessage> {
        if let Some(script) = &self.script {
            return script
                .get(index)
                .map(|(sender, recipient, content)| AgentMessage::new(sender, recipient, content));
        }

        let roster = self.roster.lock().await;
        let name = |i: usize| {
            roster
                .participants
                .get(i)
                .or_else(|| roster.participants.first())
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "Agent".to_string())
        };

        match index {
            0 => Some(AgentMessage::new(
                &name(0),
                &name(1),
                &format!("Task breakdown for: {}", self.task),
            )),
            1 => Some(AgentMessage::new(
                &name(1),
                &name(0),
                "I may need private GitHub examples. REQUEST_API_KEY: github",
            )),
            2 => Some(AgentMessage::new(
                &name(2),
                "User",
                &format!(
                    "Done. Here are 3 trusted public sources about: {}",
                    self.task
                ),
            )),
            _ => None,
        }
    }
}

struct ScriptedController {
    task: String,
    roster: Arc<Mutex<Roster>>,
}

#[async_trait]
impl TeamController for ScriptedController {
    async fn add_participant(&self, role: &str, instructions: &str) -> Result<()> {
        let name = role.trim().replace(' ', "_");
        if name.is_empty() {
            return Err(Error::Engine("participant role must not be empty".to_string()));
        }
        let mut roster = self.roster.lock().await;
        roster.participants.push(Participant {
            name: name.clone(),
            instructions: if instructions.is_empty() {
                format!("You joined the team working on: {}", self.task)
            } else {
                instructions.to_string()
            },
        });
        debug!(participant = %name, "Participant added");
        Ok(())
    }

    async fn remove_participant(&self, name: &str) -> Result<()> {
        let mut roster = self.roster.lock().await;
        let before = roster.participants.len();
        roster.participants.retain(|p| p.name != name);
        debug!(
            participant = %name,
            removed = before - roster.participants.len(),
            "Participant removal applied"
        );
        Ok(())
    }

    async fn patch_instructions(&self, patch: &str) -> Result<()> {
        let mut roster = self.roster.lock().await;
        roster.patches.push(patch.to_string());
        for participant in roster.participants.iter_mut() {
            participant.instructions = format!("{}\n{}", participant.instructions, patch);
        }
        debug!(patches = roster.patches.len(), "Instruction patch applied");
        Ok(())
    }
}

#[async_trait]
impl ConversationEngine for ScriptedTeam {
    fn name(&self) -> &str {
        "scripted-team"
    }

    fn install_reply_hook(&mut self, sink: Sink) -> bool {
        self.sink = Some(sink);
        true
    }

    fn controller(&self) -> Arc<dyn TeamController> {
        Arc::new(ScriptedController {
            task: self.task.clone(),
            roster: self.roster.clone(),
        })
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| Error::Engine("scripted team started without a capture sink".to_string()))?;

        let mut index = 0;
        loop {
            let Some(beat) = self.nth_beat(index).await else {
                return Ok(());
            };
            index += 1;

            let delivered = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                delivered = deliver(&sink, beat) => delivered,
            };
            if !delivered {
                // Orchestrator went away; nothing left to talk to.
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::CaptureChain;

    #[tokio::test]
    async fn roster_honors_max_participants() {
        let team = ScriptedTeam::new("t", 2);
        assert_eq!(team.participant_names().await, vec!["Planner", "Researcher"]);

        let team = ScriptedTeam::new("t", 0);
        assert_eq!(team.participant_names().await.len(), 1);
    }

    #[tokio::test]
    async fn default_script_flows_through_the_capture_chain() {
        let mut team = ScriptedTeam::new("rate limiting research", 3);
        let (_, mut stream) = CaptureChain::attach(&mut team, 16).unwrap();
        let cancel = CancellationToken::new();

        let driver = tokio::spawn(async move { team.run(cancel).await });

        let mut messages = Vec::new();
        while let Some((message, ack)) = stream.next().await {
            messages.push(message);
            ack.send(()).unwrap();
        }

        driver.await.unwrap().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].sender, "Planner");
        assert!(messages[0].content.contains("rate limiting research"));
        assert!(messages[1].content.contains("REQUEST_API_KEY: github"));
        assert_eq!(messages[2].recipient, "User");
    }

    #[tokio::test]
    async fn controller_mutations_show_up_in_later_beats() {
        let mut team = ScriptedTeam::new("t", 3);
        let controller = team.controller();
        let (_, mut stream) = CaptureChain::attach(&mut team, 16).unwrap();
        let cancel = CancellationToken::new();

        let driver = tokio::spawn(async move { team.run(cancel).await });

        // First beat is from the original planner.
        let (first, ack) = stream.next().await.unwrap();
        assert_eq!(first.sender, "Planner");

        // Drop the researcher before the second beat is produced; the
        // script falls back to the head of the roster.
        controller.remove_participant("Researcher").await.unwrap();
        ack.send(()).unwrap();

        let (second, ack) = stream.next().await.unwrap();
        assert_ne!(second.sender, "Researcher");
        ack.send(()).unwrap();

        while let Some((_, ack)) = stream.next().await {
            ack.send(()).unwrap();
        }
        driver.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_the_script() {
        let mut team = ScriptedTeam::new("t", 3);
        let (_, mut stream) = CaptureChain::attach(&mut team, 16).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let driver = tokio::spawn(async move { team.run(cancel).await });
        driver.await.unwrap().unwrap();
        // No beat was ever delivered.
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn custom_scripts_replace_the_default_beats() {
        let script = vec![(
            "A".to_string(),
            "B".to_string(),
            "only message".to_string(),
        )];
        let mut team = ScriptedTeam::with_script("t", script);
        let (_, mut stream) = CaptureChain::attach(&mut team, 16).unwrap();
        let driver = tokio::spawn(async move { team.run(CancellationToken::new()).await });

        let (message, ack) = stream.next().await.unwrap();
        assert_eq!(message.content, "only message");
        ack.send(()).unwrap();
        assert!(stream.next().await.is_none());
        driver.await.unwrap().unwrap();
    }
}
