use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use overseer_capture::{extract_credential_needs, CaptureChain, ConversationEngine, TeamController};
use overseer_core::{
    redact, now_ts, ActionDescriptor, ActionKind, AgentMessage, CredentialNeed, CredentialRequest,
    Error, Event, NeedSource, Result, TaskSpec, TaskStatus,
};
use overseer_credentials::CredentialStore;
use overseer_verifier::{Audit, AuditContext, Auditor};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::EventBus;

/// Owns one task end-to-end: drives capture → audit → event bus for every
/// message, applies or parks corrective actions, and coordinates the
/// credential pause/resume with the store.
///
/// State machine: created → running → (paused ⇄ running)* → finished |
/// error. The conversation itself runs on a dedicated tokio task; while it
/// is parked inside a credential wait the capture ack is withheld, which
/// is what suspends the engine.
pub struct TaskRunner {
    pub task_id: String,
    spec: TaskSpec,
    status: RwLock<TaskStatus>,
    terminal_since: Mutex<Option<Instant>>,
    pub(crate) bus: Arc<EventBus>,
    cancel: CancellationToken,
    store: CredentialStore,
    auditor: Arc<dyn Auditor>,
    controller: Mutex<Option<Arc<dyn TeamController>>>,
    pending_actions: Mutex<HashMap<String, ActionDescriptor>>,
    pending_credentials: Mutex<HashSet<String>>,
    wait_timeout: Duration,
    capture_buffer: usize,
}

impl TaskRunner {
    pub fn new(
        task_id: String,
        spec: TaskSpec,
        store: CredentialStore,
        auditor: Arc<dyn Auditor>,
        wait_timeout: Duration,
        event_buffer: usize,
    ) -> Self {
        let bus = Arc::new(EventBus::new(&task_id, event_buffer));
        Self {
            task_id,
            spec,
            status: RwLock::new(TaskStatus::Created),
            terminal_since: Mutex::new(None),
            bus,
            cancel: CancellationToken::new(),
            store,
            auditor,
            controller: Mutex::new(None),
            pending_actions: Mutex::new(HashMap::new()),
            pending_credentials: Mutex::new(HashSet::new()),
            wait_timeout,
            capture_buffer: 64,
        }
    }

    pub async fn status(&self) -> TaskStatus {
        *self.status.read().await
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Ask the task to stop. Interrupts a parked credential wait and the
    /// engine; the task lands in `error` state, not limbo.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn set_status(&self, next: TaskStatus) {
        let mut status = self.status.write().await;
        if status.is_terminal() {
            return;
        }
        debug!(task_id = %self.task_id, from = %status, to = %next, "Task status transition");
        *status = next;
        drop(status);
        if next.is_terminal() {
            *self.terminal_since.lock().await = Some(Instant::now());
        }
    }

    /// How long ago the task reached a terminal state, if it has.
    pub async fn terminal_for(&self) -> Option<Duration> {
        self.terminal_since.lock().await.map(|t| t.elapsed())
    }

    async fn fail(&self, msg: &str) {
        warn!(task_id = %self.task_id, msg, "Task failed");
        self.bus.publish(Event::error(msg)).await;
        self.set_status(TaskStatus::Error).await;
    }

    /// The conversation driver. Runs on its own tokio task so a blocking
    /// credential wait here never stalls another task or the connection
    /// layer.
    pub async fn drive(self: Arc<Self>, mut engine: Box<dyn ConversationEngine>) {
        self.set_status(TaskStatus::Running).await;
        self.bus.publish(Event::info("Task started")).await;

        let (strategy, mut stream) = match CaptureChain::attach(engine.as_mut(), self.capture_buffer)
        {
            Ok(attached) => attached,
            Err(e) => {
                self.fail(&format!("No capture strategy attached: {}", e)).await;
                self.bus.close().await;
                return;
            }
        };
        debug!(task_id = %self.task_id, strategy = %strategy, "Conversation capture ready");
        *self.controller.lock().await = Some(engine.controller());

        let engine_cancel = self.cancel.clone();
        let driver = tokio::spawn(async move {
            let result = engine.run(engine_cancel).await;
            // Engine drop closes its capture sink, which ends the stream.
            drop(engine);
            result
        });

        let mut protocol_error = false;
        while let Some((message, ack)) = stream.next().await {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.handle_message(message).await {
                self.fail(&e.to_string()).await;
                protocol_error = true;
                break;
            }
            // Releasing the ack resumes the conversation.
            let _ = ack.send(());
        }
        drop(stream);

        let engine_result = driver.await;

        if !protocol_error {
            if self.cancel.is_cancelled() {
                self.fail("Task stopped by request").await;
            } else {
                match engine_result {
                    Ok(Ok(())) => {
                        self.bus.publish(Event::finished("Task completed")).await;
                        self.set_status(TaskStatus::Finished).await;
                        info!(task_id = %self.task_id, "Task completed");
                    }
                    Ok(Err(e)) => {
                        self.fail(&format!("Conversation engine failed: {}", e)).await;
                    }
                    Err(e) => {
                        self.fail(&format!("Conversation engine crashed: {}", e)).await;
                    }
                }
            }
        }

        self.bus.close().await;
    }

    /// The per-message protocol: publish, audit, publish verdict, pause on
    /// credential needs, apply or park the remaining suggestions.
    async fn handle_message(&self, message: AgentMessage) -> Result<()> {
        debug!(
            task_id = %self.task_id,
            sender = %message.sender,
            recipient = %message.recipient,
            "Agent message captured"
        );

        let wire = AgentMessage {
            content: redact(&message.content),
            ..message.clone()
        };
        self.bus.publish(Event::AgentMessage(wire)).await;

        // Explicit in-text markers count even when the auditor misses them.
        let mut needs = extract_credential_needs(&message.content);

        let ctx = AuditContext::new(
            &self.spec.task,
            &message.sender,
            &message.recipient,
            &message.content,
        );
        match self.auditor.verify(&ctx).await {
            Audit::Skipped { reason } => {
                self.bus
                    .publish(Event::info(&format!("Audit skipped: {}", reason)))
                    .await;
            }
            Audit::Verdict(verdict) => {
                self.bus.publish(Event::VerifierResult(verdict.clone())).await;

                if verdict.is_fail() {
                    let mut rest = Vec::new();
                    for action in verdict.suggested_actions {
                        if action.kind == ActionKind::RequestCredential {
                            if !needs.iter().any(|n| n.provider == action.target) {
                                needs.push(CredentialNeed::new(
                                    &action.target,
                                    &action.detail,
                                    NeedSource::Verdict,
                                ));
                            }
                        } else {
                            rest.push(action);
                        }
                    }

                    if self.spec.auto_apply {
                        for action in rest {
                            self.run_action(&action).await;
                        }
                    } else if !rest.is_empty() {
                        let mut pending = self.pending_actions.lock().await;
                        for action in rest {
                            pending.insert(action.id.clone(), action);
                        }
                    }
                }
            }
        }

        for need in needs {
            self.pause_for_credential(&need).await?;
        }
        Ok(())
    }

    /// Register the need, announce it once, park until the value lands or
    /// the wait dies. The raw value is dropped on arrival: the store stays
    /// the only holder.
    async fn pause_for_credential(&self, need: &CredentialNeed) -> Result<()> {
        let user = self.spec.user_id.clone();
        if self.store.has(&user, &need.provider).await {
            debug!(provider = %need.provider, "Credential already on file");
            return Ok(());
        }

        let newly_pending = self
            .pending_credentials
            .lock()
            .await
            .insert(need.provider.clone());
        if newly_pending {
            self.bus
                .publish(Event::CredentialRequest(CredentialRequest {
                    provider: need.provider.clone(),
                    description: need.description.clone(),
                    request_id: uuid::Uuid::new_v4().to_string(),
                    task_id: self.task_id.clone(),
                    ts: now_ts(),
                }))
                .await;
        }

        self.set_status(TaskStatus::Paused).await;
        self.bus
            .publish(Event::info(&format!(
                "Execution paused waiting for credential '{}'",
                need.provider
            )))
            .await;
        info!(task_id = %self.task_id, provider = %need.provider, "Task paused on credential");

        let waited = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(Error::Task("credential wait interrupted by stop request".to_string()));
            }
            waited = self.store.wait_for(&user, &need.provider, self.wait_timeout) => waited,
        };

        match waited {
            Ok(_value) => {
                self.pending_credentials.lock().await.remove(&need.provider);
                self.set_status(TaskStatus::Running).await;
                self.bus
                    .publish(Event::info(&format!(
                        "Credential for '{}' received. Resuming execution.",
                        need.provider
                    )))
                    .await;
                self.bus
                    .publish(Event::action_result(
                        ActionKind::RequestCredential,
                        &format!("Credential provided for {}", need.provider),
                    ))
                    .await;
                info!(task_id = %self.task_id, provider = %need.provider, "Task resumed");
                Ok(())
            }
            Err(Error::Timeout(_)) => Err(Error::Timeout(format!(
                "waiting for credential '{}'",
                need.provider
            ))),
            Err(e) => Err(e),
        }
    }

    /// Apply one corrective action through the engine controller.
    async fn run_action(&self, action: &ActionDescriptor) {
        match self.apply_action(action).await {
            Ok(detail) => {
                self.bus.publish(Event::action_result(action.kind, &detail)).await;
            }
            Err(e) => {
                self.bus
                    .publish(Event::error(&format!(
                        "Failed to apply action {}: {}",
                        action.kind, e
                    )))
                    .await;
            }
        }
    }

    async fn apply_action(&self, action: &ActionDescriptor) -> Result<String> {
        let controller = self
            .controller
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Task("no team controller attached".to_string()))?;

        match action.kind {
            ActionKind::AddParticipant => {
                controller.add_participant(&action.target, &action.detail).await?;
                Ok(format!("Added participant {}", action.target))
            }
            ActionKind::RemoveParticipant => {
                controller.remove_participant(&action.target).await?;
                Ok(format!("Removed participant {}", action.target))
            }
            ActionKind::ModifyParticipantInstructions => {
                controller.patch_instructions(&action.detail).await?;
                Ok("Instruction patch injected".to_string())
            }
            // Credential requests never reach here; they go through the
            // pause path. Everything else is advisory.
            _ => Ok(format!("Action noted: {}", action.kind)),
        }
    }

    /// Out-of-band approval for an action the auditor suggested while
    /// auto-apply was off.
    pub async fn approve_action(&self, action_id: &str, approve: bool) {
        let action = self.pending_actions.lock().await.remove(action_id);
        let Some(action) = action else {
            self.bus
                .publish(Event::error(&format!(
                    "No pending action with id {}",
                    action_id
                )))
                .await;
            return;
        };

        if !approve {
            self.bus
                .publish(Event::action_result(
                    action.kind,
                    &format!("Action rejected by observer: {}", action.kind),
                ))
                .await;
            return;
        }
        self.run_action(&action).await;
    }

    /// Ids of actions awaiting approval, for observers that reconnect.
    pub async fn pending_action_ids(&self) -> Vec<String> {
        self.pending_actions.lock().await.keys().cloned().collect()
    }
}
