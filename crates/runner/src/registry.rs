use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use overseer_capture::{ConversationEngine, ScriptedTeam};
use overseer_core::{Config, Error, Result, TaskSpec, TaskStatus};
use overseer_credentials::CredentialStore;
use overseer_verifier::{Auditor, CircuitBreaker, Verifier};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::task::TaskRunner;

#[derive(Debug, Clone)]
pub struct StartedTask {
    pub task_id: String,
    pub ws_path: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TaskSummary {
    pub created: usize,
    pub running: usize,
    pub paused: usize,
    pub finished: usize,
    pub error: usize,
}

/// Process-wide task registry: enforces the one-live-runner-per-id guard,
/// routes stop/approval commands, and garbage-collects terminal tasks once
/// their observer is gone and the grace period has elapsed.
pub struct RunnerRegistry {
    config: Config,
    store: CredentialStore,
    breaker: Arc<CircuitBreaker>,
    tasks: Mutex<HashMap<String, Arc<TaskRunner>>>,
}

impl RunnerRegistry {
    pub fn new(config: Config, store: CredentialStore) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            config.verifier.breaker_threshold,
            Duration::from_secs(config.verifier.breaker_cooldown_secs),
        ));
        Self {
            config,
            store,
            breaker,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Start a task on the built-in engine with a remote auditor wired to
    /// the shared circuit breaker.
    pub async fn start(&self, spec: TaskSpec) -> Result<StartedTask> {
        let team_size = spec
            .max_participants
            .clamp(1, self.config.runner.max_participants.max(1));
        let engine = Box::new(ScriptedTeam::new(&spec.task, team_size));

        let mut verifier_config = self.config.verifier.clone();
        verifier_config.model = spec.model.clone();
        let auditor: Arc<dyn Auditor> = Arc::new(Verifier::new(
            &verifier_config,
            spec.verifier_api_key.clone(),
            self.breaker.clone(),
        ));

        self.start_with(spec, engine, auditor).await
    }

    /// Start with an explicit engine and auditor. A task id that is still
    /// running or paused rejects the request without touching the live
    /// task; terminal ids may be reused.
    pub async fn start_with(
        &self,
        spec: TaskSpec,
        engine: Box<dyn ConversationEngine>,
        auditor: Arc<dyn Auditor>,
    ) -> Result<StartedTask> {
        let task_id = spec
            .task_id
            .clone()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let runner = {
            let mut tasks = self.tasks.lock().await;
            if let Some(existing) = tasks.get(&task_id) {
                if !existing.status().await.is_terminal() {
                    return Err(Error::TaskActive(task_id));
                }
            }

            let runner = Arc::new(TaskRunner::new(
                task_id.clone(),
                spec,
                self.store.clone(),
                auditor,
                Duration::from_secs(self.config.credentials.wait_timeout_secs),
                self.config.runner.event_buffer,
            ));
            tasks.insert(task_id.clone(), runner.clone());
            runner
        };

        tokio::spawn(runner.drive(engine));
        info!(task_id = %task_id, "Task launched");

        Ok(StartedTask {
            ws_path: format!("/ws/{}", task_id),
            task_id,
        })
    }

    pub async fn get(&self, task_id: &str) -> Option<Arc<TaskRunner>> {
        self.tasks.lock().await.get(task_id).cloned()
    }

    pub async fn stop(&self, task_id: &str) -> Result<()> {
        let runner = self
            .get(task_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
        runner.stop();
        Ok(())
    }

    pub async fn approve_action(&self, task_id: &str, action_id: &str, approve: bool) -> Result<()> {
        let runner = self
            .get(task_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
        runner.approve_action(action_id, approve).await;
        Ok(())
    }

    pub async fn summary(&self) -> TaskSummary {
        let tasks = self.tasks.lock().await;
        let mut summary = TaskSummary::default();
        for runner in tasks.values() {
            match runner.status().await {
                TaskStatus::Created => summary.created += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Paused => summary.paused += 1,
                TaskStatus::Finished => summary.finished += 1,
                TaskStatus::Error => summary.error += 1,
            }
        }
        summary
    }

    /// Drop terminal tasks whose observer is gone and whose grace period
    /// has elapsed.
    pub async fn gc_tick(&self) {
        let grace = Duration::from_secs(self.config.runner.grace_secs);
        let mut tasks = self.tasks.lock().await;
        let mut expired = Vec::new();
        for (task_id, runner) in tasks.iter() {
            if !runner.status().await.is_terminal() {
                continue;
            }
            if runner.bus.has_observer().await {
                continue;
            }
            if runner.terminal_for().await.map(|d| d >= grace).unwrap_or(false) {
                expired.push(task_id.clone());
            }
        }
        for task_id in expired {
            tasks.remove(&task_id);
            debug!(task_id = %task_id, "Garbage-collected finished task");
        }
    }

    /// Periodic GC driver for the gateway.
    pub fn spawn_gc(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let period = Duration::from_secs(self.config.runner.grace_secs.clamp(1, 60));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                registry.gc_tick().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventFeed;
    use async_trait::async_trait;
    use overseer_core::{ActionDescriptor, Event, Verdict, VerdictKind};
    use overseer_verifier::{Audit, AuditContext};
    use std::collections::VecDeque;

    /// Replays a fixed sequence of audits, then passes everything.
    struct StaticAuditor {
        scripted: Mutex<VecDeque<Audit>>,
    }

    impl StaticAuditor {
        fn passing() -> Arc<Self> {
            Arc::new(Self {
                scripted: Mutex::new(VecDeque::new()),
            })
        }

        fn with_audits(audits: Vec<Audit>) -> Arc<Self> {
            Arc::new(Self {
                scripted: Mutex::new(audits.into()),
            })
        }
    }

    #[async_trait]
    impl Auditor for StaticAuditor {
        async fn verify(&self, _ctx: &AuditContext) -> Audit {
            self.scripted
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Audit::Verdict(Verdict::new(VerdictKind::Pass, 0.9, "ok")))
        }
    }

    /// Tags each verdict with the audited content, to check pairing.
    struct EchoAuditor;

    #[async_trait]
    impl Auditor for EchoAuditor {
        async fn verify(&self, ctx: &AuditContext) -> Audit {
            Audit::Verdict(Verdict::new(VerdictKind::Pass, 0.9, &ctx.content))
        }
    }

    fn beats(script: &[(&str, &str, &str)]) -> Vec<(String, String, String)> {
        script
            .iter()
            .map(|(s, r, c)| (s.to_string(), r.to_string(), c.to_string()))
            .collect()
    }

    fn spec(user: &str, task_id: Option<&str>, auto_apply: bool) -> TaskSpec {
        TaskSpec {
            task: "research rate limiting".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            verifier_api_key: None,
            max_participants: 3,
            auto_apply,
            user_id: user.to_string(),
            task_id: task_id.map(|s| s.to_string()),
        }
    }

    fn registry() -> Arc<RunnerRegistry> {
        let mut config = Config::default();
        config.runner.grace_secs = 0;
        let store = CredentialStore::new(None).unwrap();
        Arc::new(RunnerRegistry::new(config, store))
    }

    async fn next_event(feed: &mut EventFeed) -> Event {
        tokio::time::timeout(Duration::from_secs(5), feed.next())
            .await
            .expect("timed out waiting for event")
            .expect("bus closed early")
    }

    /// Read events until one matches; returns everything read including it.
    async fn read_until(feed: &mut EventFeed, pred: impl Fn(&Event) -> bool) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let event = next_event(feed).await;
            let done = pred(&event);
            events.push(event);
            if done {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn credential_marker_pauses_then_resumes_on_put() {
        let registry = registry();
        let engine = Box::new(ScriptedTeam::with_script(
            "t",
            beats(&[(
                "Researcher",
                "Planner",
                "I need search access. REQUEST_API_KEY: serpapi",
            )]),
        ));
        let started = registry
            .start_with(spec("u1", None, false), engine, StaticAuditor::passing())
            .await
            .unwrap();

        let runner = registry.get(&started.task_id).await.unwrap();
        let mut feed = runner.bus().subscribe().await.unwrap();

        let events = read_until(&mut feed, |e| matches!(e, Event::CredentialRequest(_))).await;
        let Some(Event::CredentialRequest(req)) = events.last() else {
            panic!("expected a credential request");
        };
        assert_eq!(req.provider, "serpapi");
        assert_eq!(req.task_id, started.task_id);

        // The pause notice follows the request; after it the task is parked.
        read_until(&mut feed, |e| {
            matches!(e, Event::Info(n) if n.msg.contains("paused"))
        })
        .await;
        assert_eq!(runner.status().await, TaskStatus::Paused);

        // Supplying the credential under a differently-spelled provider
        // name resolves the same key and resumes the task.
        registry.store().put("u1", "SerpAPI", "k").await.unwrap();

        let events = read_until(&mut feed, |e| matches!(e, Event::Finished(_))).await;
        assert!(events.iter().any(|e| matches!(
            e,
            Event::ActionResult(r) if r.detail.contains("Credential provided for serpapi")
        )));
        assert_eq!(runner.status().await, TaskStatus::Finished);
    }

    #[tokio::test]
    async fn verdicts_attach_to_their_messages_in_order() {
        let registry = registry();
        let engine = Box::new(ScriptedTeam::with_script(
            "t",
            beats(&[
                ("A", "B", "first step"),
                ("B", "A", "second step"),
                ("A", "User", "third step"),
            ]),
        ));
        let started = registry
            .start_with(spec("u1", None, false), engine, Arc::new(EchoAuditor))
            .await
            .unwrap();

        let runner = registry.get(&started.task_id).await.unwrap();
        let mut feed = runner.bus().subscribe().await.unwrap();
        let events = read_until(&mut feed, |e| matches!(e, Event::Finished(_))).await;

        let mut pairs = Vec::new();
        let mut last_message = None;
        for event in &events {
            match event {
                Event::AgentMessage(m) => last_message = Some(m.content.clone()),
                Event::VerifierResult(v) => {
                    pairs.push((last_message.clone().unwrap(), v.reason.clone()))
                }
                _ => {}
            }
        }

        assert_eq!(pairs.len(), 3);
        for (message, reason) in pairs {
            assert_eq!(message, reason);
        }
    }

    #[tokio::test]
    async fn pairing_holds_across_concurrent_tasks() {
        let registry = registry();

        let mut started_tasks = Vec::new();
        for t in 0..3 {
            let script: Vec<(String, String, String)> = (0..4)
                .map(|i| {
                    (
                        "A".to_string(),
                        "B".to_string(),
                        format!("task {} message {}", t, i),
                    )
                })
                .collect();
            let engine = Box::new(ScriptedTeam::with_script("t", script));
            let started = registry
                .start_with(spec("u1", None, false), engine, Arc::new(EchoAuditor))
                .await
                .unwrap();
            started_tasks.push(started.task_id);
        }

        for task_id in started_tasks {
            let runner = registry.get(&task_id).await.unwrap();
            let mut feed = runner.bus().subscribe().await.unwrap();
            let events = read_until(&mut feed, |e| matches!(e, Event::Finished(_))).await;

            let mut last_message = None;
            let mut verdicts = 0;
            for event in &events {
                match event {
                    Event::AgentMessage(m) => last_message = Some(m.content.clone()),
                    Event::VerifierResult(v) => {
                        assert_eq!(last_message.as_deref(), Some(v.reason.as_str()));
                        verdicts += 1;
                    }
                    _ => {}
                }
            }
            assert_eq!(verdicts, 4);
        }
    }

    #[tokio::test]
    async fn duplicate_start_of_live_task_is_rejected() {
        let registry = registry();
        let marker_script = beats(&[("R", "P", "REQUEST_API_KEY: github")]);

        let engine = Box::new(ScriptedTeam::with_script("t", marker_script.clone()));
        registry
            .start_with(spec("u1", Some("fixed-id"), false), engine, StaticAuditor::passing())
            .await
            .unwrap();

        let runner = registry.get("fixed-id").await.unwrap();
        let mut feed = runner.bus().subscribe().await.unwrap();
        read_until(&mut feed, |e| {
            matches!(e, Event::Info(n) if n.msg.contains("paused"))
        })
        .await;
        assert_eq!(runner.status().await, TaskStatus::Paused);

        // Second start under the same id: rejected, state untouched.
        let engine = Box::new(ScriptedTeam::with_script("t", marker_script.clone()));
        let err = registry
            .start_with(spec("u1", Some("fixed-id"), false), engine, StaticAuditor::passing())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TaskActive(_)));
        assert_eq!(runner.status().await, TaskStatus::Paused);

        // Resolve and finish; a terminal id may be reused.
        registry.store().put("u1", "github", "tok").await.unwrap();
        read_until(&mut feed, |e| matches!(e, Event::Finished(_))).await;

        let engine = Box::new(ScriptedTeam::with_script("t", marker_script));
        registry.store().put("u1", "github", "tok").await.unwrap();
        assert!(registry
            .start_with(spec("u1", Some("fixed-id"), false), engine, StaticAuditor::passing())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn fail_verdict_without_auto_apply_parks_the_action() {
        let registry = registry();
        let mut fail = Verdict::new(VerdictKind::Fail, 0.9, "no sources");
        fail.suggested_actions = vec![ActionDescriptor::parse("request_references")];

        let engine = Box::new(ScriptedTeam::with_script(
            "t",
            beats(&[
                ("A", "B", "claim without sources"),
                ("B", "A", "REQUEST_API_KEY: serpapi"),
            ]),
        ));
        let started = registry
            .start_with(
                spec("u1", None, false),
                engine,
                StaticAuditor::with_audits(vec![Audit::Verdict(fail)]),
            )
            .await
            .unwrap();

        let runner = registry.get(&started.task_id).await.unwrap();
        let mut feed = runner.bus().subscribe().await.unwrap();

        // Park on the second message's credential request; by then the
        // fail verdict has been processed and nothing was auto-applied.
        let events = read_until(&mut feed, |e| matches!(e, Event::CredentialRequest(_))).await;
        assert!(!events.iter().any(|e| matches!(e, Event::ActionResult(_))));

        let pending = runner.pending_action_ids().await;
        assert_eq!(pending.len(), 1);

        // Manual approval applies it and reports the outcome.
        runner.approve_action(&pending[0], true).await;
        read_until(&mut feed, |e| {
            matches!(e, Event::ActionResult(r) if r.detail.contains("request_references"))
        })
        .await;

        registry.store().put("u1", "serpapi", "k").await.unwrap();
        read_until(&mut feed, |e| matches!(e, Event::Finished(_))).await;
    }

    #[tokio::test]
    async fn auto_apply_runs_suggested_actions() {
        let registry = registry();
        let mut fail = Verdict::new(VerdictKind::Fail, 0.8, "needs a helper");
        fail.suggested_actions = vec![ActionDescriptor::parse("add_agent:Helper:extra hands")];

        let engine = Box::new(ScriptedTeam::with_script(
            "t",
            beats(&[("A", "B", "struggling alone")]),
        ));
        let started = registry
            .start_with(
                spec("u1", None, true),
                engine,
                StaticAuditor::with_audits(vec![Audit::Verdict(fail)]),
            )
            .await
            .unwrap();

        let runner = registry.get(&started.task_id).await.unwrap();
        let mut feed = runner.bus().subscribe().await.unwrap();
        let events = read_until(&mut feed, |e| matches!(e, Event::Finished(_))).await;

        assert!(events.iter().any(|e| matches!(
            e,
            Event::ActionResult(r) if r.detail == "Added participant Helper"
        )));
    }

    #[tokio::test]
    async fn stop_interrupts_a_parked_credential_wait() {
        let registry = registry();
        let engine = Box::new(ScriptedTeam::with_script(
            "t",
            beats(&[("R", "P", "NEED_API_KEY: github")]),
        ));
        let started = registry
            .start_with(spec("u1", None, false), engine, StaticAuditor::passing())
            .await
            .unwrap();

        let runner = registry.get(&started.task_id).await.unwrap();
        let mut feed = runner.bus().subscribe().await.unwrap();
        read_until(&mut feed, |e| {
            matches!(e, Event::Info(n) if n.msg.contains("paused"))
        })
        .await;

        registry.stop(&started.task_id).await.unwrap();
        let events = read_until(&mut feed, |e| matches!(e, Event::Error(_))).await;
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Error(n) if n.msg.contains("stop request")
        )));
        assert_eq!(runner.status().await, TaskStatus::Error);
    }

    #[tokio::test]
    async fn credential_wait_timeout_fails_the_task() {
        let mut config = Config::default();
        config.credentials.wait_timeout_secs = 0;
        config.runner.grace_secs = 0;
        let store = CredentialStore::new(None).unwrap();
        let registry = Arc::new(RunnerRegistry::new(config, store));

        let engine = Box::new(ScriptedTeam::with_script(
            "t",
            beats(&[("R", "P", "REQUEST_API_KEY: github")]),
        ));
        let started = registry
            .start_with(spec("u1", None, false), engine, StaticAuditor::passing())
            .await
            .unwrap();

        let runner = registry.get(&started.task_id).await.unwrap();
        let mut feed = runner.bus().subscribe().await.unwrap();
        read_until(&mut feed, |e| {
            matches!(e, Event::Error(n) if n.msg.contains("credential"))
        })
        .await;
        assert_eq!(runner.status().await, TaskStatus::Error);
    }

    #[tokio::test]
    async fn gc_drops_terminal_tasks_without_observers() {
        let registry = registry();
        let engine = Box::new(ScriptedTeam::with_script("t", beats(&[("A", "B", "only")])));
        let started = registry
            .start_with(spec("u1", None, false), engine, StaticAuditor::passing())
            .await
            .unwrap();

        let runner = registry.get(&started.task_id).await.unwrap();
        // Never subscribe; poll until the task settles.
        for _ in 0..100 {
            if runner.status().await.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(runner.status().await, TaskStatus::Finished);

        registry.gc_tick().await;
        assert!(registry.get(&started.task_id).await.is_none());

        // A live task is untouched by GC.
        let engine = Box::new(ScriptedTeam::with_script(
            "t",
            beats(&[("R", "P", "REQUEST_API_KEY: github")]),
        ));
        let started = registry
            .start_with(spec("u1", None, false), engine, StaticAuditor::passing())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.gc_tick().await;
        assert!(registry.get(&started.task_id).await.is_some());
        registry.stop(&started.task_id).await.unwrap();
    }

    #[tokio::test]
    async fn summary_counts_by_status() {
        let registry = registry();
        let engine = Box::new(ScriptedTeam::with_script(
            "t",
            beats(&[("R", "P", "REQUEST_API_KEY: github")]),
        ));
        let started = registry
            .start_with(spec("u1", None, false), engine, StaticAuditor::passing())
            .await
            .unwrap();

        let runner = registry.get(&started.task_id).await.unwrap();
        for _ in 0..100 {
            if runner.status().await == TaskStatus::Paused {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let summary = registry.summary().await;
        assert_eq!(summary.paused, 1);
        assert_eq!(summary.finished, 0);
        registry.stop(&started.task_id).await.unwrap();
    }
}
