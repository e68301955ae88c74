use std::sync::Arc;

use overseer_core::{Config, Event, Paths, TaskSpec};
use overseer_credentials::CredentialStore;
use overseer_runner::RunnerRegistry;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Run one task in-process and print every event as a JSON line. When the
/// team asks for a credential the terminal becomes the side channel: the
/// value is read from stdin and stored, which resumes the conversation.
pub async fn run(task: String, user: String, auto_apply: bool) -> anyhow::Result<()> {
    if task.trim().is_empty() {
        anyhow::bail!("task description must not be empty");
    }

    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    let store = CredentialStore::new(config.credentials.master_key.as_deref())?;
    let registry = Arc::new(RunnerRegistry::new(config.clone(), store.clone()));

    let spec = TaskSpec {
        task,
        model: config.verifier.model.clone(),
        verifier_api_key: None,
        max_participants: 3,
        auto_apply,
        user_id: user.clone(),
        task_id: None,
    };

    let started = registry.start(spec).await?;
    info!(task_id = %started.task_id, "Task running locally");

    let runner = registry
        .get(&started.task_id)
        .await
        .ok_or_else(|| anyhow::anyhow!("task disappeared before it could be observed"))?;
    let mut feed = runner
        .bus()
        .subscribe()
        .await
        .ok_or_else(|| anyhow::anyhow!("task already has an observer"))?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    while let Some(event) = feed.next().await {
        println!("{}", serde_json::to_string(&event)?);

        if let Event::CredentialRequest(req) = &event {
            eprintln!("credential needed for '{}': paste value and press enter", req.provider);
            if let Ok(Some(line)) = stdin.next_line().await {
                let value = line.trim();
                if !value.is_empty() {
                    store.put(&user, &req.provider, value).await?;
                }
            }
        }
    }

    Ok(())
}
