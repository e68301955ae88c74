use std::sync::Arc;

use async_trait::async_trait;
use overseer_core::{AgentMessage, Result};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// One captured message plus its ack slot. The producer awaits the ack
/// before emitting the next message, so the conversation stays suspended
/// for as long as the orchestrator holds the ack, credential pauses
/// included. Completing the ack is the one-shot resume signal.
pub type Delivery = (AgentMessage, oneshot::Sender<()>);

/// Where interception strategies deliver captured messages.
pub type Sink = mpsc::Sender<Delivery>;

/// Team mutations the auditor may request. Engines expose this as a
/// cloneable handle usable while the conversation is running.
#[async_trait]
pub trait TeamController: Send + Sync {
    async fn add_participant(&self, role: &str, instructions: &str) -> Result<()>;
    async fn remove_participant(&self, name: &str) -> Result<()>;
    async fn patch_instructions(&self, patch: &str) -> Result<()>;
}

/// The boundary to whatever actually runs the conversation. Different
/// engine builds expose different interception mechanisms; every probe may
/// decline, and the capture chain tries them in priority order.
///
/// `run` drives the conversation to its natural conclusion. An `Err` from
/// `run` is an engine failure, which the task surfaces as fatal.
#[async_trait]
pub trait ConversationEngine: Send {
    fn name(&self) -> &str;

    /// Highest priority: a per-participant reply hook delivering each
    /// message synchronously with its ack slot.
    fn install_reply_hook(&mut self, sink: Sink) -> bool {
        let _ = sink;
        false
    }

    /// Second priority: a team-manager-level callback, same delivery shape.
    fn install_manager_callback(&mut self, sink: Sink) -> bool {
        let _ = sink;
        false
    }

    /// Third priority: a stream of engine log lines, one message each.
    fn take_log_stream(&mut self) -> Option<mpsc::Receiver<String>> {
        None
    }

    /// Last resort: raw output text that needs heuristic transcript
    /// parsing before it becomes messages.
    fn take_output_stream(&mut self) -> Option<mpsc::Receiver<String>> {
        None
    }

    fn controller(&self) -> Arc<dyn TeamController>;

    async fn run(&mut self, cancel: CancellationToken) -> Result<()>;
}

/// Send one message through a sink and wait for the orchestrator to ack
/// it. Returns `false` once the consuming side is gone.
pub async fn deliver(sink: &Sink, message: AgentMessage) -> bool {
    let (ack_tx, ack_rx) = oneshot::channel();
    if sink.send((message, ack_tx)).await.is_err() {
        return false;
    }
    ack_rx.await.is_ok()
}
