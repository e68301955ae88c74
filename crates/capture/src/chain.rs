use std::collections::HashSet;

use overseer_core::{AgentMessage, Error, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::engine::{deliver, ConversationEngine, Delivery};
use crate::transcript::TranscriptParser;

/// Which interception mechanism actually attached, in fixed priority
/// order. Exactly one is used per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStrategy {
    ReplyHook,
    ManagerCallback,
    LogStream,
    OutputStream,
}

impl std::fmt::Display for CaptureStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureStrategy::ReplyHook => write!(f, "reply_hook"),
            CaptureStrategy::ManagerCallback => write!(f, "manager_callback"),
            CaptureStrategy::LogStream => write!(f, "log_stream"),
            CaptureStrategy::OutputStream => write!(f, "output_stream"),
        }
    }
}

/// The normalized, gap-free message stream the orchestrator consumes,
/// with duplicate suppression at the boundary: a (sender, content,
/// timestamp-second) triple that already passed is dropped and its
/// producer released.
#[derive(Debug)]
pub struct CaptureStream {
    rx: mpsc::Receiver<Delivery>,
    seen: HashSet<(String, String, i64)>,
}

impl CaptureStream {
    pub async fn next(&mut self) -> Option<Delivery> {
        while let Some((message, ack)) = self.rx.recv().await {
            let key = (message.sender.clone(), message.content.clone(), message.ts);
            if !self.seen.insert(key) {
                debug!(sender = %message.sender, "Dropping duplicate captured message");
                let _ = ack.send(());
                continue;
            }
            return Some((message, ack));
        }
        None
    }
}

pub struct CaptureChain;

impl CaptureChain {
    /// Try the interception strategies in priority order and bridge the
    /// first one that registers onto a single delivery stream. An engine
    /// that exposes no mechanism at all is a fatal capture fault.
    pub fn attach(
        engine: &mut dyn ConversationEngine,
        buffer: usize,
    ) -> Result<(CaptureStrategy, CaptureStream)> {
        let (tx, rx) = mpsc::channel::<Delivery>(buffer.max(1));

        let strategy = if engine.install_reply_hook(tx.clone()) {
            CaptureStrategy::ReplyHook
        } else if engine.install_manager_callback(tx.clone()) {
            CaptureStrategy::ManagerCallback
        } else if let Some(lines) = engine.take_log_stream() {
            tokio::spawn(pump_log_stream(lines, tx.clone()));
            CaptureStrategy::LogStream
        } else if let Some(lines) = engine.take_output_stream() {
            tokio::spawn(pump_output_stream(lines, tx.clone()));
            CaptureStrategy::OutputStream
        } else {
            return Err(Error::Capture(format!(
                "engine '{}' exposes no interception mechanism",
                engine.name()
            )));
        };

        info!(engine = %engine.name(), strategy = %strategy, "Capture strategy attached");
        Ok((
            strategy,
            CaptureStream {
                rx,
                seen: HashSet::new(),
            },
        ))
    }
}

/// Engine log lines are already one message each; wrap and pace them so
/// ordering and ack semantics match the hook strategies.
async fn pump_log_stream(mut lines: mpsc::Receiver<String>, sink: crate::engine::Sink) {
    while let Some(line) = lines.recv().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message = AgentMessage::new("engine-log", "observer", line);
        if !deliver(&sink, message).await {
            break;
        }
    }
}

/// Raw output text goes through the transcript heuristics first.
async fn pump_output_stream(mut lines: mpsc::Receiver<String>, sink: crate::engine::Sink) {
    let mut parser = TranscriptParser::new();
    while let Some(chunk) = lines.recv().await {
        for line in chunk.lines() {
            if let Some(message) = parser.push_line(line) {
                if !deliver(&sink, message).await {
                    return;
                }
            }
        }
    }
    if let Some(message) = parser.flush() {
        deliver(&sink, message).await;
    }
}
