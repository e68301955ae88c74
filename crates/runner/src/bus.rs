use overseer_core::Event;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Result of a non-blocking drain step. "Nothing buffered right now" and
/// "the task ended and the buffer is spent" are different conditions; a
/// drain loop backs off on the first and exits on the second.
#[derive(Debug)]
pub enum Drained {
    Event(Event),
    Empty,
    Closed,
}

/// Per-task ordered event channel between one producing task runner and at
/// most one live observer. Bounded: a slow or absent observer costs
/// dropped events, never a blocked conversation. Holds no history once
/// delivered.
pub struct EventBus {
    task_id: String,
    tx: Mutex<Option<mpsc::Sender<Event>>>,
    rx: Mutex<Option<mpsc::Receiver<Event>>>,
}

impl EventBus {
    pub fn new(task_id: &str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            task_id: task_id.to_string(),
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Enqueue an event. Overflow and post-close publishes drop the event
    /// visibly in the log; neither blocks the caller.
    pub async fn publish(&self, event: Event) {
        let guard = self.tx.lock().await;
        let Some(tx) = guard.as_ref() else {
            debug!(task_id = %self.task_id, kind = event.kind(), "Bus closed, dropping event");
            return;
        };
        if let Err(e) = tx.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(event) => {
                    warn!(
                        task_id = %self.task_id,
                        kind = event.kind(),
                        "Event buffer full, dropping event"
                    );
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!(task_id = %self.task_id, "Event channel gone");
                }
            }
        }
    }

    /// Stop accepting events. Once the observer drains what is buffered,
    /// the feed reports `Closed` instead of `Empty`.
    pub async fn close(&self) {
        self.tx.lock().await.take();
    }

    /// Hand the stream to an observer. Exactly one may hold it; a second
    /// subscription gets `None` until the first is released.
    pub async fn subscribe(&self) -> Option<EventFeed> {
        self.rx.lock().await.take().map(|rx| EventFeed { rx })
    }

    /// Return the stream after a disconnect so a later observer resumes
    /// the buffered sequence.
    pub async fn release(&self, feed: EventFeed) {
        *self.rx.lock().await = Some(feed.rx);
    }

    /// Whether an observer currently holds the stream.
    pub async fn has_observer(&self) -> bool {
        self.rx.lock().await.is_none()
    }
}

/// The observer's end of the bus.
pub struct EventFeed {
    rx: mpsc::Receiver<Event>,
}

impl EventFeed {
    /// Await the next event; `None` once the task ended and the buffer is
    /// drained.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking drain step with the empty/closed distinction intact.
    pub fn try_next(&mut self) -> Drained {
        match self.rx.try_recv() {
            Ok(event) => Drained::Event(event),
            Err(mpsc::error::TryRecvError::Empty) => Drained::Empty,
            Err(mpsc::error::TryRecvError::Disconnected) => Drained::Closed,
        }
    }
}
