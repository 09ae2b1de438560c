use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use parley_core::SessionId;
use parley_messenger::InboundMessage;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::runtime::{ConversationRuntime, TurnOutcome};

struct QueuedTurn {
    message: InboundMessage,
    done: oneshot::Sender<TurnOutcome>,
}

/// Handle for one submitted message. Dropping it does not cancel the turn.
pub struct TurnTicket {
    pub session_id: SessionId,
    outcome: oneshot::Receiver<TurnOutcome>,
}

impl TurnTicket {
    /// Waits for the turn to finish. `None` only if the worker went away.
    pub async fn outcome(self) -> Option<TurnOutcome> {
        self.outcome.await.ok()
    }
}

/// Arrival-order front of the runtime: one worker task per session drains an
/// unbounded channel, so turns for a session run in the order `submit` saw
/// them while different sessions proceed independently.
pub struct TurnQueue {
    runtime: Arc<ConversationRuntime>,
    workers: Mutex<HashMap<SessionId, mpsc::UnboundedSender<QueuedTurn>>>,
}

impl TurnQueue {
    pub fn new(runtime: Arc<ConversationRuntime>) -> Self {
        Self { runtime, workers: Mutex::new(HashMap::new()) }
    }

    pub fn runtime(&self) -> &Arc<ConversationRuntime> {
        &self.runtime
    }

    /// Must be called from within a tokio runtime; the first message for a
    /// session spawns its worker.
    pub fn submit(&self, message: InboundMessage) -> TurnTicket {
        let session_id = self.runtime.sessions().resolve_or_create(&message.sender_id);
        let (done, outcome) = oneshot::channel();
        let mut turn = QueuedTurn { message, done };

        let mut workers = self.lock();
        if let Some(sender) = workers.get(&session_id) {
            match sender.send(turn) {
                Ok(()) => return TurnTicket { session_id, outcome },
                Err(mpsc::error::SendError(returned)) => {
                    warn!(
                        event_name = "conversation.worker_restarted",
                        session_id = %session_id,
                        "session worker was gone; starting a new one"
                    );
                    turn = returned;
                }
            }
        }

        let sender = self.spawn_worker(session_id.clone());
        if let Err(mpsc::error::SendError(lost)) = sender.send(turn) {
            warn!(
                event_name = "conversation.turn_dropped",
                session_id = %session_id,
                correlation_id = %lost.message.correlation_id(),
                "fresh session worker refused the turn"
            );
        }
        workers.insert(session_id.clone(), sender);

        TurnTicket { session_id, outcome }
    }

    pub fn active_workers(&self) -> usize {
        self.lock().len()
    }

    fn spawn_worker(&self, session_id: SessionId) -> mpsc::UnboundedSender<QueuedTurn> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<QueuedTurn>();
        let runtime = self.runtime.clone();

        debug!(
            event_name = "conversation.worker_started",
            session_id = %session_id,
            "session worker started"
        );
        tokio::spawn(async move {
            while let Some(turn) = receiver.recv().await {
                let outcome = runtime.run_turn(&session_id, turn.message).await;
                let _ = turn.done.send(outcome);
            }
        });

        sender
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, mpsc::UnboundedSender<QueuedTurn>>> {
        match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
