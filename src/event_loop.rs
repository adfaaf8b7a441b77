// =============================================================================
// Event Loop — The one task that owns the Orchestrator
// =============================================================================
//
// Every mutating event enters through a single ordered mpsc mailbox and is
// handled to completion before the next one is read. After each event the
// task republishes its read-side snapshots into `AppState`.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::app_state::AppState;
use crate::events::EventEnvelope;
use crate::orchestrator::{HandleOutcome, Orchestrator};

/// Mailbox depth of the orchestrator task.
pub const COMMAND_BUFFER: usize = 1024;

pub struct Command {
    pub envelope: EventEnvelope,
    /// Caller waiting for the outcome, if any.
    pub reply: Option<oneshot::Sender<HandleOutcome>>,
}

pub fn channel() -> (mpsc::Sender<Command>, mpsc::Receiver<Command>) {
    mpsc::channel(COMMAND_BUFFER)
}

/// Drain the mailbox until every sender is gone.
pub async fn run(mut orchestrator: Orchestrator, state: Arc<AppState>, mut commands: mpsc::Receiver<Command>) {
    info!(arms = orchestrator.store().len(), "orchestrator task started");
    if orchestrator.store().is_empty() {
        info!("no arms registered yet, waiting for strategy.catalog");
    }
    republish(&orchestrator, &state);

    while let Some(Command { envelope, reply }) = commands.recv().await {
        let kind = envelope.event.kind();
        let outcome = orchestrator.handle(envelope);

        if let HandleOutcome::Dropped(reason) = &outcome {
            debug!(event = kind, reason = %reason, "event dropped");
        }

        state.publish(&outcome);
        republish(&orchestrator, &state);

        if let Some(reply) = reply {
            // The caller may have gone away; the event is applied regardless.
            let _ = reply.send(outcome);
        }
    }

    info!("orchestrator mailbox closed, task exiting");
}

fn republish(orchestrator: &Orchestrator, state: &AppState) {
    *state.bandit_state.write() = orchestrator.state_snapshot(Utc::now());
    *state.counters.write() = orchestrator.counters();
    state.increment_version();
}
