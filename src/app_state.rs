// =============================================================================
// Central Application State — Arm Orchestrator
// =============================================================================
//
// Read side of the orchestrator, shared across the API handlers, the
// WebSocket feed and the metrics timer via `Arc<AppState>`.
//
// The orchestrator itself is owned by a single task (see `event_loop`);
// everything here is either a channel into that task or a copy it published.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for all published snapshots.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use crate::decision::SelectionDecision;
use crate::event_loop::Command;
use crate::events::{EventEnvelope, OutboundEvent};
use crate::metrics::{DecisionCounters, MetricsSnapshot};
use crate::orchestrator::{BanditStateSnapshot, HandleOutcome};
use crate::runtime_config::OrchestratorConfig;

// =============================================================================
// Rejection Record
// =============================================================================

/// An inbound event refused at the edge.
#[derive(Debug, Clone, Serialize)]
pub struct RejectionRecord {
    pub message: String,
    /// Event type as sent, when it could be read.
    pub event_type: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent rejections to retain.
const MAX_RECENT_REJECTIONS: usize = 50;
/// Maximum number of recent decisions to retain.
const MAX_RECENT_DECISIONS: usize = 100;

pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Incremented on every published change; exposed through health so
    /// pollers can tell when a refetch is due.
    pub state_version: AtomicU64,

    /// WebSocket message sequence number (incremented per message sent).
    pub ws_sequence_number: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: RwLock<OrchestratorConfig>,

    // ── Channels ────────────────────────────────────────────────────────
    /// Ordered mailbox of the orchestrator task.
    pub commands: mpsc::Sender<Command>,
    /// Fan-out of every produced event.
    pub bus: broadcast::Sender<OutboundEvent>,

    // ── Published snapshots ─────────────────────────────────────────────
    pub bandit_state: RwLock<BanditStateSnapshot>,
    pub counters: RwLock<DecisionCounters>,
    pub metrics: RwLock<Option<MetricsSnapshot>>,

    // ── Audit trail ─────────────────────────────────────────────────────
    pub recent_decisions: RwLock<Vec<SelectionDecision>>,
    pub recent_rejections: RwLock<Vec<RejectionRecord>>,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: OrchestratorConfig,
        commands: mpsc::Sender<Command>,
        bus: broadcast::Sender<OutboundEvent>,
    ) -> Self {
        Self {
            state_version: AtomicU64::new(1),
            ws_sequence_number: AtomicU64::new(0),
            runtime_config: RwLock::new(config),
            commands,
            bus,
            bandit_state: RwLock::new(BanditStateSnapshot::empty(Utc::now())),
            counters: RwLock::new(DecisionCounters::default()),
            metrics: RwLock::new(None),
            recent_decisions: RwLock::new(Vec::new()),
            recent_rejections: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Orchestrator mailbox ────────────────────────────────────────────

    /// Queue one event behind every earlier one and wait for its outcome.
    pub async fn submit(&self, envelope: EventEnvelope) -> anyhow::Result<HandleOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command {
                envelope,
                reply: Some(reply),
            })
            .await
            .map_err(|_| anyhow!("orchestrator task is not running"))?;
        outcome.await.context("orchestrator dropped the reply")
    }

    // ── Publishing ──────────────────────────────────────────────────────

    /// Fan out produced events and record decisions in the audit ring.
    pub fn publish(&self, outcome: &HandleOutcome) {
        for event in outcome.events() {
            if let OutboundEvent::Decision(decision) = event {
                self.push_decision(decision.clone());
            }
            if self.bus.send(event.clone()).is_err() {
                debug!(event = event.kind(), "no subscribers for produced event");
            }
        }
    }

    /// Record a decision. The ring is capped at [`MAX_RECENT_DECISIONS`].
    pub fn push_decision(&self, decision: SelectionDecision) {
        let mut decisions = self.recent_decisions.write();
        decisions.push(decision);
        while decisions.len() > MAX_RECENT_DECISIONS {
            decisions.remove(0);
        }
    }

    /// Record a rejected inbound event. The ring is capped at
    /// [`MAX_RECENT_REJECTIONS`].
    pub fn push_rejection(&self, message: String, event_type: Option<String>) {
        let record = RejectionRecord {
            message,
            event_type,
            at: Utc::now().to_rfc3339(),
        };

        let mut rejections = self.recent_rejections.write();
        rejections.push(record);
        while rejections.len() > MAX_RECENT_REJECTIONS {
            rejections.remove(0);
        }

        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Everything `GET /api/v1/state` and the WebSocket feed expose.
    pub fn build_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            bandit: self.bandit_state.read().clone(),
            counters: *self.counters.read(),
            metrics: self.metrics.read().clone(),
            recent_rejections: self.recent_rejections.read().clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub bandit: BanditStateSnapshot,
    pub counters: DecisionCounters,
    pub metrics: Option<MetricsSnapshot>,
    pub recent_rejections: Vec<RejectionRecord>,
}
