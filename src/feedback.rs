// =============================================================================
// Feedback Ingestor — One trade outcome into the matching posteriors
// =============================================================================
//
// A feedback record is scoped by (symbol, timeframe, variant, formationTag)
// and optionally by strategy. Arms carry no symbol, so every arm matching the
// remaining fields receives the outcome. A record that matches nothing is
// logged and dropped.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::arena::arm_store::{ArmStore, TradeOutcome};
use crate::events::FeedbackPayload;
use crate::runtime_config::OrchestratorConfig;
use crate::types::ArmKey;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackOutcome {
    Applied(Vec<ArmKey>),
    UnknownScope,
}

/// Apply one feedback record to every arm in its scope.
pub fn ingest(
    store: &mut ArmStore,
    cfg: &OrchestratorConfig,
    feedback: &FeedbackPayload,
    now: DateTime<Utc>,
) -> FeedbackOutcome {
    let scope = &feedback.scope;
    let keys = store.keys_where(|arm| {
        let key = arm.key();
        key.timeframe == scope.timeframe
            && key.variant == scope.variant
            && key.formation_tag == scope.formation_tag
            && scope.strategy.as_deref().map_or(true, |s| s == key.strategy)
    });

    if keys.is_empty() {
        warn!(
            symbol = %scope.symbol,
            timeframe = %scope.timeframe,
            variant = %scope.variant,
            formation_tag = scope.formation_tag.as_deref().unwrap_or("-"),
            strategy = scope.strategy.as_deref().unwrap_or("*"),
            "feedback for unknown arm dropped"
        );
        return FeedbackOutcome::UnknownScope;
    }

    let outcome = TradeOutcome {
        hit: feedback.kpis.hit.as_f64(),
        r_multiple: feedback.kpis.r_multiple,
    };

    for key in &keys {
        if let Some(arm) = store.apply_feedback(key, outcome, cfg.priors.min_variance, now) {
            debug!(
                arm = %key,
                alpha = arm.hit_rate().alpha,
                beta = arm.hit_rate().beta,
                mu = format!("{:.4}", arm.r_mean().mu),
                sigma = format!("{:.4}", arm.r_mean().sigma),
                samples = arm.samples(),
                fills = feedback.samples.fills,
                "feedback applied"
            );
        }
    }

    FeedbackOutcome::Applied(keys)
}
