// =============================================================================
// Event Codec — Inbound tagged union and outbound event shapes
// =============================================================================
//
// Inbound envelope on the wire:
//
//   { "type": "<event type>", "ts": "<RFC 3339, optional>", "payload": { ... } }
//
// Decoding is a two-step affair: the envelope is parsed first, then the
// payload is decoded according to `type` into one closed `InboundEvent`
// variant and validated. Anything that fails either step is rejected with an
// `EventError` and never reaches the orchestrator.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decision::SelectionDecision;
use crate::errors::EventError;
use crate::guard::VariantPermissions;
use crate::metrics::MetricsSnapshot;
use crate::orchestrator::BanditStateSnapshot;
use crate::types::{GuardMode, Regime, Variant};

// ── Event type names ─────────────────────────────────────────────────────────
pub const STRATEGY_CATALOG: &str = "strategy.catalog";
pub const POLICY_SNAPSHOT: &str = "policy.snapshot";
pub const REGIME_SNAPSHOT: &str = "regime.snapshot";
pub const FEEDBACK_RAW: &str = "vivo.feedback.raw";
pub const INCIDENT_OPEN: &str = "risk.incident.open";
pub const INCIDENT_UPDATE: &str = "risk.incident.update";
pub const GUARD_DIRECTIVE: &str = "guard.directive";
pub const INTENT_REQUEST: &str = "execution.intent.request";

// =============================================================================
// Inbound payloads
// =============================================================================

fn default_risk_class() -> String {
    "unknown".to_string()
}

fn default_traffic_cap_pct() -> f64 {
    100.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogArm {
    pub name: String,
    pub variant: Variant,
    #[serde(default)]
    pub formation_tag: Option<String>,
    pub timeframes: Vec<String>,
    #[serde(default)]
    pub fits: Vec<Regime>,
    #[serde(default = "default_risk_class")]
    pub risk_class: String,
    #[serde(default)]
    pub min_samples_to_unlock: u64,
    #[serde(default = "default_traffic_cap_pct")]
    pub traffic_cap_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogPayload {
    pub arms: Vec<CatalogArm>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicyBody {
    #[serde(default)]
    pub variants: VariantPermissions,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicySnapshotPayload {
    pub version: u64,
    pub policy: PolicyBody,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegimeSnapshotPayload {
    pub symbol: String,
    pub timeframe: String,
    pub regime: Regime,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackScope {
    pub symbol: String,
    pub timeframe: String,
    pub variant: Variant,
    #[serde(default)]
    pub formation_tag: Option<String>,
    /// Narrows matching to a single strategy when present.
    #[serde(default)]
    pub strategy: Option<String>,
}

/// Upstream sends the hit either as a boolean or as 0/1.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum HitValue {
    Flag(bool),
    Value(f64),
}

impl HitValue {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Flag(true) => 1.0,
            Self::Flag(false) => 0.0,
            Self::Value(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackKpis {
    pub hit: HitValue,
    #[serde(default)]
    pub profit_factor: Option<f64>,
    pub r_multiple: f64,
    #[serde(default)]
    pub slippage_bps: Option<f64>,
    #[serde(default)]
    pub fees: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct FeedbackSamples {
    #[serde(default)]
    pub fills: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackPayload {
    /// Upstream id used to drop redelivered feedback.
    #[serde(default)]
    pub feedback_id: Option<String>,
    pub scope: FeedbackScope,
    pub kpis: FeedbackKpis,
    #[serde(default)]
    pub samples: FeedbackSamples,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct IncidentScope {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub variant: Option<Variant>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IncidentPayload {
    #[serde(rename = "type")]
    pub incident_type: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub scope: IncidentScope,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardDirectivePayload {
    pub mode: GuardMode,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct IntentContext {
    #[serde(default)]
    pub regime: Option<Regime>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentAudit {
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IntentRequestPayload {
    pub symbol: String,
    pub timeframe: String,
    #[serde(default)]
    pub context: IntentContext,
    pub audit: IntentAudit,
}

// =============================================================================
// InboundEvent
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentPhase {
    Open,
    Update,
}

/// Every event shape the orchestrator consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Catalog(CatalogPayload),
    PolicySnapshot(PolicySnapshotPayload),
    RegimeSnapshot(RegimeSnapshotPayload),
    Feedback(FeedbackPayload),
    Incident(IncidentPhase, IncidentPayload),
    GuardDirective(GuardDirectivePayload),
    IntentRequest(IntentRequestPayload),
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Catalog(_) => STRATEGY_CATALOG,
            Self::PolicySnapshot(_) => POLICY_SNAPSHOT,
            Self::RegimeSnapshot(_) => REGIME_SNAPSHOT,
            Self::Feedback(_) => FEEDBACK_RAW,
            Self::Incident(IncidentPhase::Open, _) => INCIDENT_OPEN,
            Self::Incident(IncidentPhase::Update, _) => INCIDENT_UPDATE,
            Self::GuardDirective(_) => GUARD_DIRECTIVE,
            Self::IntentRequest(_) => INTENT_REQUEST,
        }
    }

    /// Semantic checks the type system cannot express.
    pub fn validate(&self) -> Result<(), EventError> {
        match self {
            Self::Catalog(p) => {
                for arm in &p.arms {
                    require_non_empty("arms[].name", &arm.name)?;
                    if arm.timeframes.is_empty() || arm.timeframes.iter().any(|t| t.trim().is_empty()) {
                        return Err(EventError::invalid(
                            "arms[].timeframes",
                            format!("arm {} needs at least one non-empty timeframe", arm.name),
                        ));
                    }
                    if !arm.traffic_cap_pct.is_finite() || arm.traffic_cap_pct < 0.0 {
                        return Err(EventError::invalid(
                            "arms[].trafficCapPct",
                            format!("{} is not a valid percentage", arm.traffic_cap_pct),
                        ));
                    }
                }
                Ok(())
            }
            Self::PolicySnapshot(_) => Ok(()),
            Self::RegimeSnapshot(p) => {
                require_non_empty("symbol", &p.symbol)?;
                require_non_empty("timeframe", &p.timeframe)
            }
            Self::Feedback(p) => {
                require_non_empty("scope.symbol", &p.scope.symbol)?;
                require_non_empty("scope.timeframe", &p.scope.timeframe)?;
                let hit = p.kpis.hit.as_f64();
                if hit != 0.0 && hit != 1.0 {
                    return Err(EventError::invalid("kpis.hit", format!("{hit} is not 0 or 1")));
                }
                if !p.kpis.r_multiple.is_finite() {
                    return Err(EventError::invalid("kpis.rMultiple", "must be finite"));
                }
                Ok(())
            }
            Self::Incident(_, p) => require_non_empty("type", &p.incident_type),
            Self::GuardDirective(_) => Ok(()),
            Self::IntentRequest(p) => {
                require_non_empty("symbol", &p.symbol)?;
                require_non_empty("timeframe", &p.timeframe)?;
                require_non_empty("audit.requestId", &p.audit.request_id)?;
                if let Some(c) = p.context.confidence {
                    if !c.is_finite() {
                        return Err(EventError::invalid("context.confidence", "must be finite"));
                    }
                }
                Ok(())
            }
        }
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), EventError> {
    if value.trim().is_empty() {
        Err(EventError::invalid(field, "must not be empty"))
    } else {
        Ok(())
    }
}

// =============================================================================
// Envelope
// =============================================================================

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    ts: Option<DateTime<Utc>>,
    #[serde(default)]
    payload: Value,
}

/// A decoded, validated inbound event plus its optional event time.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub ts: Option<DateTime<Utc>>,
    pub event: InboundEvent,
}

impl EventEnvelope {
    pub fn decode_str(raw: &str) -> Result<Self, EventError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::decode(value)
    }

    pub fn decode(raw: Value) -> Result<Self, EventError> {
        let env: RawEnvelope = serde_json::from_value(raw)?;
        let payload = env.payload;

        let event = match env.kind.as_str() {
            STRATEGY_CATALOG => InboundEvent::Catalog(serde_json::from_value(payload)?),
            POLICY_SNAPSHOT => InboundEvent::PolicySnapshot(serde_json::from_value(payload)?),
            REGIME_SNAPSHOT => InboundEvent::RegimeSnapshot(serde_json::from_value(payload)?),
            FEEDBACK_RAW => InboundEvent::Feedback(serde_json::from_value(payload)?),
            INCIDENT_OPEN => InboundEvent::Incident(IncidentPhase::Open, serde_json::from_value(payload)?),
            INCIDENT_UPDATE => InboundEvent::Incident(IncidentPhase::Update, serde_json::from_value(payload)?),
            GUARD_DIRECTIVE => InboundEvent::GuardDirective(serde_json::from_value(payload)?),
            INTENT_REQUEST => InboundEvent::IntentRequest(serde_json::from_value(payload)?),
            other => return Err(EventError::UnknownEventType(other.to_string())),
        };

        event.validate()?;
        Ok(Self { ts: env.ts, event })
    }
}

// =============================================================================
// Outbound events
// =============================================================================

/// Everything the orchestrator publishes: `{ "type": ..., "payload": ... }`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum OutboundEvent {
    #[serde(rename = "strategy.selection.decision")]
    Decision(SelectionDecision),
    #[serde(rename = "strategy.bandit.state")]
    BanditState(BanditStateSnapshot),
    #[serde(rename = "strategy.bandit.metrics")]
    BanditMetrics(MetricsSnapshot),
}

impl OutboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decision(_) => "strategy.selection.decision",
            Self::BanditState(_) => "strategy.bandit.state",
            Self::BanditMetrics(_) => "strategy.bandit.metrics",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_intent_request() {
        let env = EventEnvelope::decode(json!({
            "type": "execution.intent.request",
            "ts": "2025-03-01T12:00:00Z",
            "payload": {
                "symbol": "BTCUSDT",
                "timeframe": "M5",
                "context": { "regime": "trend", "confidence": 0.7 },
                "audit": { "requestId": "req-1" }
            }
        }))
        .unwrap();
        assert!(env.ts.is_some());
        match env.event {
            InboundEvent::IntentRequest(p) => {
                assert_eq!(p.audit.request_id, "req-1");
                assert_eq!(p.context.regime, Some(Regime::Trend));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_catalog_with_defaults() {
        let env = EventEnvelope::decode(json!({
            "type": "strategy.catalog",
            "payload": { "arms": [
                { "name": "momentum_pullback_M5", "variant": "conservative", "timeframes": ["M5"], "fits": ["trend", "breakout"] }
            ]}
        }))
        .unwrap();
        let InboundEvent::Catalog(p) = env.event else { panic!("not a catalog") };
        assert_eq!(p.arms[0].traffic_cap_pct, 100.0);
        assert_eq!(p.arms[0].risk_class, "unknown");
        assert_eq!(p.arms[0].fits, vec![Regime::Trend, Regime::Breakout]);
    }

    #[test]
    fn feedback_hit_accepts_bool_and_number() {
        for hit in [json!(true), json!(1)] {
            let env = EventEnvelope::decode(json!({
                "type": "vivo.feedback.raw",
                "payload": {
                    "scope": { "symbol": "BTCUSDT", "timeframe": "M5", "variant": "base" },
                    "kpis": { "hit": hit, "profitFactor": 1.4, "rMultiple": 1.2, "slippageBps": 2.0, "fees": 0.1 },
                    "samples": { "fills": 1 }
                }
            }))
            .unwrap();
            let InboundEvent::Feedback(p) = env.event else { panic!("not feedback") };
            assert_eq!(p.kpis.hit.as_f64(), 1.0);
        }
    }

    #[test]
    fn feedback_hit_out_of_range_is_invalid() {
        let err = EventEnvelope::decode(json!({
            "type": "vivo.feedback.raw",
            "payload": {
                "scope": { "symbol": "BTCUSDT", "timeframe": "M5", "variant": "base" },
                "kpis": { "hit": 2, "rMultiple": 1.0 }
            }
        }))
        .unwrap_err();
        assert!(matches!(err, EventError::Invalid { field: "kpis.hit", .. }));
    }

    #[test]
    fn fractional_hit_is_invalid() {
        let err = EventEnvelope::decode(json!({
            "type": "vivo.feedback.raw",
            "payload": {
                "scope": { "symbol": "BTCUSDT", "timeframe": "M5", "variant": "base" },
                "kpis": { "hit": 0.4, "rMultiple": 1.0 }
            }
        }))
        .unwrap_err();
        assert!(matches!(err, EventError::Invalid { field: "kpis.hit", .. }));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = EventEnvelope::decode(json!({ "type": "market.tick", "payload": {} })).unwrap_err();
        assert_eq!(err, EventError::UnknownEventType("market.tick".into()));
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let err = EventEnvelope::decode(json!({
            "type": "guard.directive",
            "payload": { "mode": "panic_everything" }
        }))
        .unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));

        assert!(matches!(EventEnvelope::decode_str("{not json"), Err(EventError::Malformed(_))));
    }

    #[test]
    fn empty_request_id_is_invalid() {
        let err = EventEnvelope::decode(json!({
            "type": "execution.intent.request",
            "payload": { "symbol": "BTCUSDT", "timeframe": "M5", "audit": { "requestId": " " } }
        }))
        .unwrap_err();
        assert!(matches!(err, EventError::Invalid { field: "audit.requestId", .. }));
    }

    #[test]
    fn incident_phase_follows_type() {
        let env = EventEnvelope::decode(json!({
            "type": "risk.incident.update",
            "payload": { "type": "series_loss", "severity": "high", "scope": { "variant": "aggressive" } }
        }))
        .unwrap();
        assert_eq!(env.event.kind(), INCIDENT_UPDATE);
        let InboundEvent::Incident(phase, p) = env.event else { panic!("not an incident") };
        assert_eq!(phase, IncidentPhase::Update);
        assert_eq!(p.scope.variant, Some(Variant::Aggressive));
        assert!(p.scope.symbol.is_none());
    }
}
