// =============================================================================
// Shared types used across the arm orchestrator
// =============================================================================

use serde::{Deserialize, Serialize};

/// Risk posture of an arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Base,
    Aggressive,
    Conservative,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Base, Variant::Aggressive, Variant::Conservative];
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Base => write!(f, "base"),
            Self::Aggressive => write!(f, "aggressive"),
            Self::Conservative => write!(f, "conservative"),
        }
    }
}

/// Externally classified market condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    #[serde(rename = "trend")]
    Trend,
    #[serde(rename = "range")]
    Range,
    #[serde(rename = "breakout")]
    Breakout,
    #[serde(rename = "highVol")]
    HighVol,
    #[serde(rename = "illiquid")]
    Illiquid,
}

impl Default for Regime {
    fn default() -> Self {
        Self::Range
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trend => write!(f, "trend"),
            Self::Range => write!(f, "range"),
            Self::Breakout => write!(f, "breakout"),
            Self::HighVol => write!(f, "highVol"),
            Self::Illiquid => write!(f, "illiquid"),
        }
    }
}

/// Process-wide operational safety mode set by guard directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardMode {
    Normal,
    Slowdown,
    BlockAggressive,
    HaltEntry,
    Degraded,
    StreamsPanic,
}

impl GuardMode {
    /// Modes that stop every entry before eligibility is even evaluated.
    pub fn halts_entry(self) -> bool {
        matches!(self, Self::HaltEntry | Self::StreamsPanic)
    }

    /// Modes that on their own exclude the aggressive variant.
    pub fn blocks_aggressive(self) -> bool {
        matches!(
            self,
            Self::BlockAggressive | Self::HaltEntry | Self::StreamsPanic
        )
    }
}

impl Default for GuardMode {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for GuardMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Slowdown => write!(f, "slowdown"),
            Self::BlockAggressive => write!(f, "block_aggressive"),
            Self::HaltEntry => write!(f, "halt_entry"),
            Self::Degraded => write!(f, "degraded"),
            Self::StreamsPanic => write!(f, "streams_panic"),
        }
    }
}

/// Classification carried by every emitted decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    Explore,
    Exploit,
    Blocked,
    SafeFallback,
}

impl std::fmt::Display for DecisionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explore => write!(f, "explore"),
            Self::Exploit => write!(f, "exploit"),
            Self::Blocked => write!(f, "blocked"),
            Self::SafeFallback => write!(f, "safe_fallback"),
        }
    }
}

/// Identity of one arm: strategy, variant, optional formation tag, timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmKey {
    pub strategy: String,
    pub variant: Variant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formation_tag: Option<String>,
    pub timeframe: String,
}

impl ArmKey {
    pub fn new(
        strategy: impl Into<String>,
        variant: Variant,
        formation_tag: Option<String>,
        timeframe: impl Into<String>,
    ) -> Self {
        Self {
            strategy: strategy.into(),
            variant,
            formation_tag,
            timeframe: timeframe.into(),
        }
    }
}

impl std::fmt::Display for ArmKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.formation_tag {
            Some(tag) => write!(f, "{}/{}#{}@{}", self.strategy, self.variant, tag, self.timeframe),
            None => write!(f, "{}/{}@{}", self.strategy, self.variant, self.timeframe),
        }
    }
}
