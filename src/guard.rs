// =============================================================================
// Guard & Policy State — Process-wide safety context
// =============================================================================
//
// Guard state is a single value replaced wholesale by every directive. Once
// its expiry passes it reads as `normal` without anyone having to clear it.
//
// Of the externally merged policy snapshot only the version and the variant
// permissions are retained.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{GuardMode, Variant};

// =============================================================================
// GuardState
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardState {
    pub mode: GuardMode,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GuardState {
    pub fn new(mode: GuardMode, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { mode, expires_at }
    }

    /// Mode in force at `now`; an expired directive is `normal`.
    pub fn effective_mode(&self, now: DateTime<Utc>) -> GuardMode {
        match self.expires_at {
            Some(expiry) if expiry <= now => GuardMode::Normal,
            _ => self.mode,
        }
    }
}

// =============================================================================
// PolicyState
// =============================================================================

/// Which variants the latest policy snapshot permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantPermissions {
    #[serde(default = "allowed")]
    pub base: bool,
    #[serde(default = "allowed")]
    pub aggressive: bool,
    #[serde(default = "allowed")]
    pub conservative: bool,
}

fn allowed() -> bool {
    true
}

impl VariantPermissions {
    pub fn permits(&self, variant: Variant) -> bool {
        match variant {
            Variant::Base => self.base,
            Variant::Aggressive => self.aggressive,
            Variant::Conservative => self.conservative,
        }
    }
}

impl Default for VariantPermissions {
    fn default() -> Self {
        Self {
            base: true,
            aggressive: true,
            conservative: true,
        }
    }
}

/// Retained subset of the last policy snapshot. Version 0 means none seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PolicyState {
    pub version: u64,
    pub variants: VariantPermissions,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn guard_without_expiry_never_lapses() {
        let g = GuardState::new(GuardMode::HaltEntry, None);
        assert_eq!(g.effective_mode(Utc::now() + Duration::days(365)), GuardMode::HaltEntry);
    }

    #[test]
    fn expired_guard_reads_normal() {
        let t = Utc::now();
        let g = GuardState::new(GuardMode::BlockAggressive, Some(t + Duration::hours(1)));
        assert_eq!(g.effective_mode(t), GuardMode::BlockAggressive);
        assert_eq!(g.effective_mode(t + Duration::minutes(59)), GuardMode::BlockAggressive);
        assert_eq!(g.effective_mode(t + Duration::hours(1)), GuardMode::Normal);
    }

    #[test]
    fn permissions_default_to_allowed() {
        let p: VariantPermissions = serde_json::from_str(r#"{ "aggressive": false }"#).unwrap();
        assert!(p.permits(Variant::Base));
        assert!(!p.permits(Variant::Aggressive));
        assert!(p.permits(Variant::Conservative));
    }
}
