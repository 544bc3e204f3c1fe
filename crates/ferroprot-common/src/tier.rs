//! Tier keys: the integer percentage used to name per-tier artifact directories.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FormatError, Result};

/// `round(tier * 100)`, e.g. tier 0.3 → `30`, stored under `tiers/30/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierKey(pub u32);

impl TierKey {
    pub fn from_tier(tier: f64) -> Result<Self> {
        if !tier.is_finite() || tier < 0.0 {
            return Err(FormatError::Tier(format!("{tier}")));
        }
        Ok(Self((tier * 100.0).round() as u32))
    }

    pub fn dir(&self) -> String {
        format!("tiers/{}", self.0)
    }
}

impl fmt::Display for TierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_key_rounds() {
        assert_eq!(TierKey::from_tier(0.3).unwrap(), TierKey(30));
        assert_eq!(TierKey::from_tier(0.55).unwrap(), TierKey(55));
        assert_eq!(TierKey(70).dir(), "tiers/70");
    }

    #[test]
    fn test_tier_key_rejects_negative() {
        assert!(TierKey::from_tier(-0.1).is_err());
        assert!(TierKey::from_tier(f64::NAN).is_err());
    }
}
