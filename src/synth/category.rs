//! Sound categories
//!
//! One tag per synthesis algorithm. Adding a category means adding a
//! generator function and a match arm in the synthesizer that owns it; the
//! mixer and reconciler never look inside.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SoundscapeError;

/// Closed set of procedurally generated sounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundCategory {
    White,
    Pink,
    Brown,
    Rain,
    Thunderstorm,
    Wind,
    Wave,
    Fire,
    Bird,
    Cricket,
    Forest,
    City,
    #[serde(alias = "coffee-shop")]
    Cafe,
    Stream,
}

impl SoundCategory {
    /// Every category, noise colors first
    pub const ALL: [SoundCategory; 14] = [
        SoundCategory::White,
        SoundCategory::Pink,
        SoundCategory::Brown,
        SoundCategory::Rain,
        SoundCategory::Thunderstorm,
        SoundCategory::Wind,
        SoundCategory::Wave,
        SoundCategory::Fire,
        SoundCategory::Bird,
        SoundCategory::Cricket,
        SoundCategory::Forest,
        SoundCategory::City,
        SoundCategory::Cafe,
        SoundCategory::Stream,
    ];

    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            SoundCategory::White => "white",
            SoundCategory::Pink => "pink",
            SoundCategory::Brown => "brown",
            SoundCategory::Rain => "rain",
            SoundCategory::Thunderstorm => "thunderstorm",
            SoundCategory::Wind => "wind",
            SoundCategory::Wave => "wave",
            SoundCategory::Fire => "fire",
            SoundCategory::Bird => "bird",
            SoundCategory::Cricket => "cricket",
            SoundCategory::Forest => "forest",
            SoundCategory::City => "city",
            SoundCategory::Cafe => "cafe",
            SoundCategory::Stream => "stream",
        }
    }

    /// True for the three noise colors handled by `NoiseGenerator`
    pub fn is_noise(&self) -> bool {
        matches!(
            self,
            SoundCategory::White | SoundCategory::Pink | SoundCategory::Brown
        )
    }
}

impl fmt::Display for SoundCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SoundCategory {
    type Err = SoundscapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        if name == "coffee-shop" {
            return Ok(SoundCategory::Cafe);
        }
        SoundCategory::ALL
            .iter()
            .copied()
            .find(|category| category.as_str() == name)
            .ok_or(SoundscapeError::UnknownCategory {
                name: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for category in SoundCategory::ALL {
            assert_eq!(category.as_str().parse::<SoundCategory>().unwrap(), category);
        }
    }

    #[test]
    fn test_coffee_shop_alias() {
        assert_eq!(
            "coffee-shop".parse::<SoundCategory>().unwrap(),
            SoundCategory::Cafe
        );
        let parsed: SoundCategory = serde_json::from_str("\"coffee-shop\"").unwrap();
        assert_eq!(parsed, SoundCategory::Cafe);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"cafe\"");
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let err = "ocean".parse::<SoundCategory>().unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_CATEGORY");
    }

    #[test]
    fn test_noise_split() {
        let noise: Vec<_> = SoundCategory::ALL.iter().filter(|c| c.is_noise()).collect();
        assert_eq!(noise.len(), 3);
        assert!(!SoundCategory::Rain.is_noise());
    }
}
