//! Impact weights and severity bands

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Severity weight of a control, in `[0, 1]`.
///
/// Stored in thousandths so that summing impacts is exact and independent of
/// the order controls finish in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Impact(u16);

impl Impact {
    const SCALE: f64 = 1000.0;

    /// Create an impact from a float in `[0, 1]`
    pub fn new(value: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::InvalidImpact { value });
        }
        Ok(Self((value * Self::SCALE).round() as u16))
    }

    /// Impact from thousandths, clamped to 1000
    pub const fn from_millis(millis: u16) -> Self {
        if millis > 1000 {
            Self(1000)
        } else {
            Self(millis)
        }
    }

    /// Impact in thousandths
    pub fn millis(&self) -> u32 {
        u32::from(self.0)
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.0) / Self::SCALE
    }

    /// Convert a sum of thousandths back to a score
    pub fn score_from_millis(millis: u64) -> f64 {
        millis as f64 / Self::SCALE
    }
}

impl TryFrom<f64> for Impact {
    type Error = String;

    fn try_from(value: f64) -> std::result::Result<Self, Self::Error> {
        Impact::new(value).map_err(|e| e.to_string())
    }
}

impl From<Impact> for f64 {
    fn from(impact: Impact) -> f64 {
        impact.as_f64()
    }
}

impl std::fmt::Display for Impact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}", self.as_f64())
    }
}

/// Severity band derived from a control's impact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Impact 0, informational
    #[default]
    Info,
    /// Impact below 0.4
    Low,
    /// Impact below 0.7
    Medium,
    /// Impact below 0.9
    High,
    /// Impact 0.9 and above
    Critical,
}

impl Severity {
    /// Band an impact into a severity
    pub fn from_impact(impact: Impact) -> Self {
        match impact.millis() {
            0 => Severity::Info,
            m if m < 400 => Severity::Low,
            m if m < 700 => Severity::Medium,
            m if m < 900 => Severity::High,
            _ => Severity::Critical,
        }
    }

    /// Parse a severity name (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" | "none" => Some(Severity::Info),
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// Get display string
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impact_bounds() {
        assert!(Impact::new(0.0).is_ok());
        assert!(Impact::new(1.0).is_ok());
        assert!(Impact::new(1.01).is_err());
        assert!(Impact::new(-0.1).is_err());
        assert!(Impact::new(f64::NAN).is_err());
    }

    #[test]
    fn test_impact_to_severity() {
        let band = |v: f64| Severity::from_impact(Impact::new(v).unwrap());
        assert_eq!(band(0.0), Severity::Info);
        assert_eq!(band(0.3), Severity::Low);
        assert_eq!(band(0.5), Severity::Medium);
        assert_eq!(band(0.7), Severity::High);
        assert_eq!(band(1.0), Severity::Critical);
    }

    #[test]
    fn test_impact_serde() {
        let impact: Impact = serde_json::from_str("0.7").unwrap();
        assert_eq!(impact.millis(), 700);
        assert_eq!(serde_json::to_string(&impact).unwrap(), "0.7");
        assert!(serde_json::from_str::<Impact>("1.5").is_err());
    }
}
