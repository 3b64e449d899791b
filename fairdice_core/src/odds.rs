use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FairnessError, Result};
use crate::rng::Roll;

/// House edge in percent applied when a caller does not pick one.
pub const DEFAULT_HOUSE_EDGE: f64 = 1.0;

pub const MIN_TARGET: u32 = 1; // 0.01
pub const MAX_TARGET: u32 = 9_999; // 99.99

/// Threshold a roll is compared against, in hundredths within `[0.01, 99.99]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Target(u32);

impl Target {
    pub fn from_hundredths(hundredths: u32) -> Result<Self> {
        if !(MIN_TARGET..=MAX_TARGET).contains(&hundredths) {
            return Err(FairnessError::invalid(format!(
                "target {}.{:02} is outside [0.01, 99.99]",
                hundredths / 100,
                hundredths % 100
            )));
        }
        Ok(Target(hundredths))
    }

    pub fn hundredths(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl TryFrom<f64> for Target {
    type Error = FairnessError;

    fn try_from(value: f64) -> Result<Self> {
        if !value.is_finite() || value <= 0.0 || value >= 100.0 {
            return Err(FairnessError::invalid(format!(
                "target {value} is outside [0.01, 99.99]"
            )));
        }
        Target::from_hundredths((value * 100.0).round() as u32)
    }
}

impl From<Target> for f64 {
    fn from(target: Target) -> f64 {
        target.as_f64()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Over,
    Under,
}

impl Condition {
    pub fn as_str(self) -> &'static str {
        match self {
            Condition::Over => "over",
            Condition::Under => "under",
        }
    }

    /// Strict comparison; a roll equal to the target always loses.
    pub fn wins(self, roll: Roll, target: Target) -> bool {
        match self {
            Condition::Under => roll.hundredths() < target.hundredths(),
            Condition::Over => roll.hundredths() > target.hundredths(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = FairnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "over" => Ok(Condition::Over),
            "under" => Ok(Condition::Under),
            other => Err(FairnessError::invalid(format!(
                "condition must be `over` or `under`, got `{other}`"
            ))),
        }
    }
}

/// Win probability in percent for `condition` against `target`.
pub fn win_chance(target: Target, condition: Condition) -> f64 {
    let hundredths = match condition {
        Condition::Under => target.hundredths(),
        Condition::Over => crate::rng::ROLL_SCALE - target.hundredths(),
    };
    f64::from(hundredths) / 100.0
}

pub fn validate_house_edge(house_edge: f64) -> Result<f64> {
    if !house_edge.is_finite() || !(0.0..100.0).contains(&house_edge) {
        return Err(FairnessError::invalid(format!(
            "house edge {house_edge} must be within [0, 100)"
        )));
    }
    Ok(house_edge)
}

pub fn validate_wager(wager: f64) -> Result<f64> {
    if !wager.is_finite() || wager <= 0.0 {
        return Err(FairnessError::invalid(format!("wager {wager} must be positive")));
    }
    Ok(wager)
}

/// `(100 - edge) / win_chance`, rounded to four decimals.
pub fn multiplier(win_chance: f64, house_edge: f64) -> Result<f64> {
    let house_edge = validate_house_edge(house_edge)?;
    if !win_chance.is_finite() || win_chance < 0.01 {
        return Err(FairnessError::invalid(format!(
            "win chance {win_chance} must be at least 0.01"
        )));
    }
    Ok(round_to((100.0 - house_edge) / win_chance, 4))
}

pub fn payout(wager: f64, multiplier: f64, won: bool) -> f64 {
    if won {
        round_to(wager * multiplier, 2)
    } else {
        0.0
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Game parameters captured with each outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiceParams {
    pub target: Target,
    pub condition: Condition,
    pub house_edge: f64,
}

impl DiceParams {
    pub fn new(target: f64, condition: Condition, house_edge: f64) -> Result<Self> {
        let params = Self {
            target: Target::try_from(target)?,
            condition,
            house_edge,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn with_default_edge(target: f64, condition: Condition) -> Result<Self> {
        Self::new(target, condition, DEFAULT_HOUSE_EDGE)
    }

    pub fn validate(&self) -> Result<()> {
        validate_house_edge(self.house_edge)?;
        Target::from_hundredths(self.target.hundredths())?;
        Ok(())
    }

    pub fn win_chance(&self) -> f64 {
        win_chance(self.target, self.condition)
    }

    pub fn multiplier(&self) -> Result<f64> {
        multiplier(self.win_chance(), self.house_edge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_under_with_default_edge() {
        let params = DiceParams::with_default_edge(50.0, Condition::Under).unwrap();
        assert_eq!(params.win_chance(), 50.0);
        assert_eq!(params.multiplier().unwrap(), 1.98);
    }

    #[test]
    fn test_over_uses_complement() {
        let params = DiceParams::with_default_edge(75.5, Condition::Over).unwrap();
        assert_eq!(params.win_chance(), 24.5);
        assert_eq!(params.multiplier().unwrap(), 4.0408);
    }

    #[test]
    fn test_extreme_targets() {
        let low = DiceParams::with_default_edge(0.01, Condition::Under).unwrap();
        assert_eq!(low.multiplier().unwrap(), 9900.0);
        let high = DiceParams::with_default_edge(99.99, Condition::Over).unwrap();
        assert_eq!(high.multiplier().unwrap(), 9900.0);
    }

    #[test]
    fn test_target_bounds_rejected() {
        for bad in [0.0, 0.004, 100.0, 99.996, -3.0, f64::NAN] {
            assert!(Target::try_from(bad).is_err(), "{bad} accepted");
        }
        assert!(Target::from_hundredths(0).is_err());
        assert!(Target::from_hundredths(10_000).is_err());
    }

    #[test]
    fn test_edge_and_wager_validation() {
        assert!(DiceParams::new(50.0, Condition::Under, 100.0).is_err());
        assert!(DiceParams::new(50.0, Condition::Under, -1.0).is_err());
        assert!(validate_wager(0.0).is_err());
        assert!(validate_wager(f64::INFINITY).is_err());
        assert_eq!(validate_wager(2.5).unwrap(), 2.5);
    }

    #[test]
    fn test_condition_is_strict() {
        let target = Target::from_hundredths(5000).unwrap();
        let at = Roll::from_hundredths(5000).unwrap();
        assert!(!Condition::Under.wins(at, target));
        assert!(!Condition::Over.wins(at, target));
        assert!(Condition::Under.wins(Roll::from_hundredths(4999).unwrap(), target));
        assert!(Condition::Over.wins(Roll::from_hundredths(5001).unwrap(), target));
    }

    #[test]
    fn test_payout_rounding() {
        assert_eq!(payout(10.0, 1.98, true), 19.8);
        assert_eq!(payout(0.333, 3.0, true), 1.0);
        assert_eq!(payout(10.0, 1.98, false), 0.0);
    }
}
