use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiceType {
    #[serde(rename = "d4")]
    D4,
    #[serde(rename = "d6")]
    D6,
    #[serde(rename = "d8")]
    D8,
    #[serde(rename = "d10")]
    D10,
    #[serde(rename = "d12")]
    D12,
    #[serde(rename = "d20")]
    D20,
    #[serde(rename = "d100")]
    D100,
}

impl DiceType {
    pub const ALL: [DiceType; 7] = [
        DiceType::D4,
        DiceType::D6,
        DiceType::D8,
        DiceType::D10,
        DiceType::D12,
        DiceType::D20,
        DiceType::D100,
    ];

    pub fn sides(self) -> u32 {
        match self {
            DiceType::D4 => 4,
            DiceType::D6 => 6,
            DiceType::D8 => 8,
            DiceType::D10 => 10,
            DiceType::D12 => 12,
            DiceType::D20 => 20,
            DiceType::D100 => 100,
        }
    }

    /// Uniform draw from `1..=sides`
    pub fn roll<R: Rng + ?Sized>(self, rng: &mut R) -> u32 {
        rng.gen_range(1..=self.sides())
    }

    pub fn accepts(self, value: u32) -> bool {
        (1..=self.sides()).contains(&value)
    }
}

impl fmt::Display for DiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.sides())
    }
}

impl FromStr for DiceType {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let sides = value
            .trim()
            .strip_prefix(['d', 'D'])
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| SyncError::MalformedPayload(format!("invalid dice type: {value}")))?;
        DiceType::ALL
            .into_iter()
            .find(|dice| dice.sides() == sides)
            .ok_or_else(|| SyncError::MalformedPayload(format!("unsupported die: d{sides}")))
    }
}
