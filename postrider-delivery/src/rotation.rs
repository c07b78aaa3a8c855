//! Credential rotation strategies.

use std::{fmt, str::FromStr};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the engine picks the next credential at a rotation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Walk the pool in configuration order, skipping cooled credentials.
    RoundRobin,
    /// Uniform random pick among credentials that are not cooling down.
    Random,
    /// Random pick biased towards credentials with a better success rate.
    #[default]
    WeightedRandom,
}

impl RotationStrategy {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
            Self::WeightedRandom => "weighted_random",
        }
    }
}

impl fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RotationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" | "round-robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "weighted_random" | "weighted-random" | "weighted" => Ok(Self::WeightedRandom),
            other => Err(format!(
                "unknown rotation strategy '{other}', expected round_robin, random, or weighted_random"
            )),
        }
    }
}

/// Picks the next pool index.
///
/// `eligible` holds `(index, weight)` pairs for every credential that is
/// not cooling down, in pool order. When the whole pool is cooling the
/// selection degrades to a plain forward step so sending never deadlocks
/// on cooldowns.
pub(crate) fn select_next(
    strategy: RotationStrategy,
    current: usize,
    pool_len: usize,
    eligible: &[(usize, f64)],
    rng: &mut impl Rng,
) -> usize {
    if pool_len == 0 {
        return 0;
    }

    if eligible.is_empty() {
        return (current + 1) % pool_len;
    }

    match strategy {
        RotationStrategy::RoundRobin => eligible
            .iter()
            .map(|&(index, _)| index)
            .find(|&index| index > current)
            .or_else(|| eligible.first().map(|&(index, _)| index))
            .unwrap_or(current),
        RotationStrategy::Random => {
            let (index, _) = eligible[rng.random_range(0..eligible.len())];
            if index == current && eligible.len() > 1 {
                // one resample keeps the pick cheap while usually moving on
                eligible[rng.random_range(0..eligible.len())].0
            } else {
                index
            }
        }
        RotationStrategy::WeightedRandom => {
            let index = weighted_pick(eligible, rng);
            if index == current && eligible.len() > 1 {
                weighted_pick(eligible, rng)
            } else {
                index
            }
        }
    }
}

/// Roulette-wheel selection over success weights.
fn weighted_pick(eligible: &[(usize, f64)], rng: &mut impl Rng) -> usize {
    let total: f64 = eligible.iter().map(|&(_, weight)| weight).sum();
    let mut ball = rng.random_range(0.0..total.max(1.0));

    for &(index, weight) in eligible {
        if ball < weight {
            return index;
        }
        ball -= weight;
    }

    eligible.last().map_or(0, |&(index, _)| index)
}
