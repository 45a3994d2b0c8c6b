//! Counter advance rules applied between pipeline runs.
//!
//! `advance` is deterministic for every mode except [`CounterMode::Randomize`],
//! whose draws are observable. Call it once per advance request and keep the
//! result.

use rand::Rng;
use shared::domain::{CounterMode, CounterRange, COUNTER_MAX};

/// Exclusive upper bound for unbounded `randomize` draws.
pub const RANDOM_UPPER_BOUND: u32 = 1_000_000;

pub fn advance(mode: CounterMode, current: u32) -> u32 {
    match mode {
        CounterMode::Fixed => current,
        CounterMode::Increment => current.saturating_add(1).min(COUNTER_MAX),
        CounterMode::Decrement => current.saturating_sub(1),
        CounterMode::Randomize => rand::rng().random_range(0..RANDOM_UPPER_BOUND),
    }
}

/// Wrap-around variant used by index style nodes: stepping past either end
/// of `range` lands on the opposite end instead of saturating.
pub fn advance_within(mode: CounterMode, current: u32, range: CounterRange) -> u32 {
    match mode {
        CounterMode::Fixed => range.clamp(current),
        CounterMode::Increment => {
            if current >= range.max() {
                range.min()
            } else {
                range.clamp(current + 1)
            }
        }
        CounterMode::Decrement => {
            if current <= range.min() {
                range.max()
            } else {
                range.clamp(current - 1)
            }
        }
        CounterMode::Randomize => rand::rng().random_range(range.min()..=range.max()),
    }
}

/// Dispatches to [`advance_within`] when a range is configured.
pub fn advance_with(mode: CounterMode, current: u32, range: Option<CounterRange>) -> u32 {
    match range {
        Some(range) => advance_within(mode, current, range),
        None => advance(mode, current),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
