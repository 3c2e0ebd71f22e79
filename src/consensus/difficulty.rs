//! Difficulty retargeting
//!
//! Difficulty is a leading-zero-bit count `d`, whose target is `2^(256-d)`.
//! Every `adjustment_interval` blocks the target is scaled by how far the
//! actual block time drifted from the expected one, limited to a factor of
//! four in either direction.

use crate::config::ChainPolicy;

/// Smallest allowed target
pub const MIN_TARGET: f64 = 1.0;

/// Maximum adjustment factor per retarget in either direction
pub const MAX_ADJUSTMENT_FACTOR: f64 = 4.0;

/// Largest allowed target (difficulty 0)
pub fn max_target() -> f64 {
    2f64.powi(256)
}

/// Target for a difficulty in bits
pub fn target_from_difficulty(difficulty: u32) -> f64 {
    2f64.powi(256 - difficulty.min(256) as i32)
}

/// Compact encoding of a target, rounded to whole bits
pub fn difficulty_from_target(target: f64) -> u32 {
    let target = target.clamp(MIN_TARGET, max_target());
    (256.0 - target.log2()).round().clamp(0.0, 256.0) as u32
}

/// Ratio of actual to expected elapsed time, clamped to `[1/4, 4]`
pub fn adjustment_factor(actual_secs: u64, policy: &ChainPolicy) -> f64 {
    let expected = policy.adjustment_interval as f64 * policy.block_time_secs as f64;
    if expected <= 0.0 {
        return 1.0;
    }
    (actual_secs as f64 / expected).clamp(1.0 / MAX_ADJUSTMENT_FACTOR, MAX_ADJUSTMENT_FACTOR)
}

/// Target following `current` after `actual_secs` elapsed over one interval
pub fn next_target(current: f64, actual_secs: u64, policy: &ChainPolicy) -> f64 {
    (current * adjustment_factor(actual_secs, policy)).clamp(MIN_TARGET, max_target())
}

/// Difficulty following `current` after `actual_secs` elapsed over one interval
pub fn retarget(current: u32, actual_secs: u64, policy: &ChainPolicy) -> u32 {
    difficulty_from_target(next_target(
        target_from_difficulty(current),
        actual_secs,
        policy,
    ))
}
