//! Difficulty adjustment algorithm
//!
//! Difficulty is retargeted once per window of blocks. The measured span of
//! the window is clamped to [75%, 125%] of the expected span, so a single
//! retarget moves difficulty by at most 4/3 up or 4/5 down.

use super::ChainParams;

/// Numerator/denominator of the lower clamp on the measured window span
const MIN_SPAN_RATIO: (u64, u64) = (3, 4);

/// Numerator/denominator of the upper clamp on the measured window span
const MAX_SPAN_RATIO: (u64, u64) = (5, 4);

/// Calculate the difficulty after a retarget boundary.
///
/// This is a pure function with no side effects.
///
/// # Arguments
/// * `current_difficulty` - Difficulty in force before the boundary
/// * `first_block_time` - Timestamp of the block one window below the boundary
/// * `last_block_time` - Timestamp of the boundary block
pub fn calculate_next_difficulty(
    current_difficulty: u64,
    first_block_time: u64,
    last_block_time: u64,
    params: &ChainParams,
) -> u64 {
    let expected = params.expected_window_time().max(1) as u128;
    let actual = last_block_time.saturating_sub(first_block_time) as u128;

    let lower = expected * MIN_SPAN_RATIO.0 as u128 / MIN_SPAN_RATIO.1 as u128;
    let upper = expected * MAX_SPAN_RATIO.0 as u128 / MAX_SPAN_RATIO.1 as u128;
    let actual = actual.clamp(lower.max(1), upper.max(1));

    let scaled = current_difficulty as u128 * expected / actual;
    let scaled = scaled.min(u64::MAX as u128) as u64;

    scaled.max(params.min_difficulty)
}

/// Check if difficulty is retargeted after the block at this height
pub fn should_adjust_difficulty(height: u64, window: u64) -> bool {
    window > 0 && height >= window && height % window == 0
}

/// Height of the block whose timestamp opens the window ending at `height`
pub fn get_period_start_height(height: u64, window: u64) -> u64 {
    height.saturating_sub(window)
}

/// Median of a set of block timestamps, lower middle for even counts.
/// Sorts the slice in place.
pub fn median_timestamp(timestamps: &mut [u64]) -> Option<u64> {
    if timestamps.is_empty() {
        return None;
    }
    timestamps.sort_unstable();
    Some(timestamps[(timestamps.len() - 1) / 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_adjust_difficulty() {
        assert!(!should_adjust_difficulty(0, 720));
        assert!(!should_adjust_difficulty(1, 720));
        assert!(!should_adjust_difficulty(719, 720));
        assert!(should_adjust_difficulty(720, 720));
        assert!(!should_adjust_difficulty(721, 720));
        assert!(should_adjust_difficulty(1440, 720));
        assert!(!should_adjust_difficulty(10, 0));
    }

    #[test]
    fn test_get_period_start_height() {
        assert_eq!(get_period_start_height(720, 720), 0);
        assert_eq!(get_period_start_height(1440, 720), 720);
        assert_eq!(get_period_start_height(5, 720), 0);
    }

    #[test]
    fn test_median_timestamp() {
        assert_eq!(median_timestamp(&mut [0u64; 0]), None);
        assert_eq!(median_timestamp(&mut [5]), Some(5));
        assert_eq!(median_timestamp(&mut [30, 10, 20]), Some(20));
        assert_eq!(median_timestamp(&mut [40, 10, 30, 20]), Some(20));
    }

    #[test]
    fn test_on_target_keeps_difficulty() {
        let params = ChainParams::mainnet();
        let span = params.expected_window_time();
        assert_eq!(calculate_next_difficulty(1_000_000, 0, span, &params), 1_000_000);
    }

    #[test]
    fn test_double_speed_clamped_to_four_thirds() {
        let params = ChainParams::mainnet();
        let span = params.expected_window_time() / 2;
        let next = calculate_next_difficulty(3_000_000, 1_000, 1_000 + span, &params);
        assert_eq!(next, 4_000_000);
    }

    #[test]
    fn test_half_speed_clamped_to_four_fifths() {
        let params = ChainParams::mainnet();
        let span = params.expected_window_time() * 2;
        let next = calculate_next_difficulty(5_000_000, 0, span, &params);
        assert_eq!(next, 4_000_000);
    }

    #[test]
    fn test_backwards_timestamps_treated_as_fastest() {
        let params = ChainParams::mainnet();
        let next = calculate_next_difficulty(3_000, 10_000, 5_000, &params);
        assert_eq!(next, 4_000);
    }

    #[test]
    fn test_floor_at_min_difficulty() {
        let params = ChainParams::mainnet();
        let span = params.expected_window_time() * 10;
        assert_eq!(calculate_next_difficulty(1, 0, span, &params), params.min_difficulty);
    }

    #[test]
    fn test_saturates_at_u64_max() {
        let params = ChainParams::mainnet();
        assert_eq!(calculate_next_difficulty(u64::MAX, 0, 0, &params), u64::MAX);
    }
}
