//! Block reward calculation
//!
//! The base reward halves every halving interval and is permanently zero
//! once the halving count reaches the maximum.

/// Reward for a block at `height` under a halving schedule.
///
/// This is a pure, deterministic function.
pub fn reward_at(height: u64, base: u64, interval: u64, max_halvings: u64) -> u64 {
    if interval == 0 {
        return base;
    }
    let halvings = height / interval;
    if halvings >= max_halvings || halvings >= u64::BITS as u64 {
        return 0;
    }
    base >> halvings
}

/// Total minted by blocks `0..=height` under a halving schedule
pub fn issued_through(height: u64, base: u64, interval: u64, max_halvings: u64) -> u64 {
    if interval == 0 {
        return base.saturating_mul(height.saturating_add(1));
    }
    let mut total: u64 = 0;
    let mut start: u64 = 0;
    while start <= height {
        let reward = reward_at(start, base, interval, max_halvings);
        if reward == 0 {
            break;
        }
        let epoch_end = (start / interval + 1).saturating_mul(interval) - 1;
        let last = epoch_end.min(height);
        total = total.saturating_add(reward.saturating_mul(last - start + 1));
        if last == u64::MAX {
            break;
        }
        start = last + 1;
    }
    total
}
