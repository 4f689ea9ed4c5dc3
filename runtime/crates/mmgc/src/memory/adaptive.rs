//! Adaptive Collection Triggers
//!
//! Two independent heuristics decide when the allocator should collect:
//!
//! - **Unmanaged limit**: memory owned by managed objects but allocated
//!   outside the heap (string payloads, buffers). Exceeding the limit forces
//!   a collection, after which the limit is doubled when usage stays high
//!   and halved when usage drops.
//! - **Slot overallocation**: the event loop starts an incremental cycle
//!   once the block allocators hold far more slots than the last full sweep
//!   left in use.

/// New unmanaged limit for the observed `usage`
///
/// ```text
/// usage >= 3/4 limit  →  max(limit, usage) * 2
/// usage <= 1/4 limit  →  max(min_limit, limit / 2)
/// otherwise           →  limit
/// ```
pub fn adjust_unmanaged_limit(limit: usize, usage: usize, min_limit: usize) -> usize {
    if 4 * usage as u128 >= 3 * limit as u128 {
        limit.max(usage).saturating_mul(2)
    } else if 4 * usage as u128 <= limit as u128 {
        min_limit.max(limit / 2)
    } else {
        limit
    }
}

/// Whether the block allocators have grown enough to warrant a cycle
pub fn should_run_gc(
    total_slots: usize,
    used_slots_after_last_full_sweep: usize,
    min_slots: usize,
    overallocation_percent: usize,
) -> bool {
    total_slots > min_slots
        && used_slots_after_last_full_sweep.saturating_mul(overallocation_percent) / 100
            < total_slots
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: usize = 128 * 1024;

    #[test]
    fn test_limit_grows_under_pressure() {
        assert_eq!(adjust_unmanaged_limit(MIN, 200_000, MIN), 400_000);
        assert_eq!(adjust_unmanaged_limit(MIN, 100_000, MIN), MIN * 2);
    }

    #[test]
    fn test_limit_shrinks_but_not_below_min() {
        assert_eq!(adjust_unmanaged_limit(1_000_000, 1000, MIN), 500_000);
        assert_eq!(adjust_unmanaged_limit(MIN, 0, MIN), MIN);
    }

    #[test]
    fn test_limit_kept_in_band() {
        assert_eq!(adjust_unmanaged_limit(1_000_000, 500_000, MIN), 1_000_000);
    }

    #[test]
    fn test_limit_boundaries() {
        // exactly 3/4 grows, exactly 1/4 shrinks
        assert_eq!(adjust_unmanaged_limit(400_000, 300_000, MIN), 800_000);
        assert_eq!(adjust_unmanaged_limit(400_000, 100_000, MIN), 200_000);
    }

    #[test]
    fn test_should_run_gc() {
        let min = 2048 * 16;
        assert!(!should_run_gc(min, 0, min, 200));
        assert!(should_run_gc(min + 1, 0, min, 200));
        // 200%: used 1000 of 4000 total → 2000 < 4000
        assert!(should_run_gc(min * 2, 1000, min, 200));
        // used more than half of the total
        assert!(!should_run_gc(min * 2, min + 1, min, 200));
    }
}
