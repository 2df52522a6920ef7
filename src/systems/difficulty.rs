//! Depth-based difficulty scaling

/// Per-level stat growth
pub const GROWTH_PER_LEVEL: f64 = 1.12;
/// Scaling stops growing past this depth
pub const MAX_SCALING_LEVEL: u32 = 30;

/// Stat multiplier for a dungeon level
pub fn multiplier(level: u32) -> f64 {
    if level <= 1 {
        return 1.0;
    }
    GROWTH_PER_LEVEL.powi(level.min(MAX_SCALING_LEVEL) as i32 - 1)
}

/// Scale a base enemy stat (HP, attack, defense, speed) for a level
pub fn scale_stat(base: i32, level: u32) -> i32 {
    if level <= 1 {
        return base;
    }
    (base as f64 * multiplier(level)).round() as i32
}

/// Percent chance an enemy drops a consumable
pub fn loot_drop_rate(level: u32) -> u32 {
    (10 + 5 * level).min(60)
}

/// Percent chance an enemy drops equipment
pub fn equipment_drop_rate(level: u32) -> u32 {
    (10 + 2 * level).min(50)
}

/// Enemies spawned on a fresh level
pub fn enemy_count(base: usize, level: u32) -> usize {
    let extra = (level.saturating_sub(1) / 2) as usize;
    (base + extra).min(base * 3)
}

/// Experience for a kill at a given depth
pub fn xp_reward(base: i64, level: u32) -> i64 {
    (base as f64 * multiplier(level)).round() as i64
}

pub fn depth_display(level: u32, feet_per_level: u32) -> String {
    format!("Depth: -{} ft", level * feet_per_level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_scaling_values() {
        assert_eq!(scale_stat(30, 1), 30);
        assert_eq!(scale_stat(30, 2), 34);
        assert_eq!(scale_stat(100, 30), scale_stat(100, 45));
    }

    #[test]
    fn test_drop_rates_cap() {
        assert_eq!(loot_drop_rate(1), 15);
        assert_eq!(loot_drop_rate(20), 60);
        assert_eq!(equipment_drop_rate(1), 12);
        assert_eq!(equipment_drop_rate(40), 50);
    }

    #[test]
    fn test_depth_display() {
        assert_eq!(depth_display(3, 30), "Depth: -90 ft");
    }

    proptest! {
        #[test]
        fn test_scaling_monotonic(base in 1i32..500, level in 1u32..40) {
            prop_assert!(scale_stat(base, level + 1) >= scale_stat(base, level));
        }
    }
}
