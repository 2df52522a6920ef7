//! Dice and random rolls

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Seedable random source shared by game systems
#[derive(Debug, Clone)]
pub struct DiceRoller {
    rng: ChaCha8Rng,
}

impl DiceRoller {
    pub fn new() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Roll `count` dice with `sides` faces and sum them
    pub fn roll(&mut self, count: u32, sides: u32) -> i32 {
        if sides == 0 {
            return 0;
        }
        (0..count)
            .map(|_| self.rng.gen_range(1..=sides) as i32)
            .sum()
    }

    pub fn d20(&mut self) -> i32 {
        self.roll(1, 20)
    }

    /// Inclusive integer range; returns `lo` when the range is empty
    pub fn range(&mut self, lo: i32, hi: i32) -> i32 {
        if hi <= lo {
            return lo;
        }
        self.rng.gen_range(lo..=hi)
    }

    /// Uniform float in [0, 1)
    pub fn float(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform float in [lo, hi]
    pub fn float_range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + self.float() * (hi - lo)
    }

    /// True with probability `p` (clamped to [0, 1])
    pub fn chance(&mut self, p: f64) -> bool {
        self.float() < p.clamp(0.0, 1.0)
    }

    /// True with probability `percent`/100
    pub fn percent(&mut self, percent: u32) -> bool {
        self.rng.gen_range(0..100) < percent
    }

    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            None
        } else {
            Some(&items[self.rng.gen_range(0..items.len())])
        }
    }

    pub fn next_seed(&mut self) -> u64 {
        self.rng.gen()
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }
}

impl Default for DiceRoller {
    fn default() -> Self {
        Self::new()
    }
}
