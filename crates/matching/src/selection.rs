//! Candidate selection among the best-ranked lobbies
//!
//! Picking at random among the top few spreads passengers over nearby
//! lobbies instead of piling everyone onto the closest one.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Chooses one index out of a ranked pool
pub trait SelectionStrategy: Send {
    /// Return an index in `0..pool_len`; `pool_len` is at least 1
    fn choose(&mut self, pool_len: usize) -> usize;
}

/// Uniform choice driven by a seedable RNG
pub struct RandomTopK {
    rng: StdRng,
}

impl RandomTopK {
    /// Deterministic sequence for a given seed
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl SelectionStrategy for RandomTopK {
    fn choose(&mut self, pool_len: usize) -> usize {
        self.rng.gen_range(0..pool_len)
    }
}

/// Always the best-ranked candidate
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstRanked;

impl SelectionStrategy for FirstRanked {
    fn choose(&mut self, _pool_len: usize) -> usize {
        0
    }
}

/// Pick one element among the first `pool_size` of `ranked`
pub fn select_from_top<T>(
    mut ranked: Vec<T>,
    pool_size: usize,
    strategy: &mut dyn SelectionStrategy,
) -> Option<T> {
    let pool_len = ranked.len().min(pool_size.max(1));
    if pool_len == 0 {
        return None;
    }
    let index = strategy.choose(pool_len).min(pool_len - 1);
    Some(ranked.swap_remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_selection_is_deterministic() {
        let picks = |seed| {
            let mut strategy = RandomTopK::seeded(seed);
            (0..20)
                .map(|_| select_from_top(vec![1, 2, 3, 4, 5], 3, &mut strategy).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(picks(42), picks(42));
    }

    #[test]
    fn test_selection_stays_within_pool() {
        let mut strategy = RandomTopK::seeded(7);
        for _ in 0..100 {
            let pick = select_from_top(vec![10, 20, 30, 40], 3, &mut strategy).unwrap();
            assert!([10, 20, 30].contains(&pick));
        }
    }

    #[test]
    fn test_first_ranked_and_empty_pool() {
        assert_eq!(select_from_top(vec![5, 6], 3, &mut FirstRanked), Some(5));
        assert_eq!(select_from_top(Vec::<u8>::new(), 3, &mut FirstRanked), None);
    }
}
