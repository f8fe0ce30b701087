/*!
C2 — a uniform [0, 1) source, used by the eviction size pass (spec §4.2)
to sample candidate rows without ordering the whole table.
*/

use parking_lot::Mutex;
use rand::Rng;

/// A source of uniform randomness in `[0, 1)`.
pub trait RandomSource: Send + Sync {
    fn uniform(&self) -> f64;
}

/// Thread-local `rand` RNG, reseeded per-thread by the `rand` crate itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn uniform(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..1.0)
    }
}

/// A deterministic sequence of values, cycling once exhausted. Used in tests
/// that need reproducible eviction sampling.
#[derive(Debug)]
pub struct FixedRandom {
    values: Vec<f64>,
    cursor: Mutex<usize>,
}

impl FixedRandom {
    pub fn new(values: Vec<f64>) -> Self {
        assert!(!values.is_empty(), "FixedRandom needs at least one value");
        FixedRandom {
            values,
            cursor: Mutex::new(0),
        }
    }
}

impl RandomSource for FixedRandom {
    fn uniform(&self) -> f64 {
        let mut cursor = self.cursor.lock();
        let v = self.values[*cursor % self.values.len()];
        *cursor += 1;
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_random_cycles() {
        let r = FixedRandom::new(vec![0.1, 0.9]);
        assert_eq!(r.uniform(), 0.1);
        assert_eq!(r.uniform(), 0.9);
        assert_eq!(r.uniform(), 0.1);
    }

    #[test]
    fn thread_random_stays_in_bounds() {
        let r = ThreadRandom;
        for _ in 0..100 {
            let v = r.uniform();
            assert!((0.0..1.0).contains(&v));
        }
    }
}
