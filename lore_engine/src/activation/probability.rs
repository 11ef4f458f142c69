//! Random draws for probability gating.

use rand::Rng;

/// Source of uniform draws in `[0, 100)`.
pub trait ProbabilitySource: Send + Sync {
    fn roll(&self) -> f64;
}

/// Thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomProbability;

impl ProbabilitySource for RandomProbability {
    fn roll(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..100.0)
    }
}

/// Always returns the same draw.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbability(pub f64);

impl ProbabilitySource for FixedProbability {
    fn roll(&self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_range() {
        let source = RandomProbability;
        for _ in 0..1000 {
            let roll = source.roll();
            assert!((0.0..100.0).contains(&roll));
        }
    }

    #[test]
    fn test_fixed() {
        assert_eq!(FixedProbability(42.5).roll(), 42.5);
    }
}
