//! Random number generators and distributions for the random opcode family.
//!
//! DECLARE_RNG seeds a generator into one of [`MAX_RNGS`] slots;
//! DECLARE_RANDOM_DIST binds a distribution over one of those generators into
//! one of [`MAX_RANDOM_DISTS`] slots; GET_RANDOM_NUMBER draws from a
//! distribution into a register.
//!
//! Generators are `StdRng` seeded with [`SeedableRng::seed_from_u64`], so the
//! same spec with the same seeds produces a byte-identical memory image on
//! every run of the same build.

use rand::{distributions::Uniform, prelude::Distribution, rngs::StdRng, SeedableRng};
use rand_distr::{Exp, Normal};

use crate::{
    constants::{MAX_RANDOM_DISTS, MAX_RNGS},
    Result,
};

/// A declared distribution, bound to the RNG slot it draws from.
#[derive(Debug, Clone)]
pub struct RandomDistribution {
    rng_id: u8,
    kind: DistributionKind,
}

/// The distribution shapes a spec can declare.
#[derive(Debug, Clone)]
pub enum DistributionKind {
    /// Integers uniform over an inclusive range.
    Uniform(Uniform<i32>),
    /// Gaussian, rounded to the nearest integer when drawn.
    Normal(Normal<f32>),
    /// Exponential, rounded to the nearest integer when drawn.
    Exponential(Exp<f32>),
}

impl RandomDistribution {
    /// Build a distribution from its wire encoding: a kind code and two
    /// parameter words.
    ///
    /// Kind 0 is uniform (params: i32 min, i32 max inclusive), 1 is normal
    /// (params: f32 mean, f32 standard deviation as bit patterns), 2 is
    /// exponential (params: f32 lambda, reserved word).
    ///
    /// # Errors
    /// Returns a format error for an unknown kind code or parameters the
    /// distribution rejects.
    pub fn from_encoding(rng_id: u8, kind: u8, param0: u32, param1: u32) -> Result<Self> {
        let kind = match kind {
            0 => {
                let min = param0 as i32;
                let max = param1 as i32;
                if min > max {
                    return Err(malformed_error!(
                        "uniform distribution with min {} > max {}",
                        min,
                        max
                    ));
                }
                DistributionKind::Uniform(Uniform::new_inclusive(min, max))
            }
            1 => {
                let mean = f32::from_bits(param0);
                let std_dev = f32::from_bits(param1);
                let normal = Normal::new(mean, std_dev).map_err(|_| {
                    malformed_error!("normal distribution with standard deviation {}", std_dev)
                })?;
                DistributionKind::Normal(normal)
            }
            2 => {
                let lambda = f32::from_bits(param0);
                let exp = Exp::new(lambda).map_err(|_| {
                    malformed_error!("exponential distribution with lambda {}", lambda)
                })?;
                DistributionKind::Exponential(exp)
            }
            other => {
                return Err(malformed_error!("unknown distribution kind {}", other));
            }
        };

        Ok(RandomDistribution { rng_id, kind })
    }

    /// The RNG slot this distribution draws from.
    #[must_use]
    pub fn rng_id(&self) -> u8 {
        self.rng_id
    }

    /// Draw one value, widened to a register.
    pub fn sample(&self, rng: &mut StdRng) -> i64 {
        match &self.kind {
            DistributionKind::Uniform(uniform) => i64::from(uniform.sample(rng)),
            DistributionKind::Normal(normal) => normal.sample(rng).round() as i64,
            DistributionKind::Exponential(exp) => exp.sample(rng).round() as i64,
        }
    }
}

/// Fixed tables for the random opcode family.
#[derive(Debug, Default)]
pub struct RandomTable {
    rngs: [Option<StdRng>; MAX_RNGS],
    distributions: [Option<RandomDistribution>; MAX_RANDOM_DISTS],
}

impl RandomTable {
    /// Empty tables.
    #[must_use]
    pub fn new() -> Self {
        RandomTable::default()
    }

    /// Seed a generator into slot `id`.
    ///
    /// # Errors
    /// Returns a format error if the slot is already declared.
    pub fn declare_rng(&mut self, id: u8, seed: u32) -> Result<()> {
        let slot = &mut self.rngs[id as usize];
        if slot.is_some() {
            return Err(malformed_error!("rng {} is already declared", id));
        }

        *slot = Some(StdRng::seed_from_u64(u64::from(seed)));
        Ok(())
    }

    /// Store a distribution into slot `id`, validating its RNG binding.
    ///
    /// # Errors
    /// Returns a format error if the slot is already declared and
    /// [`crate::Error::NoSuchRng`] if the bound RNG was never seeded.
    pub fn declare_distribution(&mut self, id: u8, dist: RandomDistribution) -> Result<()> {
        if self.rngs[dist.rng_id() as usize].is_none() {
            return Err(crate::Error::NoSuchRng(dist.rng_id()));
        }
        let slot = &mut self.distributions[id as usize];
        if slot.is_some() {
            return Err(malformed_error!("distribution {} is already declared", id));
        }

        *slot = Some(dist);
        Ok(())
    }

    /// Draw from the distribution in slot `id`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NoSuchDistribution`] or
    /// [`crate::Error::NoSuchRng`] if either slot is undeclared.
    pub fn sample(&mut self, id: u8) -> Result<i64> {
        let dist = self.distributions[id as usize]
            .as_ref()
            .ok_or(crate::Error::NoSuchDistribution(id))?
            .clone();
        let rng = self.rngs[dist.rng_id() as usize]
            .as_mut()
            .ok_or(crate::Error::NoSuchRng(dist.rng_id()))?;

        Ok(dist.sample(rng))
    }
}
