//! Instance and prefab identities.
//!
//! [`Uuid`] is the `uuid` crate's type. Instance UUIDs are drawn from a
//! per-world PCG stream, so configuring a seed (see
//! [`WorldConfig`](crate::config::WorldConfig)) makes every generated UUID
//! reproducible across runs. The nil UUID means "no identity".

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

pub use ::uuid::Uuid;

/// Seedable source of instance UUIDs owned by each world.
#[derive(Debug, Clone)]
pub struct UuidGenerator {
    rng: Pcg64,
}

impl UuidGenerator {
    /// Deterministic stream when `seed` is set, OS entropy otherwise.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => Pcg64::seed_from_u64(seed),
            None => Pcg64::from_entropy(),
        };
        Self { rng }
    }

    /// Next random (v4) UUID from the stream.
    pub fn next_uuid(&mut self) -> Uuid {
        ::uuid::Builder::from_random_bytes(self.rng.gen()).into_uuid()
    }
}
