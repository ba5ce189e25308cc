//! Wrapping correlation id generator.
//!
//! Ids cycle through `[1, modulus]`; 0 is never produced because it marks
//! uncorrelated packets. One generator is owned by each connection.

use std::sync::atomic::{AtomicU32, Ordering};

use super::header::NO_ID;

/// Default id modulus.
pub const DEFAULT_ID_MODULUS: u32 = 65_535;

/// Lock-free generator of ids in `[1, modulus]`.
#[derive(Debug)]
pub struct IdGenerator {
    modulus: u32,
    last: AtomicU32,
}

impl IdGenerator {
    /// Create a generator whose first id is 1.
    ///
    /// A modulus of 0 is treated as 1.
    pub fn new(modulus: u32) -> Self {
        Self::starting_after(modulus, NO_ID)
    }

    /// Create a generator whose first id follows `last`.
    ///
    /// Lets tests start close to the wrap point.
    pub fn starting_after(modulus: u32, last: u32) -> Self {
        let modulus = modulus.max(1);
        Self {
            modulus,
            last: AtomicU32::new(last.min(modulus)),
        }
    }

    /// Largest id this generator produces.
    #[inline]
    pub fn modulus(&self) -> u32 {
        self.modulus
    }

    /// Next id, wrapping from `modulus` back to 1.
    pub fn next(&self) -> u32 {
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = if current >= self.modulus { 1 } else { current + 1 };
            match self.last.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_ID_MODULUS)
    }
}
