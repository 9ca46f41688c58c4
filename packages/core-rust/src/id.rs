//! Operation identifier generation.
//!
//! Identifiers look like `op_1718000000_k3v9qa`: a prefix, the creation time
//! in Unix seconds, and six characters drawn uniformly from `[a-z0-9]`. The
//! time component keeps ids roughly sortable and easy to trace in logs; the
//! random suffix separates ids minted within the same second.

use std::fmt;
use std::sync::Arc;

use rand::Rng;

use crate::clock::{ClockSource, SystemClock};

/// Characters used for the random suffix.
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of the random suffix.
pub const SUFFIX_LEN: usize = 6;

/// Prefix used for operation ids.
pub const OPERATION_PREFIX: &str = "op";

/// Prefix used for batch ids.
pub const BATCH_PREFIX: &str = "batch";

/// Stateless identifier generator.
///
/// Holds only immutable configuration and a clock handle; randomness comes
/// from the thread-local generator, so a shared `IdGenerator` can be called
/// from any number of tasks without locking.
#[derive(Clone)]
pub struct IdGenerator {
    prefix: String,
    clock: Arc<dyn ClockSource>,
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl IdGenerator {
    /// Creates a generator for operation ids (`op_...`).
    #[must_use]
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self::with_prefix(OPERATION_PREFIX, clock)
    }

    /// Creates a generator with a custom prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            prefix: prefix.into(),
            clock,
        }
    }

    /// Returns a fresh identifier. Never fails.
    #[must_use]
    pub fn new_id(&self) -> String {
        let seconds = self.clock.now() / 1000;
        format!("{}_{}_{}", self.prefix, seconds, random_suffix())
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..SUFFIX_LEN)
        .map(|_| char::from(SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())]))
        .collect()
}
