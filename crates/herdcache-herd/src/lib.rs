//! Cache stampede ("thundering herd") mitigation.
//!
//! When a popular entry expires, every reader misses at once and recomputes
//! the same value. [`StampedeGuard`] spreads that work out: each value is
//! stored in an [`Envelope`] carrying its logical expiry, and the physical
//! TTL is extended by `herd_timeout`. Once the logical expiry passes, each
//! reader independently decides whether the entry is stale, with a
//! probability that ramps from near 0 to 1 over `herd_timeout` seconds. A
//! few readers recompute early while the rest keep serving the old value.
//!
//! Time comes from a [`Clock`] and randomness from a seedable RNG, so the
//! probabilistic behaviour is reproducible under test.

mod clock;
mod envelope;
mod error;
mod guard;

pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::{Envelope, is_expired};
pub use error::HerdError;
pub use guard::StampedeGuard;
