//! rollfleet-drain — load-balancer drain coordination.
//!
//! Guarantees that, from the perspective of live traffic, an instance
//! is fully out of rotation before it is mutated and fully healthy
//! before it is returned to rotation.
//!
//! Draining is best-effort: a stuck drain is a warning, because the
//! instance is about to be mutated anyway. Restoring is not: an
//! instance that never comes back `InService` silently shrinks serving
//! capacity, so that failure is fatal.

pub mod coordinator;

pub use coordinator::{DrainCoordinator, DrainError, DrainTimings};
