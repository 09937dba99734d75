//! rollfleet-release — two-slot release rotation on a target host.
//!
//! Each app keeps exactly two release generations on a target:
//!
//! ```text
//! {root}/{app}/releases/curr    one slot
//! {root}/{app}/releases/prev    the other (rollback generation)
//! {root}/{app}/current          symlink to whichever slot is live
//! {root}/{app}/config           app-owned, untouched by rotation
//! ```
//!
//! [`rotate`] replaces the running artifact with a new one while
//! keeping the prior one recoverable, atomically from the point of
//! view of anything reading the `current` pointer.

pub mod layout;
pub mod rotate;

pub use layout::ReleaseLayout;
pub use rotate::{rotate, RotationError, RotationStep};
