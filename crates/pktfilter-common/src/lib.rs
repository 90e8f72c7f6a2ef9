//! Shared vocabulary for the packet filter-program subsystem:
//! - Filter verdicts
//! - Error taxonomy
//! - Rate-limited logging guard

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod ratelimit;
pub mod verdict;

pub use error::*;
pub use ratelimit::*;
pub use verdict::*;
