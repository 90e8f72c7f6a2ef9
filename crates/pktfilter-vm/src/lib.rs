//! Sandboxed packet filter programs for a host pipeline
//!
//! This crate lets a packet-processing pipeline run small, sandboxed,
//! user-supplied filter programs and lets those programs call back into
//! host-provided maps and utilities through a typed protocol:
//!
//! - [`proto`] — capability-kind sets, size classes, and helper prototypes
//!   the external bytecode verifier enforces before a program may run
//! - [`helpers`] — the host helper implementations (map ops, timestamp,
//!   hash, bounded printf) and their immutable registry
//! - [`map`] — the access gateway between running programs and pluggable
//!   map backends
//! - [`vm`] — VM lifecycle around the external loader/verifier/JIT boundary
//! - [`chain`] — the ordered filter-program chain configured per pipeline
//!   point
//!
//! The loader/verifier/JIT itself and the map storage engines are external
//! collaborators reached through traits; this crate defines the contracts
//! and the lifecycle around them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod helpers;
pub mod map;
pub mod proto;
pub mod vm;

pub use pktfilter_common::{FilterError, FilterResult, FilterVerdict, LogRateLimit};

pub use chain::{ChainStats, FilterProg, FilterProgChain};
pub use helpers::{HelperDecl, HelperRegistry, MAX_PRINTF_LENGTH};
pub use map::{MapBackend, MapOp, MapOpError};
pub use proto::{ArgSpec, CapKind, HelperProto, KindSet, RetSpec, SizeSpec};
pub use vm::{FilterEngine, FilterEntry, FilterKind, FilterVm, VmFactory};
