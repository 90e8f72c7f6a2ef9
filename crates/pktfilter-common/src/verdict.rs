//! Filter verdict vocabulary

use serde::{Deserialize, Serialize};

/// Outcome of running one filter program against a packet
///
/// A chain entry is configured with the verdict it is expected to produce;
/// the surrounding pipeline compares the actual verdict against it to decide
/// match/continue/stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterVerdict {
    /// Drop the packet
    Drop,
    /// Accept the packet
    Pass,
    /// Defer to the next stage
    Continue,
}

impl FilterVerdict {
    /// Decode the raw register value returned by a compiled entry point.
    ///
    /// Codes: 0 = Drop, 1 = Pass, 2 = Continue. Anything else is an
    /// ill-behaved program and yields `None`.
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(FilterVerdict::Drop),
            1 => Some(FilterVerdict::Pass),
            2 => Some(FilterVerdict::Continue),
            _ => None,
        }
    }

    /// Raw register encoding of this verdict
    pub const fn as_raw(self) -> u64 {
        match self {
            FilterVerdict::Drop => 0,
            FilterVerdict::Pass => 1,
            FilterVerdict::Continue => 2,
        }
    }
}
