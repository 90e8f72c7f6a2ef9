//! Error types for the filter-program subsystem

use thiserror::Error;

/// Filter-program subsystem error type
///
/// Nothing here is fatal to the process: VM creation failure means the stage
/// cannot be configured, load/compile failures leave no usable VM behind, and
/// the caller decides what to do in every case.
#[derive(Error, Debug)]
pub enum FilterError {
    /// The underlying engine could not allocate a sandboxed VM
    #[error("failed to create filter VM")]
    VmCreate,

    /// Bytecode failed to load or verify
    #[error("failed to load filter program: {0}")]
    Load(String),

    /// Verified bytecode failed to compile
    #[error("failed to compile filter program: {0}")]
    Compile(String),

    /// The program was run before a successful compile
    #[error("filter program is not compiled")]
    NotCompiled,
}

/// Result type for the filter-program subsystem
pub type FilterResult<T> = Result<T, FilterError>;
