//! Sandboxed VM lifecycle
//!
//! The bytecode loader, verifier, and JIT live behind the [`FilterEngine`]
//! boundary; this module owns the lifecycle around them: create a sandboxed
//! context for one filter slot, register the helper table into it, feed it
//! bytecode, and hold the compiled entry point. Every failure is absorbed or
//! surfaced as a value; nothing here is fatal to the process.

use std::sync::Arc;

use pktfilter_common::{FilterError, FilterResult, LogRateLimit};
use tracing::warn;

use crate::helpers::HelperRegistry;
use crate::proto::HelperProto;

/// Filter classification tag for a VM
///
/// Selects which program semantics the underlying verifier/JIT applies.
/// Opaque to this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterKind(
    /// Raw classification tag, opaque to this layer
    pub u16,
);

/// Compiled entry point: packet buffer in, raw verdict register out
pub type FilterEntry = Box<dyn Fn(&mut [u8]) -> u64 + Send + Sync>;

/// Error from the engine boundary, carrying the engine's own message
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    /// Engine-allocated description of what went wrong
    pub message: String,
}

impl EngineError {
    /// Wrap an engine message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The external loader/verifier/JIT service
pub trait FilterEngine: Send + Sync {
    /// Allocate a fresh sandboxed context for `kind`, or `None` when the
    /// engine cannot (treated as "this stage cannot be configured").
    fn create_vm(&self, kind: FilterKind) -> Option<Box<dyn EngineVm>>;
}

/// One sandboxed execution context inside the engine
pub trait EngineVm: Send {
    /// Make a helper callable from programs in this context under a fixed id.
    /// Must happen before [`load`](EngineVm::load).
    fn register_helper(
        &mut self,
        id: u32,
        name: &str,
        proto: &HelperProto,
    ) -> Result<(), EngineError>;

    /// Parse and verify an ELF-style bytecode container, checking every
    /// embedded helper call against the registered prototypes.
    fn load(&mut self, bytecode: &[u8]) -> Result<(), EngineError>;

    /// JIT-compile previously loaded bytecode into a callable entry point.
    fn compile(&mut self) -> Result<FilterEntry, EngineError>;
}

/// Creates VMs with the helper table pre-registered
///
/// Owns the process-wide pieces every VM shares: the engine handle, the
/// immutable helper registry, and the rate-limit state bounding failure logs.
pub struct VmFactory {
    engine: Arc<dyn FilterEngine>,
    registry: Arc<HelperRegistry>,
    log_limit: Arc<LogRateLimit>,
}

impl VmFactory {
    /// Factory over `engine` with the standard helper table.
    pub fn new(engine: Arc<dyn FilterEngine>) -> Self {
        Self {
            engine,
            registry: Arc::new(HelperRegistry::standard()),
            log_limit: Arc::new(LogRateLimit::default_warn()),
        }
    }

    /// The helper registry shared by every VM from this factory
    pub fn registry(&self) -> &Arc<HelperRegistry> {
        &self.registry
    }

    /// Create a sandboxed VM for one filter slot and register every helper
    /// into it.
    ///
    /// `None` means the stage cannot be configured; the failure is logged
    /// (rate-limited) and is not fatal to the caller.
    pub fn create(&self, kind: FilterKind) -> Option<FilterVm> {
        let mut engine_vm = match self.engine.create_vm(kind) {
            Some(vm) => vm,
            None => {
                if self.log_limit.check() {
                    warn!("failed to create VM");
                }
                return None;
            }
        };

        for decl in self.registry.decls() {
            if let Err(e) = engine_vm.register_helper(decl.id, decl.name, &decl.proto) {
                if self.log_limit.check() {
                    warn!("failed to register helper {} ({}): {}", decl.id, decl.name, e);
                }
                return None;
            }
        }

        Some(FilterVm {
            kind,
            engine_vm,
            entry: None,
            log_limit: Arc::clone(&self.log_limit),
        })
    }
}

/// One sandboxed execution context plus, after a successful load, its
/// compiled entry point
///
/// Exclusively owned by the chain entry it is configured into. A VM whose
/// [`load`](FilterVm::load) has not succeeded has no entry point and
/// [`run`](FilterVm::run) reports it as not compiled.
pub struct FilterVm {
    kind: FilterKind,
    engine_vm: Box<dyn EngineVm>,
    entry: Option<FilterEntry>,
    log_limit: Arc<LogRateLimit>,
}

impl FilterVm {
    /// Load, verify, and JIT-compile `bytecode`.
    ///
    /// To be called exactly once per VM before use. Load/verify and compile
    /// fail independently; either failure is logged with the engine's
    /// message (rate-limited), surfaced as the corresponding error, and
    /// leaves no entry point behind.
    pub fn load(&mut self, bytecode: &[u8]) -> FilterResult<()> {
        if let Err(e) = self.engine_vm.load(bytecode) {
            if self.log_limit.check() {
                warn!("failed to load code: {}", e);
            }
            return Err(FilterError::Load(e.message));
        }

        match self.engine_vm.compile() {
            Ok(entry) => {
                self.entry = Some(entry);
                Ok(())
            }
            Err(e) => {
                if self.log_limit.check() {
                    warn!("failed to compile: {}", e);
                }
                Err(FilterError::Compile(e.message))
            }
        }
    }

    /// Filter classification this VM was created for
    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Whether a compiled entry point exists
    pub fn is_compiled(&self) -> bool {
        self.entry.is_some()
    }

    /// Run the compiled program against `packet`.
    ///
    /// Fails with [`FilterError::NotCompiled`] before a successful
    /// [`load`](FilterVm::load); callers that follow the chain-building
    /// workflow never hit that case.
    pub fn run(&self, packet: &mut [u8]) -> FilterResult<u64> {
        match &self.entry {
            Some(entry) => Ok(entry(packet)),
            None => Err(FilterError::NotCompiled),
        }
    }
}

impl std::fmt::Debug for FilterVm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterVm")
            .field("kind", &self.kind)
            .field("compiled", &self.entry.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Engine double: accepts any bytecode starting with `STUB_MAGIC`,
    /// "compiles" it to an entry returning the byte after the magic.
    pub const STUB_MAGIC: &[u8] = b"\x7fSTB";

    #[derive(Default)]
    pub struct StubEngine {
        /// When set, `create_vm` reports allocation failure.
        pub fail_create: bool,
        pub created: AtomicUsize,
    }

    impl FilterEngine for StubEngine {
        fn create_vm(&self, _kind: FilterKind) -> Option<Box<dyn EngineVm>> {
            if self.fail_create {
                return None;
            }
            self.created.fetch_add(1, Ordering::Relaxed);
            Some(Box::new(StubVm::default()))
        }
    }

    #[derive(Default)]
    pub struct StubVm {
        helpers: Vec<(u32, String)>,
        verdict: Option<u64>,
    }

    impl EngineVm for StubVm {
        fn register_helper(
            &mut self,
            id: u32,
            name: &str,
            _proto: &HelperProto,
        ) -> Result<(), EngineError> {
            if self.helpers.iter().any(|(seen, _)| *seen == id) {
                return Err(EngineError::new(format!("helper id {} already bound", id)));
            }
            self.helpers.push((id, name.to_string()));
            Ok(())
        }

        fn load(&mut self, bytecode: &[u8]) -> Result<(), EngineError> {
            if bytecode.len() < STUB_MAGIC.len() + 1 || !bytecode.starts_with(STUB_MAGIC) {
                return Err(EngineError::new("bad magic in program container"));
            }
            self.verdict = Some(bytecode[STUB_MAGIC.len()] as u64);
            Ok(())
        }

        fn compile(&mut self) -> Result<FilterEntry, EngineError> {
            match self.verdict {
                Some(v) => Ok(Box::new(move |_packet: &mut [u8]| v)),
                None => Err(EngineError::new("no program loaded")),
            }
        }
    }

    /// Bytecode the stub engine accepts, producing raw verdict `verdict`.
    pub fn stub_program(verdict: u64) -> Vec<u8> {
        let mut code = STUB_MAGIC.to_vec();
        code.push(verdict as u8);
        code
    }
}
