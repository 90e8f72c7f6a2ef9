//! Typed call protocol for helper functions
//!
//! Every host function callable from a sandboxed program is described by a
//! [`HelperProto`]: up to five positional argument slots plus a return spec.
//! The external bytecode verifier consults these descriptors to reject
//! type-unsafe calls before a program is allowed to run; the helpers
//! themselves perform no type checking at call time.

use crate::map::MapBackend;

/// Maximum positional arguments a helper may take
pub const MAX_HELPER_ARGS: usize = 5;

/// What a register-sized argument (or return value) may refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapKind {
    /// Pointer into the packet buffer
    PacketPtr,
    /// Handle to a map
    MapPtr,
    /// Pointer into a map value
    MapValuePtr,
    /// Pointer into the program's stack frame
    StackPtr,
    /// Immediate scalar
    Imm,
    /// Scalar of unknown provenance
    Unknown,
}

impl CapKind {
    const ALL: [CapKind; 6] = [
        CapKind::PacketPtr,
        CapKind::MapPtr,
        CapKind::MapValuePtr,
        CapKind::StackPtr,
        CapKind::Imm,
        CapKind::Unknown,
    ];

    const fn bit(self) -> u8 {
        match self {
            CapKind::PacketPtr => 1 << 0,
            CapKind::MapPtr => 1 << 1,
            CapKind::MapValuePtr => 1 << 2,
            CapKind::StackPtr => 1 << 3,
            CapKind::Imm => 1 << 4,
            CapKind::Unknown => 1 << 5,
        }
    }
}

/// "Any-of" set of capability kinds
///
/// An argument slot accepts a value whose kind is any member of the set.
/// [`KindSet::ANY`] is the wildcard: the verifier imposes no constraint on
/// that slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSet(u8);

impl KindSet {
    /// The empty set (accepts nothing)
    pub const EMPTY: KindSet = KindSet(0);

    /// The wildcard set (don't-care)
    pub const ANY: KindSet = KindSet(0x3f);

    /// Set containing exactly one kind
    pub const fn only(kind: CapKind) -> Self {
        KindSet(kind.bit())
    }

    /// Set containing every kind in `kinds`
    pub const fn of(kinds: &[CapKind]) -> Self {
        let mut bits = 0u8;
        let mut i = 0;
        while i < kinds.len() {
            bits |= kinds[i].bit();
            i += 1;
        }
        KindSet(bits)
    }

    /// Union of two sets
    pub const fn union(self, other: KindSet) -> Self {
        KindSet(self.0 | other.0)
    }

    /// Whether `kind` is a member
    pub const fn contains(self, kind: CapKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Whether this slot is unconstrained
    pub const fn is_any(self) -> bool {
        self.0 == Self::ANY.0
    }

    /// Iterate the member kinds
    pub fn iter(self) -> impl Iterator<Item = CapKind> {
        CapKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

/// Size constraint on an argument slot
///
/// Map-relative placeholders are resolved by the verifier against the key and
/// value sizes of the map passed in the same call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSpec {
    /// No size constraint
    Any,
    /// Exactly this many bits
    Bits(u16),
    /// The key size of the map argument in this call
    MapKey,
    /// The value size of the map argument in this call
    MapValue,
    /// Any pointer-reachable length up to the verifier's maximum
    PtrMax,
}

impl SizeSpec {
    /// Resolve a map-relative placeholder to a concrete byte length.
    ///
    /// Returns `None` when the spec does not constrain the size, or when a
    /// map-relative spec is used in a call with no map argument.
    pub fn resolve(self, map: Option<&dyn MapBackend>) -> Option<usize> {
        match self {
            SizeSpec::Any | SizeSpec::PtrMax => None,
            SizeSpec::Bits(bits) => Some(bits as usize / 8),
            SizeSpec::MapKey => map.map(|m| m.key_size()),
            SizeSpec::MapValue => map.map(|m| m.value_size()),
        }
    }
}

/// One positional argument slot of a helper prototype
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    /// Acceptable kinds at this position (any-of)
    pub kinds: KindSet,
    /// Size constraint at this position
    pub size: SizeSpec,
}

impl ArgSpec {
    /// Unconstrained slot (unused trailing positions)
    pub const ANY: ArgSpec = ArgSpec {
        kinds: KindSet::ANY,
        size: SizeSpec::Any,
    };

    /// Slot accepting `kinds` with size `size`
    pub const fn new(kinds: KindSet, size: SizeSpec) -> Self {
        ArgSpec { kinds, size }
    }
}

/// Return-value spec of a helper prototype
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetSpec {
    /// The return register holds nothing usable
    None,
    /// The return register holds a value of one of `kinds`; `nullable`
    /// permits a null result the program must check before dereferencing
    Value {
        /// Possible kinds of the returned value
        kinds: KindSet,
        /// Whether a null result is permitted
        nullable: bool,
    },
}

/// Host-side argument, marshalled from guest registers by the engine
///
/// The engine resolves guest pointers into host views using the sizes the
/// verifier established; by the time a helper runs, no raw guest addresses
/// remain.
pub enum HelperArg<'a> {
    /// A map handle
    Map(&'a dyn MapBackend),
    /// A bounded byte region (packet, map value, or stack memory)
    Bytes(&'a [u8]),
    /// An immediate scalar
    Imm(u64),
    /// A null pointer the program passed anyway
    Null,
}

impl<'a> HelperArg<'a> {
    /// View as a map handle
    pub fn as_map(&self) -> Option<&'a dyn MapBackend> {
        match self {
            HelperArg::Map(m) => Some(*m),
            _ => None,
        }
    }

    /// View as a byte region
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self {
            HelperArg::Bytes(b) => Some(*b),
            _ => None,
        }
    }

    /// View as an immediate
    pub fn as_imm(&self) -> Option<u64> {
        match self {
            HelperArg::Imm(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Debug for HelperArg<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HelperArg::Map(_) => f.write_str("Map"),
            HelperArg::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            HelperArg::Imm(v) => f.debug_tuple("Imm").field(v).finish(),
            HelperArg::Null => f.write_str("Null"),
        }
    }
}

/// Host-side helper result, marshalled back into the return register by the
/// engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperRet {
    /// No return value used
    Unit,
    /// Scalar result
    U64(u64),
    /// Backend status code (0 = success convention, negative = failure)
    Status(i64),
    /// Pointer-or-null result (map value copy, or none)
    Value(Option<Vec<u8>>),
}

/// Host function with the marshalled calling convention
pub type HelperFn = for<'a> fn(&'a [HelperArg<'a>]) -> HelperRet;

/// Immutable descriptor of one host-provided helper
///
/// Registered once at VM-creation time and never mutated per call.
#[derive(Debug, Clone, Copy)]
pub struct HelperProto {
    /// The host function the engine dispatches to
    pub func: HelperFn,
    /// Positional argument slots; unused trailing slots are [`ArgSpec::ANY`]
    pub args: [ArgSpec; MAX_HELPER_ARGS],
    /// Return-value spec
    pub ret: RetSpec,
}
