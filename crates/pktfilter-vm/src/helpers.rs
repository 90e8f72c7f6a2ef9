//! Host-provided helper functions and their registry
//!
//! Seven helpers under fixed ids: the four map operations, a nanosecond
//! timestamp, a fixed-seed hash, and a bounded printf-style logger. The
//! registry is built once and shared by reference; descriptors are never
//! mutated after registration.

use crate::map;
use crate::proto::{
    ArgSpec, CapKind, HelperArg, HelperProto, HelperRet, KindSet, RetSpec, SizeSpec,
    MAX_HELPER_ARGS,
};

/// Fixed helper ids, matching the registration order expected by programs
pub const HELPER_MAP_LOOKUP: u32 = 1;
/// Map update helper id
pub const HELPER_MAP_UPDATE: u32 = 2;
/// Map delete helper id
pub const HELPER_MAP_DELETE: u32 = 3;
/// Map add helper id
pub const HELPER_MAP_ADD: u32 = 4;
/// Timestamp helper id
pub const HELPER_TIME_GET_NS: u32 = 5;
/// Hash helper id
pub const HELPER_HASH: u32 = 6;
/// Printf helper id
pub const HELPER_PRINTF: u32 = 7;

/// Longest message the printf helper will emit, in bytes
pub const MAX_PRINTF_LENGTH: usize = 80;

/// Wall-clock timestamp in nanoseconds since the epoch
pub fn time_get_ns() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64
}

/// Fixed-seed (0) non-cryptographic hash over `data`
///
/// Jenkins lookup3 `hashlittle`. Pure function: identical buffers always
/// produce identical values, across calls and across processes.
pub fn hash_bytes(data: &[u8]) -> u32 {
    hash_seeded(data, 0)
}

/// lookup3 `hashlittle` with an explicit seed
pub fn hash_seeded(data: &[u8], seed: u32) -> u32 {
    let init = 0xdead_beef_u32
        .wrapping_add(data.len() as u32)
        .wrapping_add(seed);
    let (mut a, mut b, mut c) = (init, init, init);

    let mut rest = data;
    while rest.len() > 12 {
        a = a.wrapping_add(word(&rest[0..4]));
        b = b.wrapping_add(word(&rest[4..8]));
        c = c.wrapping_add(word(&rest[8..12]));
        mix(&mut a, &mut b, &mut c);
        rest = &rest[12..];
    }

    // Tail of 1..=12 bytes; absent bytes contribute zero. A zero-length
    // input skips the final scramble entirely, per the reference function.
    if rest.is_empty() {
        return c;
    }
    let mut tail = [0u8; 12];
    tail[..rest.len()].copy_from_slice(rest);
    a = a.wrapping_add(word(&tail[0..4]));
    b = b.wrapping_add(word(&tail[4..8]));
    c = c.wrapping_add(word(&tail[8..12]));
    final_mix(&mut a, &mut b, &mut c);
    c
}

#[inline(always)]
fn word(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline(always)]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c); *a ^= c.rotate_left(4);  *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a); *b ^= a.rotate_left(6);  *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b); *c ^= b.rotate_left(8);  *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c); *a ^= c.rotate_left(16); *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a); *b ^= a.rotate_left(19); *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b); *c ^= b.rotate_left(4);  *b = b.wrapping_add(*a);
}

#[inline(always)]
fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b; *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c; *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a; *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b; *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c; *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a; *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b; *c = c.wrapping_sub(b.rotate_left(24));
}

/// Emit a printf-style message from a sandboxed program at error severity.
///
/// Output is truncated to [`MAX_PRINTF_LENGTH`] bytes; over-length output is
/// silently dropped, never an error. Supported conversions: `%d`, `%u`,
/// `%x`, `%c`, `%%`; anything else passes through literally.
pub fn log_printf(fmt: &str, args: &[u64]) {
    let msg = format_bounded(fmt, args);
    tracing::error!("{}", msg);
}

fn format_bounded(fmt: &str, args: &[u64]) -> String {
    use std::fmt::Write;

    let mut out = BoundedWriter {
        buf: String::new(),
        cap: MAX_PRINTF_LENGTH,
    };
    let mut args = args.iter().copied();
    let mut chars = fmt.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            let _ = out.write_char(ch);
            continue;
        }
        match chars.next() {
            Some('%') => {
                let _ = out.write_char('%');
            }
            Some('d') => {
                let _ = write!(out, "{}", args.next().unwrap_or(0) as i64);
            }
            Some('u') => {
                let _ = write!(out, "{}", args.next().unwrap_or(0));
            }
            Some('x') => {
                let _ = write!(out, "{:x}", args.next().unwrap_or(0));
            }
            Some('c') => {
                let _ = out.write_char(args.next().unwrap_or(0) as u8 as char);
            }
            Some(other) => {
                let _ = out.write_char('%');
                let _ = out.write_char(other);
            }
            None => {
                let _ = out.write_char('%');
            }
        }
    }
    out.buf
}

/// fmt::Write sink that drops everything past `cap` bytes, always at a
/// character boundary.
struct BoundedWriter {
    buf: String,
    cap: usize,
}

impl std::fmt::Write for BoundedWriter {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        for ch in s.chars() {
            if self.buf.len() + ch.len_utf8() > self.cap {
                break;
            }
            self.buf.push(ch);
        }
        Ok(())
    }
}

// Marshalled adapters: decode engine-resolved arguments and dispatch to the
// typed implementations. No type checking happens here; the verifier already
// enforced the prototypes below.

fn helper_map_lookup(args: &[HelperArg<'_>]) -> HelperRet {
    let map = args.first().and_then(|a| a.as_map());
    let key = args.get(1).and_then(|a| a.as_bytes());
    HelperRet::Value(map::map_lookup(map, key))
}

fn helper_map_update(args: &[HelperArg<'_>]) -> HelperRet {
    let map = args.first().and_then(|a| a.as_map());
    let key = args.get(1).and_then(|a| a.as_bytes());
    let item = args.get(2).and_then(|a| a.as_bytes());
    HelperRet::Status(map::map_update(map, key, item).unwrap_or_else(|e| e.code()))
}

fn helper_map_delete(args: &[HelperArg<'_>]) -> HelperRet {
    let map = args.first().and_then(|a| a.as_map());
    let key = args.get(1).and_then(|a| a.as_bytes());
    HelperRet::Status(map::map_delete(map, key).unwrap_or_else(|e| e.code()))
}

fn helper_map_add(args: &[HelperArg<'_>]) -> HelperRet {
    let map = args.first().and_then(|a| a.as_map());
    let item = args.get(1).and_then(|a| a.as_bytes());
    HelperRet::Status(map::map_add(map, item).unwrap_or_else(|e| e.code()))
}

fn helper_time_get_ns(_args: &[HelperArg<'_>]) -> HelperRet {
    HelperRet::U64(time_get_ns())
}

fn helper_hash(args: &[HelperArg<'_>]) -> HelperRet {
    let buf = args.first().and_then(|a| a.as_bytes()).unwrap_or(&[]);
    let len = args
        .get(1)
        .and_then(|a| a.as_imm())
        .map(|n| (n as usize).min(buf.len()))
        .unwrap_or(buf.len());
    HelperRet::U64(hash_bytes(&buf[..len]) as u64)
}

fn helper_printf(args: &[HelperArg<'_>]) -> HelperRet {
    if let Some(fmt) = args.first().and_then(|a| a.as_bytes()) {
        let fmt = String::from_utf8_lossy(fmt);
        let rest: Vec<u64> = args[1..].iter().filter_map(|a| a.as_imm()).collect();
        log_printf(&fmt, &rest);
    }
    HelperRet::Unit
}

/// One registry entry: fixed id, symbol name, prototype
#[derive(Debug, Clone, Copy)]
pub struct HelperDecl {
    /// Fixed numeric id the program calls the helper by
    pub id: u32,
    /// Symbol name, for engine-side relocation and diagnostics
    pub name: &'static str,
    /// Call prototype the verifier enforces
    pub proto: HelperProto,
}

/// Immutable table of every helper available to filter programs
///
/// Built once (see [`HelperRegistry::standard`]) and shared by reference
/// across every VM; never mutated afterwards.
#[derive(Debug)]
pub struct HelperRegistry {
    decls: Vec<HelperDecl>,
}

impl HelperRegistry {
    /// The standard seven-helper table.
    pub fn standard() -> Self {
        // Pointer kinds a program may legally hand to a map operation.
        let mem_ptr = KindSet::of(&[CapKind::PacketPtr, CapKind::MapValuePtr, CapKind::StackPtr]);
        let map_arg = ArgSpec::new(KindSet::only(CapKind::MapPtr), SizeSpec::Any);
        let ret_status = RetSpec::Value {
            kinds: KindSet::only(CapKind::Unknown),
            nullable: false,
        };

        let decls = vec![
            HelperDecl {
                id: HELPER_MAP_LOOKUP,
                name: "map_lookup",
                proto: HelperProto {
                    func: helper_map_lookup,
                    args: [
                        map_arg,
                        // Lookup keys may also come from scalars of unknown
                        // provenance; the size check still applies.
                        ArgSpec::new(mem_ptr.union(KindSet::only(CapKind::Unknown)), SizeSpec::MapKey),
                        ArgSpec::ANY,
                        ArgSpec::ANY,
                        ArgSpec::ANY,
                    ],
                    ret: RetSpec::Value {
                        kinds: KindSet::only(CapKind::MapValuePtr),
                        nullable: true,
                    },
                },
            },
            HelperDecl {
                id: HELPER_MAP_UPDATE,
                name: "map_update",
                proto: HelperProto {
                    func: helper_map_update,
                    args: [
                        map_arg,
                        ArgSpec::new(mem_ptr, SizeSpec::MapKey),
                        ArgSpec::new(mem_ptr, SizeSpec::MapValue),
                        ArgSpec::ANY,
                        ArgSpec::ANY,
                    ],
                    ret: ret_status,
                },
            },
            HelperDecl {
                id: HELPER_MAP_DELETE,
                name: "map_delete",
                proto: HelperProto {
                    func: helper_map_delete,
                    args: [
                        map_arg,
                        ArgSpec::new(mem_ptr, SizeSpec::MapKey),
                        ArgSpec::ANY,
                        ArgSpec::ANY,
                        ArgSpec::ANY,
                    ],
                    ret: ret_status,
                },
            },
            HelperDecl {
                id: HELPER_MAP_ADD,
                name: "map_add",
                proto: HelperProto {
                    func: helper_map_add,
                    args: [
                        map_arg,
                        ArgSpec::new(mem_ptr, SizeSpec::MapValue),
                        ArgSpec::ANY,
                        ArgSpec::ANY,
                        ArgSpec::ANY,
                    ],
                    ret: ret_status,
                },
            },
            HelperDecl {
                id: HELPER_TIME_GET_NS,
                name: "time_get_ns",
                proto: HelperProto {
                    func: helper_time_get_ns,
                    args: [ArgSpec::ANY; MAX_HELPER_ARGS],
                    ret: ret_status,
                },
            },
            HelperDecl {
                id: HELPER_HASH,
                name: "hash",
                proto: HelperProto {
                    func: helper_hash,
                    args: [
                        ArgSpec::new(mem_ptr, SizeSpec::PtrMax),
                        ArgSpec::new(KindSet::only(CapKind::Imm), SizeSpec::Bits(64)),
                        ArgSpec::ANY,
                        ArgSpec::ANY,
                        ArgSpec::ANY,
                    ],
                    ret: ret_status,
                },
            },
            HelperDecl {
                id: HELPER_PRINTF,
                name: "printf",
                proto: HelperProto {
                    func: helper_printf,
                    args: [ArgSpec::ANY; MAX_HELPER_ARGS],
                    ret: RetSpec::None,
                },
            },
        ];
        Self { decls }
    }

    /// Every declared helper, in registration order
    pub fn decls(&self) -> &[HelperDecl] {
        &self.decls
    }

    /// Declaration under `id`, if any
    pub fn get(&self, id: u32) -> Option<&HelperDecl> {
        self.decls.iter().find(|d| d.id == id)
    }

    /// Number of declared helpers
    pub fn len(&self) -> usize {
        self.decls.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}
