//! Filter-program chain
//!
//! An ordered, mutable sequence of (instance id, compiled VM, expected
//! verdict) entries, one per configured filter stage at a pipeline point.
//! The chain is lazily allocated: callers hold an `Option<FilterProgChain>`
//! that stays `None` until the first successful insertion, and both the
//! `None` and the allocated-but-empty states behave as "nothing to run".
//!
//! Configuration-time mutation and processing-time reads are externally
//! synchronized by the caller; this module introduces no locking of its own.
//! There is deliberately no single-entry removal, matching the configuration
//! surface this models; teardown is whole-chain only.

use pktfilter_common::FilterVerdict;
use serde::Serialize;

use crate::vm::FilterVm;

/// One configured filter stage
#[derive(Debug)]
pub struct FilterProg {
    instance_id: u16,
    vm: FilterVm,
    expected_result: FilterVerdict,
}

impl FilterProg {
    /// Identifier of the pipeline instance this stage is bound to,
    /// unique within its chain
    pub fn instance_id(&self) -> u16 {
        self.instance_id
    }

    /// The stage's compiled VM
    pub fn vm(&self) -> &FilterVm {
        &self.vm
    }

    /// The verdict this stage is configured to assert
    pub fn expected_result(&self) -> FilterVerdict {
        self.expected_result
    }
}

/// Ordered collection of filter stages; insertion order is evaluation order
#[derive(Debug, Default)]
pub struct FilterProgChain {
    entries: Vec<FilterProg>,
}

impl FilterProgChain {
    /// Number of configured stages
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no stage is configured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stages in evaluation order
    pub fn iter(&self) -> impl Iterator<Item = &FilterProg> {
        self.entries.iter()
    }

    /// Configuration snapshot for the control plane
    pub fn stats(&self) -> ChainStats {
        ChainStats {
            entries: self.entries.len(),
            instance_ids: self.entries.iter().map(|p| p.instance_id).collect(),
        }
    }
}

/// Serializable chain snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ChainStats {
    /// Number of configured stages
    pub entries: usize,
    /// Instance ids in evaluation order
    pub instance_ids: Vec<u16>,
}

/// Find the entry for `instance_id` at scan position `stop_pos`.
///
/// Scans in order keeping a 1-based count of entries scanned, and returns a
/// match only when the id matches at exactly the requested position; an id
/// match at any other position ends the scan as not-found. `add` keeps ids
/// unique, so at most one position can match today; the position parameter
/// is the resume point for callers continuing past a previous partial match
/// and must survive any future change to duplicate-handling policy.
///
/// A missing or empty chain is not-found, never an error.
pub fn lookup(
    chain: Option<&FilterProgChain>,
    instance_id: u16,
    stop_pos: usize,
) -> Option<&FilterProg> {
    let chain = chain?;
    let mut pos = 0;
    for prog in &chain.entries {
        pos += 1;
        if prog.instance_id == instance_id {
            if pos != stop_pos {
                break;
            }
            return Some(prog);
        }
    }
    None
}

/// Append a stage for `instance_id`, allocating the chain on first use.
///
/// Duplicate ids are a no-op reported as `false`; the chain is unchanged and
/// the rejected `vm` is dropped here (this function takes ownership
/// unconditionally — callers that want to keep a VM on conflict must check
/// membership first). Returns `true` when the stage was appended.
pub fn add(
    chain: &mut Option<FilterProgChain>,
    instance_id: u16,
    vm: FilterVm,
    expected_result: FilterVerdict,
) -> bool {
    let chain = chain.get_or_insert_with(FilterProgChain::default);
    if chain.entries.iter().any(|p| p.instance_id == instance_id) {
        return false;
    }
    chain.entries.push(FilterProg {
        instance_id,
        vm,
        expected_result,
    });
    true
}

/// Tear down the whole chain, releasing every entry and its owned VM.
///
/// No-op when no chain was ever allocated.
pub fn free(chain: &mut Option<FilterProgChain>) {
    chain.take();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::testutil::{stub_program, StubEngine};
    use crate::vm::{FilterKind, VmFactory};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn compiled_vm(factory: &VmFactory) -> FilterVm {
        let mut vm = factory.create(FilterKind(0)).unwrap();
        vm.load(&stub_program(FilterVerdict::Pass.as_raw())).unwrap();
        vm
    }

    fn factory() -> VmFactory {
        VmFactory::new(Arc::new(StubEngine::default()))
    }

    #[test]
    fn test_add_allocates_lazily() {
        let factory = factory();
        let mut chain: Option<FilterProgChain> = None;
        assert!(add(&mut chain, 1, compiled_vm(&factory), FilterVerdict::Pass));
        assert_eq!(chain.as_ref().map(FilterProgChain::len), Some(1));
    }

    #[test]
    fn test_duplicate_id_is_rejected_once_inserted() {
        let factory = factory();
        let mut chain = None;
        assert!(add(&mut chain, 7, compiled_vm(&factory), FilterVerdict::Pass));
        assert!(!add(&mut chain, 7, compiled_vm(&factory), FilterVerdict::Drop));
        let chain = chain.unwrap();
        assert_eq!(chain.len(), 1);
        // The original configuration survives; a duplicate add is not an
        // update.
        assert_eq!(
            chain.iter().next().map(FilterProg::expected_result),
            Some(FilterVerdict::Pass)
        );
    }

    #[test]
    fn test_insertion_order_is_preserved() {
        let factory = factory();
        let mut chain = None;
        for id in [30u16, 10, 20] {
            assert!(add(&mut chain, id, compiled_vm(&factory), FilterVerdict::Continue));
        }
        let ids: Vec<u16> = chain
            .as_ref()
            .unwrap()
            .iter()
            .map(FilterProg::instance_id)
            .collect();
        assert_eq!(ids, vec![30, 10, 20]);
    }

    #[test]
    fn test_lookup_at_matching_position() {
        let factory = factory();
        let mut chain = None;
        for id in [11u16, 22, 33] {
            add(&mut chain, id, compiled_vm(&factory), FilterVerdict::Pass);
        }
        // 22 sits at scan position 2.
        assert!(lookup(chain.as_ref(), 22, 2).is_some());
        assert_eq!(
            lookup(chain.as_ref(), 22, 2).map(FilterProg::instance_id),
            Some(22)
        );
    }

    #[test]
    fn test_lookup_wrong_position_is_not_found() {
        let factory = factory();
        let mut chain = None;
        for id in [11u16, 22, 33] {
            add(&mut chain, id, compiled_vm(&factory), FilterVerdict::Pass);
        }
        // The id exists, but not at the requested stop position.
        assert!(lookup(chain.as_ref(), 22, 1).is_none());
        assert!(lookup(chain.as_ref(), 22, 3).is_none());
    }

    #[test]
    fn test_lookup_unknown_id() {
        let factory = factory();
        let mut chain = None;
        add(&mut chain, 11, compiled_vm(&factory), FilterVerdict::Pass);
        assert!(lookup(chain.as_ref(), 99, 1).is_none());
    }

    #[test]
    fn test_null_chain_is_safe() {
        let mut chain: Option<FilterProgChain> = None;
        assert!(lookup(chain.as_ref(), 1, 1).is_none());
        free(&mut chain);
        assert!(chain.is_none());
    }

    #[test]
    fn test_free_releases_everything() {
        let factory = factory();
        let mut chain = None;
        add(&mut chain, 1, compiled_vm(&factory), FilterVerdict::Pass);
        add(&mut chain, 2, compiled_vm(&factory), FilterVerdict::Drop);
        free(&mut chain);
        assert!(chain.is_none());
        assert!(lookup(chain.as_ref(), 1, 1).is_none());
    }

    #[test]
    fn test_stats_snapshot() {
        let factory = factory();
        let mut chain = None;
        add(&mut chain, 5, compiled_vm(&factory), FilterVerdict::Pass);
        add(&mut chain, 6, compiled_vm(&factory), FilterVerdict::Drop);
        let stats = chain.as_ref().unwrap().stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.instance_ids, vec![5, 6]);
    }

    proptest! {
        // For any sequence of adds, each id inserts exactly once and the
        // chain holds exactly the distinct ids in first-seen order.
        #[test]
        fn prop_ids_unique_per_chain(ids in proptest::collection::vec(any::<u16>(), 0..32)) {
            let factory = factory();
            let mut chain = None;
            let mut first_seen = Vec::new();
            for id in &ids {
                let inserted = add(&mut chain, *id, compiled_vm(&factory), FilterVerdict::Pass);
                prop_assert_eq!(inserted, !first_seen.contains(id));
                if inserted {
                    first_seen.push(*id);
                }
            }
            let chain_ids: Vec<u16> = chain
                .iter()
                .flat_map(|c| c.iter().map(FilterProg::instance_id))
                .collect();
            prop_assert_eq!(chain_ids, first_seen);
        }
    }
}
