#![cfg(test)]

// Property tests for HashTable against std::collections::HashMap, kept in the
// crate so the distance invariant checker is reachable.

use crate::HashTable;
use crate::TableConfig;
use crate::hash;
use crate::ops::FnOps;
use core::cmp::Ordering;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::collections::HashMap;

type Entry = (u16, i32);

fn hash_entry(entry: &Entry, seed0: u64, seed1: u64) -> u64 {
    hash::sip(&entry.0.to_le_bytes(), seed0, seed1)
}

// Few distinct digests, so long displaced runs and wraparound are common.
fn clumped_entry(entry: &Entry, _: u64, _: u64) -> u64 {
    (entry.0 % 5) as u64 * 7 + 13
}

fn compare_entry(a: &Entry, b: &Entry, _: &()) -> Ordering {
    a.0.cmp(&b.0)
}

#[derive(Clone, Debug)]
enum Op {
    Set(u16, i32),
    Delete(u16),
    Get(u16),
    Clear(Option<u8>),
    Walk,
}

fn arb_ops(keys: u16) -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        6 => (0..keys, any::<i32>()).prop_map(|(k, v)| Op::Set(k, v)),
        3 => (0..keys).prop_map(Op::Delete),
        2 => (0..keys).prop_map(Op::Get),
        1 => proptest::option::of(any::<u8>()).prop_map(Op::Clear),
        1 => Just(Op::Walk),
    ];
    proptest::collection::vec(op, 1..400)
}

fn below_threshold(table: &HashTable<Entry, FnOps<Entry>>) -> bool {
    table.len() < table.capacity() - table.capacity() / 4
}

fn run(
    mut sut: HashTable<Entry, FnOps<Entry>>,
    ops: Vec<Op>,
) -> Result<(), TestCaseError> {
    let mut model: HashMap<u16, i32> = HashMap::new();

    for op in ops {
        match op {
            Op::Set(k, v) => {
                let previous = sut.set((k, v));
                prop_assert_eq!(previous.map(|e| e.1), model.insert(k, v));
                prop_assert!(below_threshold(&sut));
            }
            Op::Delete(k) => {
                let removed = sut.delete(&(k, 0));
                prop_assert_eq!(removed.map(|e| e.1), model.remove(&k));
                prop_assert!(sut.get(&(k, 0)).is_none());
            }
            Op::Get(k) => {
                prop_assert_eq!(sut.get(&(k, 0)).map(|e| e.1), model.get(&k).copied());
            }
            Op::Clear(hint) => {
                sut.clear(hint.map(usize::from));
                model.clear();
                if let Some(hint) = hint {
                    prop_assert_eq!(sut.capacity(), usize::from(hint).max(16).next_power_of_two());
                }
            }
            Op::Walk => {
                let mut cursor = 0;
                let mut walked = BTreeMap::new();
                while let Some(entry) = sut.iterate(&mut cursor) {
                    prop_assert!(walked.insert(entry.0, entry.1).is_none(), "visited twice");
                }
                let expected: BTreeMap<u16, i32> = model.iter().map(|(&k, &v)| (k, v)).collect();
                prop_assert_eq!(walked, expected);
            }
        }

        sut.assert_distances();
        prop_assert_eq!(sut.len(), model.len());
        prop_assert!(!sut.oom());
    }

    let bag: BTreeMap<u16, i32> = sut.iter().map(|&(k, v)| (k, v)).collect();
    let expected: BTreeMap<u16, i32> = model.into_iter().collect();
    prop_assert_eq!(bag, expected);
    Ok(())
}

// Property: a table driven by random set/delete/get/clear sequences holds
// exactly the same entries as a HashMap, keeps every stored distance exact,
// and never reaches the growth threshold without growing.
proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

    #[test]
    fn prop_matches_hash_map(ops in arb_ops(200), seed0 in any::<u64>(), seed1 in any::<u64>()) {
        let config = TableConfig::new().with_seeds(seed0, seed1);
        let sut = HashTable::with_config(config, FnOps::new(hash_entry, compare_entry, ())).unwrap();
        run(sut, ops)?;
    }

    #[test]
    fn prop_matches_hash_map_under_collisions(ops in arb_ops(40)) {
        let sut = HashTable::new(FnOps::new(clumped_entry, compare_entry, ())).unwrap();
        run(sut, ops)?;
    }

    #[test]
    fn prop_growth_keeps_every_entry(count in 0usize..2000, capacity in 0usize..300) {
        let config = TableConfig::new().with_capacity(capacity).with_seeds(1, 2);
        let mut sut = HashTable::with_config(config, FnOps::new(hash_entry, compare_entry, ())).unwrap();
        for k in 0..count {
            sut.set((k as u16, k as i32));
        }

        prop_assert_eq!(sut.len(), count);
        prop_assert!(sut.capacity().is_power_of_two());
        prop_assert!(below_threshold(&sut));
        sut.assert_distances();
        for k in 0..count {
            prop_assert_eq!(sut.get(&(k as u16, 0)), Some(&(k as u16, k as i32)));
        }
    }
}
