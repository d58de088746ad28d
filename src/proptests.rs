use std::collections::HashMap as StdHashMap;
use std::collections::HashSet as StdHashSet;
use std::vec::Vec;

use proptest::prelude::*;

use crate::HashMap;
use crate::HashSet;
use crate::HashTable;

/// Only 48 distinct hashes, spread over the whole word, so groups fill and
/// overflow long before the table grows.
fn crowded_hash(key: u16) -> u64 {
    u64::from(key % 48).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

fn hash_entry(entry: &(u16, u64)) -> u64 {
    crowded_hash(entry.0)
}

fn validate_table<V>(t: &HashTable<V>) {
    let stats = t.debug_stats();
    assert!(
        stats.bucket_count.is_power_of_two(),
        "bucket count must be a power of two: {}",
        stats.bucket_count
    );
    assert_eq!(stats.populated, t.len());
    assert_eq!(
        stats.occupied_slots, stats.populated,
        "every occupied lane must hold exactly one element"
    );
    assert!(
        t.len() <= t.capacity() || (t.len() == 0 && t.capacity() == 0),
        "population {} exceeds capacity {}",
        t.len(),
        t.capacity()
    );
    if stats.total_slots != 0 {
        assert!(
            stats.populated * 8 <= stats.total_slots * 7,
            "load factor above 7/8"
        );
    }
    assert_eq!(t.iter().count(), t.len(), "iteration must visit every element");
}

#[derive(Clone, Debug)]
enum Op {
    Insert(u16, u64),
    Remove(u16),
    Get(u16),
    Reserve(u8),
    EraseOdd,
    Clear,
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let key = 0u16..400;
    let op = prop_oneof![
        50 => (key.clone(), any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
        30 => key.clone().prop_map(Op::Remove),
        15 => key.clone().prop_map(Op::Get),
        3 => any::<u8>().prop_map(Op::Reserve),
        1 => Just(Op::EraseOdd),
        1 => Just(Op::Clear),
    ];
    prop::collection::vec(op, 0..=1500)
}

fn sorted<'a>(values: impl Iterator<Item = &'a u16>) -> Vec<u16> {
    let mut values: Vec<u16> = values.copied().collect();
    values.sort_unstable();
    values
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 20_000,
        .. ProptestConfig::default()
    })]

    #[test]
    #[cfg_attr(miri, ignore)]
    fn prop_table_matches_std(ops in ops_strategy()) {
        let mut t: HashTable<(u16, u64)> = HashTable::new();
        let mut m: StdHashMap<u16, u64> = StdHashMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    let old_t = match t.entry(crowded_hash(key), |e| e.0 == key, hash_entry) {
                        crate::hash_table::Entry::Occupied(mut entry) => {
                            Some(core::mem::replace(&mut entry.get_mut().1, value))
                        }
                        crate::hash_table::Entry::Vacant(entry) => {
                            entry.insert((key, value));
                            None
                        }
                    };
                    let old_m = m.insert(key, value);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Remove(key) => {
                    let old_t = t.remove(crowded_hash(key), |e| e.0 == key).map(|e| e.1);
                    let old_m = m.remove(&key);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Get(key) => {
                    let got_t = t.find(crowded_hash(key), |e| e.0 == key).map(|e| e.1);
                    let got_m = m.get(&key).copied();
                    prop_assert_eq!(got_t, got_m);
                }
                Op::Reserve(additional) => {
                    t.reserve(usize::from(additional), hash_entry);
                    prop_assert!(t.capacity() >= t.len() + usize::from(additional));
                }
                Op::EraseOdd => {
                    let mut cursor = t.first_position();
                    while let Some(position) = cursor {
                        let key = t.get_at(position).map(|e| e.0);
                        cursor = match key {
                            Some(key) if key % 2 == 1 => t.erase(position),
                            _ => t.next_position(position),
                        };
                    }
                    m.retain(|k, _| k % 2 == 0);
                }
                Op::Clear => {
                    t.clear();
                    m.clear();
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        validate_table(&t);
        for key in 0..400u16 {
            let got_t = t.find(crowded_hash(key), |e| e.0 == key).map(|e| e.1);
            prop_assert_eq!(got_t, m.get(&key).copied(), "lookup of {}", key);
        }
        let mut got: Vec<(u16, u64)> = t.iter().copied().collect();
        got.sort_unstable();
        let mut expected: Vec<(u16, u64)> = m.into_iter().collect();
        expected.sort_unstable();
        prop_assert_eq!(got, expected);
        prop_assert_eq!(t.probe_histogram(hash_entry).total(), t.len());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn prop_map_matches_std(ops in ops_strategy()) {
        let mut map: HashMap<u16, u64> = HashMap::new();
        let mut m: StdHashMap<u16, u64> = StdHashMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => prop_assert_eq!(map.insert(key, value), m.insert(key, value)),
                Op::Remove(key) => prop_assert_eq!(map.remove(&key), m.remove(&key)),
                Op::Get(key) => prop_assert_eq!(map.get(&key), m.get(&key)),
                Op::Reserve(additional) => map.reserve(usize::from(additional)),
                Op::EraseOdd => {
                    map.retain(|k, _| k % 2 == 0);
                    m.retain(|k, _| k % 2 == 0);
                }
                Op::Clear => {
                    map.clear();
                    m.clear();
                }
            }
            prop_assert_eq!(map.len(), m.len());
            prop_assert!(map.bucket_count().is_power_of_two());
        }

        for (k, v) in &m {
            prop_assert_eq!(map.get(k), Some(v));
        }
        prop_assert_eq!(map.iter().count(), m.len());
    }

    #[test]
    fn prop_set_algebra_matches_std(
        a in prop::collection::vec(0u16..64, 0..80),
        b in prop::collection::vec(0u16..64, 0..80),
    ) {
        let sa: HashSet<u16> = a.iter().copied().collect();
        let sb: HashSet<u16> = b.iter().copied().collect();
        let ra: StdHashSet<u16> = a.iter().copied().collect();
        let rb: StdHashSet<u16> = b.iter().copied().collect();

        prop_assert_eq!(sorted(sa.union(&sb)), sorted(ra.union(&rb)));
        prop_assert_eq!(
            sorted(sa.intersection(&sb)),
            sorted(ra.intersection(&rb))
        );
        prop_assert_eq!(sorted(sa.difference(&sb)), sorted(ra.difference(&rb)));
        prop_assert_eq!(
            sorted(sa.symmetric_difference(&sb)),
            sorted(ra.symmetric_difference(&rb))
        );
        prop_assert_eq!(sa.is_subset(&sb), ra.is_subset(&rb));
        prop_assert_eq!(sa.is_disjoint(&sb), ra.is_disjoint(&rb));
    }
}

#[test]
fn overflow_pruning_has_no_false_negatives() {
    // Fill one home group's probe chain far past a single group, then punch
    // holes and refill, checking every live key after each step.
    let mut t: HashTable<(u16, u64)> = HashTable::with_capacity(200);
    let mut live = StdHashMap::new();

    for key in 0..150u16 {
        t.insert_unique(crowded_hash(key), (key, u64::from(key)), hash_entry);
        live.insert(key, u64::from(key));
    }
    validate_table(&t);

    for round in 0..10u16 {
        for key in (round..150).step_by(7) {
            if live.remove(&key).is_some() {
                assert!(t.remove(crowded_hash(key), |e| e.0 == key).is_some());
            }
        }
        for key in (150 + round * 10)..(160 + round * 10) {
            t.insert_unique(crowded_hash(key), (key, u64::from(key)), hash_entry);
            live.insert(key, u64::from(key));
        }

        validate_table(&t);
        for key in 0..300u16 {
            let found = t.find(crowded_hash(key), |e| e.0 == key).map(|e| e.1);
            assert_eq!(found, live.get(&key).copied(), "key {key} in round {round}");
        }
    }
}
