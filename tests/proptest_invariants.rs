//! Property-based invariant testing for snapshots.
//!
//! Random operation sequences run against both the engine and a
//! `BTreeMap` model. Every time a snapshot is taken the model is cloned, and
//! at the end every snapshot must read exactly its clone, regardless of the
//! flushes and compactions that happened in between.
//!
//! Proptest saves failing cases to `.proptest-regressions` files, which are
//! replayed before new cases are generated.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use efosdb::{DB, DbOptions, EventuallyFileOnlySnapshot, IterOptions, Iterator, KeyRange, Snapshot};
use proptest::prelude::*;

type Model = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Clone)]
enum Operation {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
    DeleteRange(Vec<u8>, Vec<u8>),
    Snapshot,
    Efos(Vec<u8>, Vec<u8>),
    CloseOldest,
    Flush,
    Compact(usize),
}

fn arbitrary_key() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(b'a'..=b'h', 1..=3)
}

fn arbitrary_value() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=16)
}

fn arbitrary_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        6 => (arbitrary_key(), arbitrary_value()).prop_map(|(k, v)| Operation::Put(k, v)),
        2 => arbitrary_key().prop_map(Operation::Delete),
        1 => (arbitrary_key(), arbitrary_key()).prop_map(|(a, b)| Operation::DeleteRange(a, b)),
        2 => Just(Operation::Snapshot),
        1 => (arbitrary_key(), arbitrary_key()).prop_map(|(a, b)| Operation::Efos(a, b)),
        1 => Just(Operation::CloseOldest),
        1 => Just(Operation::Flush),
        1 => (0usize..6).prop_map(Operation::Compact),
    ]
}

fn open() -> DB {
    DB::open(DbOptions {
        write_buffer_size: 512,
        l0_compaction_trigger: 2,
        ..Default::default()
    })
    .unwrap()
}

fn scan(iter: &mut impl Iterator) -> Model {
    let mut out = Model::new();
    let mut valid = iter.seek_to_first().unwrap();
    while valid {
        out.insert(iter.key().to_vec(), iter.value().to_vec());
        valid = iter.next().unwrap();
    }
    out
}

fn ordered(a: Vec<u8>, b: Vec<u8>) -> Option<(Vec<u8>, Vec<u8>)> {
    match a.cmp(&b) {
        std::cmp::Ordering::Less => Some((a, b)),
        std::cmp::Ordering::Greater => Some((b, a)),
        std::cmp::Ordering::Equal => None,
    }
}

/// Runs `ops`, returning the open snapshots and EFOSes with the model each
/// must observe.
#[allow(clippy::type_complexity)]
fn run(
    db: &DB,
    ops: Vec<Operation>,
) -> (Vec<(Snapshot, Model)>, Vec<(EventuallyFileOnlySnapshot, KeyRange, Model)>) {
    let mut model = Model::new();
    let mut snapshots: Vec<(Snapshot, Model)> = Vec::new();
    let mut efoses = Vec::new();

    for op in ops {
        match op {
            Operation::Put(k, v) => {
                db.put(k.clone(), v.clone()).unwrap();
                model.insert(k, v);
            }
            Operation::Delete(k) => {
                db.delete(k.clone()).unwrap();
                model.remove(&k);
            }
            Operation::DeleteRange(a, b) => {
                if let Some((start, end)) = ordered(a, b) {
                    db.delete_range(start.clone(), end.clone()).unwrap();
                    model.retain(|k, _| !(k >= &start && k < &end));
                }
            }
            Operation::Snapshot => snapshots.push((db.new_snapshot(), model.clone())),
            Operation::Efos(a, b) => {
                if let Some((start, end)) = ordered(a, b) {
                    let range = KeyRange::new(start, end);
                    let efos = db.new_eventually_file_only_snapshot(std::slice::from_ref(&range));
                    efoses.push((efos, range, model.clone()));
                }
            }
            Operation::CloseOldest => {
                if !snapshots.is_empty() {
                    let (mut snap, _) = snapshots.remove(0);
                    snap.close().unwrap();
                }
            }
            Operation::Flush => db.flush().unwrap(),
            Operation::Compact(level) => db.compact_level(level).unwrap(),
        }
    }
    (snapshots, efoses)
}

fn within(model: &Model, range: &KeyRange) -> Model {
    model
        .iter()
        .filter(|(k, _)| range.contains(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_snapshot_reads_match_model(
        ops in prop::collection::vec(arbitrary_operation(), 1..=120)
    ) {
        let db = open();
        let (snapshots, efoses) = run(&db, ops);

        for (snap, expected) in &snapshots {
            let mut iter = snap.new_iter(&IterOptions::default()).unwrap();
            prop_assert_eq!(&scan(&mut iter), expected, "snapshot at {}", snap.seq_num());
            for (k, v) in expected {
                prop_assert_eq!(snap.get(k).unwrap(), Bytes::copy_from_slice(v));
            }
        }

        for (efos, range, expected) in &efoses {
            efos.wait_for_file_only_snapshot(Duration::ZERO).unwrap();
            prop_assert!(efos.is_file_only());
            let options = IterOptions::with_bounds(range.start.clone(), range.end.clone());
            let mut iter = efos.new_iter(&options).unwrap();
            prop_assert_eq!(scan(&mut iter), within(expected, range));
        }

        drop(snapshots);
        drop(efoses);
        prop_assert_eq!(db.snapshot_count(), 0);
    }
}

/// Applies the writes, flushes and compactions of `ops`, then fully
/// compacts and checks the latest state against the model.
fn check_latest_state(ops: Vec<Operation>) -> Result<(), TestCaseError> {
    let db = open();
    let mut model = Model::new();
    for op in ops {
        match op {
            Operation::Put(k, v) => {
                db.put(k.clone(), v.clone()).unwrap();
                model.insert(k, v);
            }
            Operation::Delete(k) => {
                db.delete(k.clone()).unwrap();
                model.remove(&k);
            }
            Operation::DeleteRange(a, b) => {
                if let Some((start, end)) = ordered(a, b) {
                    db.delete_range(start.clone(), end.clone()).unwrap();
                    model.retain(|k, _| !(k >= &start && k < &end));
                }
            }
            Operation::Compact(level) => db.compact_level(level).unwrap(),
            _ => db.flush().unwrap(),
        }
    }

    db.flush().unwrap();
    for level in 0..6 {
        db.compact_level(level).unwrap();
    }
    let mut iter = db.new_iter(&IterOptions::default()).unwrap();
    prop_assert_eq!(scan(&mut iter), model);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_compaction_preserves_latest_state(
        ops in prop::collection::vec(arbitrary_operation(), 1..=120)
    ) {
        check_latest_state(ops)?;
    }
}

/// A range deletion compacted into level 1 must survive a later level 0
/// compaction that pulls it in while a covered key still sits at level 2.
#[test]
fn test_range_deletion_survives_narrow_level_zero_compaction() {
    use Operation::*;
    let ops = vec![
        Put(b"gcg".to_vec(), b"old".to_vec()),
        Flush,
        Compact(0),
        Compact(1),
        DeleteRange(b"a".to_vec(), b"h".to_vec()),
        Put(b"b".to_vec(), b"1".to_vec()),
        Flush,
        Compact(0),
        Put(b"b".to_vec(), b"2".to_vec()),
        Flush,
        Compact(0),
    ];
    check_latest_state(ops).unwrap();
}
