use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use efosdb::{
    DB, DbOptions, InternalKey, IterOptions, Iterator, IteratorLevel, KeyRange, RangeKey, Result,
    ScanInternalVisitor, SeqNum, WriteBatch,
};
use test_log::test;

fn open_quiet() -> DB {
    DB::open(DbOptions {
        disable_automatic_compactions: true,
        elision_only_compactions: false,
        ..Default::default()
    })
    .unwrap()
}

fn keys(iter: &mut impl Iterator) -> Vec<Bytes> {
    let mut out = Vec::new();
    let mut valid = iter.seek_to_first().unwrap();
    while valid {
        out.push(iter.key());
        valid = iter.next().unwrap();
    }
    out
}

/// Polls `cond` until it holds or five seconds pass.
fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_closing_a_middle_snapshot_schedules_nothing() {
    let db = open_quiet();
    db.put("a", "1").unwrap();
    let mut first = db.new_snapshot();
    db.put("a", "2").unwrap();
    let mut middle = db.new_snapshot();
    db.put("a", "3").unwrap();
    let last = db.new_snapshot();

    middle.close().unwrap();
    assert_eq!(db.statistics().snapshot().elision_only_compactions_scheduled, 0);
    assert_eq!(db.snapshot_seq_nums(), vec![first.seq_num(), last.seq_num()]);

    first.close().unwrap();
    assert_eq!(db.statistics().snapshot().elision_only_compactions_scheduled, 1);
    assert_eq!(db.earliest_snapshot_seq_num(), last.seq_num());
}

#[test]
fn test_elision_only_compaction_drops_unpinned_versions() {
    let db = DB::open(DbOptions {
        disable_automatic_compactions: true,
        ..Default::default()
    })
    .unwrap();
    db.put("a", "1").unwrap();
    let snap = db.new_snapshot();
    db.put("a", "2").unwrap();
    db.flush().unwrap();
    let before = db.live_file_numbers();
    assert_eq!(before.len(), 1);

    drop(snap);
    assert!(wait_until(|| db.statistics().snapshot().num_elision_only_compactions == 1));
    assert!(wait_until(|| db.live_file_numbers() != before));
    assert_eq!(db.num_level_files(0), 1);
    assert_eq!(db.get(b"a").unwrap(), "2");
}

#[derive(Default)]
struct Points(Vec<(Bytes, SeqNum)>);

impl ScanInternalVisitor for Points {
    fn visit_point_key(
        &mut self,
        key: &InternalKey,
        _value: &Bytes,
        _level: IteratorLevel,
    ) -> Result<()> {
        self.0.push((key.user_key().clone(), key.seq_num()));
        Ok(())
    }
}

fn compact_all(db: &DB) {
    for level in 0..6 {
        db.compact_level(level).unwrap();
    }
}

#[test]
fn test_snapshot_pins_versions_through_bottommost_compaction() {
    let db = open_quiet();
    db.put("k", "v1").unwrap();
    let snap = db.new_snapshot();
    db.delete("k").unwrap();
    db.flush().unwrap();

    compact_all(&db);
    assert_eq!(db.num_level_files(6), 1);
    assert_eq!(snap.get(b"k").unwrap(), "v1");
    assert!(db.get(b"k").unwrap_err().is_not_found());

    // Once the snapshot is gone, a compaction into the bottom level elides
    // both the deletion and the value it shadows.
    drop(snap);
    db.put("a", "1").unwrap();
    db.put("z", "1").unwrap();
    db.flush().unwrap();
    compact_all(&db);

    let latest = db.new_snapshot();
    let mut points = Points::default();
    latest
        .scan_internal(&IterOptions::default(), &mut points)
        .unwrap();
    assert_eq!(points.0, vec![(Bytes::from("a"), 3), (Bytes::from("z"), 4)]);
    assert_eq!(db.num_level_files(6), 1);
}

#[test]
fn test_snapshot_hides_later_range_deletion() {
    let db = open_quiet();
    for key in ["a", "b", "c", "d"] {
        db.put(key, "v").unwrap();
    }
    let snap = db.new_snapshot();
    db.delete_range("b", "d").unwrap();

    let mut iter = db.new_iter(&IterOptions::default()).unwrap();
    assert_eq!(keys(&mut iter), vec![Bytes::from("a"), Bytes::from("d")]);
    let mut iter = snap.new_iter(&IterOptions::default()).unwrap();
    assert_eq!(keys(&mut iter).len(), 4);

    db.flush().unwrap();
    db.compact_level(0).unwrap();
    let mut iter = snap.new_iter(&IterOptions::default()).unwrap();
    assert_eq!(keys(&mut iter).len(), 4);
    assert!(db.get(b"c").unwrap_err().is_not_found());
}

#[test]
fn test_iterator_bounds() {
    let db = open_quiet();
    for key in ["a", "b", "c", "d", "e"] {
        db.put(key, key).unwrap();
    }
    let snap = db.new_snapshot();
    db.put("bb", "new").unwrap();

    let mut iter = snap.new_iter(&IterOptions::with_bounds("b", "d")).unwrap();
    assert_eq!(keys(&mut iter), vec![Bytes::from("b"), Bytes::from("c")]);

    assert!(iter.seek_to_last().unwrap());
    assert_eq!(iter.key(), "c");
    assert!(iter.prev().unwrap());
    assert_eq!(iter.key(), "b");
    assert!(!iter.prev().unwrap());

    assert!(iter.seek(b"bb").unwrap());
    assert_eq!(iter.key(), "c");
    assert!(!iter.seek(b"d").unwrap());
}

#[test]
fn test_write_batch_is_atomic_to_snapshots() {
    let db = open_quiet();
    let mut batch = WriteBatch::new();
    batch.set("a", "1");
    batch.set("b", "1");
    batch.delete("c");

    let before = db.new_snapshot();
    db.write(&batch).unwrap();
    let after = db.new_snapshot();

    assert_eq!(after.seq_num(), before.seq_num() + batch.count() as SeqNum);
    assert!(before.get(b"a").unwrap_err().is_not_found());
    assert_eq!(after.get(b"a").unwrap(), "1");
    assert_eq!(after.get(b"b").unwrap(), "1");
}

#[derive(Default)]
struct RangeKeys(Vec<(Bytes, Bytes, Vec<SeqNum>)>);

impl ScanInternalVisitor for RangeKeys {
    fn visit_range_key(&mut self, start: &[u8], end: &[u8], keys: &[RangeKey]) -> Result<()> {
        self.0.push((
            Bytes::copy_from_slice(start),
            Bytes::copy_from_slice(end),
            keys.iter().map(|k| k.seq_num).collect(),
        ));
        Ok(())
    }
}

#[test]
fn test_scan_internal_sees_range_keys_as_of_snapshot() {
    let db = open_quiet();
    db.range_key_set("a", "c", "@1", "x").unwrap();
    let snap = db.new_snapshot();
    db.range_key_set("b", "d", "@2", "y").unwrap();

    let mut visitor = RangeKeys::default();
    snap.scan_internal(&IterOptions::default(), &mut visitor)
        .unwrap();
    assert_eq!(visitor.0, vec![(Bytes::from("a"), Bytes::from("c"), vec![1])]);

    db.flush().unwrap();
    let mut visitor = RangeKeys::default();
    snap.scan_internal(&IterOptions::default(), &mut visitor)
        .unwrap();
    assert_eq!(visitor.0, vec![(Bytes::from("a"), Bytes::from("c"), vec![1])]);
}

#[test]
fn test_automatic_flush_transitions_efos() {
    let db = DB::open(DbOptions {
        write_buffer_size: 1024,
        ..Default::default()
    })
    .unwrap();
    db.put("a", "1").unwrap();
    let efos = db.new_eventually_file_only_snapshot(&[KeyRange::new("a", "b")]);

    let value = vec![b'x'; 128];
    for i in 0..64 {
        db.put(format!("k{i:03}"), value.clone()).unwrap();
    }
    assert!(wait_until(|| efos.is_file_only()));
    assert_eq!(efos.get(b"a").unwrap(), "1");
    assert!(efos.get(b"k000").unwrap_err().is_not_found());
}

#[test]
fn test_excise_rejects_empty_span() {
    let db = open_quiet();
    let err = db.excise(KeyRange::new("b", "a")).unwrap_err();
    assert!(err.message().is_some());
    assert!(db.excise(KeyRange::new("a", "a")).is_err());
}

#[test]
fn test_compact_last_level_is_rejected() {
    let db = open_quiet();
    assert!(db.compact_level(6).is_err());
    assert!(db.compact_level(5).is_ok());
}

#[test]
fn test_excise_removes_data_from_files_and_memtables() {
    let db = open_quiet();
    db.put("a", "1").unwrap();
    db.put("b", "1").unwrap();
    db.flush().unwrap();
    db.put("c", "1").unwrap();
    db.put("d", "1").unwrap();

    db.excise(KeyRange::new("b", "d")).unwrap();
    let mut iter = db.new_iter(&IterOptions::default()).unwrap();
    assert_eq!(keys(&mut iter), vec![Bytes::from("a"), Bytes::from("d")]);
    assert_eq!(db.statistics().snapshot().num_excises, 1);
}

#[test]
fn test_concurrent_snapshots_and_writes() {
    let db = open_quiet();
    db.put("counter", "0").unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            for i in 1..=200 {
                db.put("counter", i.to_string()).unwrap();
            }
        });
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..50 {
                    let snap = db.new_snapshot();
                    let first = snap.get(b"counter").unwrap();
                    let second = snap.get(b"counter").unwrap();
                    assert_eq!(first, second);
                }
            });
        }
    });
    assert_eq!(db.snapshot_count(), 0);
    assert_eq!(db.get(b"counter").unwrap(), "200");
}
