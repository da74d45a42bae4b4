//! Snapshot-Accelerated Replay Tests
//!
//! Snapshots must only ever shorten a fold, never change its answer:
//! - Resuming applies exactly the chunks past the snapshot version
//! - A snapshot at the requested bound answers without reading at all
//! - A snapshot beyond the bound is ignored, as is a schema mismatch
//! - A snapshot ahead of its stream's tail is reported as stale
//! - A fold that applied anything refreshes the snapshot at the tail

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use siltdb::backend::MemoryStore;
use siltdb::replay::{ReducerFn, ReplayError, ReplayOptions, Replayer};
use siltdb::snapshot::{ChunkSnapshots, SnapshotInfo, SnapshotStore};
use siltdb::store::{ChunkStore, AUTO_INDEX};
use siltdb::stream::PartitionStream;

// =============================================================================
// Test Utilities
// =============================================================================

struct Fixture {
    store: Arc<dyn ChunkStore>,
    snapshots: Arc<ChunkSnapshots>,
    replayer: Replayer,
    applied: Arc<AtomicUsize>,
}

impl Fixture {
    async fn with_numbers(n: i64) -> Self {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        for i in 1..=n {
            store
                .append("numbers", AUTO_INDEX, json!(i), None)
                .await
                .expect("append");
        }
        let snapshots = Arc::new(ChunkSnapshots::new(Arc::clone(&store)));
        let replayer =
            Replayer::with_snapshots(Arc::clone(&snapshots) as Arc<dyn SnapshotStore>);
        Self {
            store,
            snapshots,
            replayer,
            applied: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A summing reducer that counts how many chunks it actually applied.
    fn counting_sum(&self) -> ReducerFn<i64, impl Fn(i64, &Value) -> i64 + Send + Sync> {
        let applied = Arc::clone(&self.applied);
        ReducerFn::new("sum", 0i64, move |acc, payload: &Value| {
            applied.fetch_add(1, Ordering::SeqCst);
            acc + payload.as_i64().unwrap_or(0)
        })
    }

    fn stream(&self) -> PartitionStream {
        PartitionStream::new(Arc::clone(&self.store), "numbers")
    }

    fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Resume Semantics
// =============================================================================

#[tokio::test]
async fn test_snapshot_resume_applies_only_the_tail() {
    let fixture = Fixture::with_numbers(10).await;
    fixture
        .snapshots
        .add(SnapshotInfo::new("numbers/sum", 9, json!(45), "1"))
        .await
        .expect("seed snapshot");

    let mut stream = fixture.stream();
    let total = fixture
        .replayer
        .run(&mut stream, &fixture.counting_sum(), ReplayOptions::new())
        .await
        .expect("fold");

    assert_eq!(total, 55);
    assert_eq!(fixture.applied(), 1, "only chunk 10 was applied");
}

#[tokio::test]
async fn test_snapshot_at_the_bound_reads_nothing() {
    let fixture = Fixture::with_numbers(10).await;
    fixture
        .snapshots
        .add(SnapshotInfo::new("numbers/sum", 10, json!(55), "1"))
        .await
        .expect("seed snapshot");

    let mut stream = fixture.stream();
    let total = fixture
        .replayer
        .run(
            &mut stream,
            &fixture.counting_sum(),
            ReplayOptions::new().up_to(10),
        )
        .await
        .expect("fold");

    assert_eq!(total, 55);
    assert_eq!(fixture.applied(), 0, "exact snapshot hit short-circuits");
}

#[tokio::test]
async fn test_snapshot_beyond_the_bound_is_ignored() {
    let fixture = Fixture::with_numbers(11).await;
    fixture
        .snapshots
        .add(SnapshotInfo::new("numbers/sum", 11, json!(66), "1"))
        .await
        .expect("seed snapshot");

    let mut stream = fixture.stream();
    let total = fixture
        .replayer
        .run(
            &mut stream,
            &fixture.counting_sum(),
            ReplayOptions::new().up_to(10),
        )
        .await
        .expect("fold");

    // A state from past the bound would be wrong; the fold starts over.
    assert_eq!(total, 55);
    assert_eq!(fixture.applied(), 10);
}

#[tokio::test]
async fn test_schema_mismatch_falls_back_to_full_fold() {
    let fixture = Fixture::with_numbers(10).await;
    fixture
        .snapshots
        .add(SnapshotInfo::new("numbers/sum", 9, json!(45), "1"))
        .await
        .expect("seed snapshot");

    let applied = Arc::clone(&fixture.applied);
    let reducer = ReducerFn::new("sum", 0i64, move |acc, payload: &Value| {
        applied.fetch_add(1, Ordering::SeqCst);
        acc + payload.as_i64().unwrap_or(0)
    })
    .with_schema_version("2");

    let mut stream = fixture.stream();
    let total = fixture
        .replayer
        .run(&mut stream, &reducer, ReplayOptions::new())
        .await
        .expect("fold");
    assert_eq!(total, 55);
    assert_eq!(fixture.applied(), 10, "schema mismatch voids the snapshot");

    // The refreshed snapshot carries the new schema version.
    let refreshed = fixture
        .snapshots
        .get_last("numbers/sum")
        .await
        .expect("get")
        .expect("snapshot refreshed");
    assert_eq!(refreshed.schema_version, "2");
    assert_eq!(refreshed.source_version, 10);
}

// =============================================================================
// Persistence And Staleness
// =============================================================================

#[tokio::test]
async fn test_fold_persists_a_snapshot_at_the_tail() {
    let fixture = Fixture::with_numbers(10).await;
    let mut stream = fixture.stream();
    fixture
        .replayer
        .run(&mut stream, &fixture.counting_sum(), ReplayOptions::new())
        .await
        .expect("fold");

    let stored = fixture
        .snapshots
        .get_last("numbers/sum")
        .await
        .expect("get")
        .expect("persisted");
    assert_eq!(stored.source_version, 10);
    assert_eq!(stored.payload, json!(55));

    // The next run rides the snapshot instead of re-reading history.
    let total = fixture
        .replayer
        .run(&mut stream, &fixture.counting_sum(), ReplayOptions::new())
        .await
        .expect("second fold");
    assert_eq!(total, 55);
    assert_eq!(fixture.applied(), 10, "second fold applied nothing new");
}

#[tokio::test]
async fn test_snapshot_ahead_of_its_stream_is_stale() {
    let fixture = Fixture::with_numbers(10).await;
    let mut stream = fixture.stream();
    fixture
        .replayer
        .run(&mut stream, &fixture.counting_sum(), ReplayOptions::new())
        .await
        .expect("first fold");

    // The stream vanishes; its snapshot survives.
    fixture
        .store
        .delete("numbers", 1, i64::MAX)
        .await
        .expect("delete stream");

    let err = fixture
        .replayer
        .run(&mut stream, &fixture.counting_sum(), ReplayOptions::new())
        .await
        .expect_err("snapshot is ahead of the deleted stream");
    assert!(matches!(
        err,
        ReplayError::StaleSnapshot {
            snapshot_version: 10,
            ..
        }
    ));
}
