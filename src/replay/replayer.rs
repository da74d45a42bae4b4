//! Snapshot-accelerated stream folding.
//!
//! A replay folds one stream through a [`Reducer`], starting from the
//! best usable snapshot and reading only the chunks past it. Deleted
//! ranges leave index gaps; the [`HoleAction`] policy decides whether a
//! fold crosses them.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::snapshot::{SnapshotError, SnapshotInfo, SnapshotStore};
use crate::store::{Chunk, Index, StoreError, StoreResult, Subscriber};
use crate::stream::{Stream, StreamError};

use super::errors::{ReplayError, ReplayResult};
use super::reducer::Reducer;

/// What a fold does when it crosses a gap in the stream's indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoleAction {
    /// Keep folding past the gap.
    Skip,
    /// End the fold; the state reflects everything before the gap.
    Stop,
}

type HoleHandler = Box<dyn Fn(Index, Index) -> HoleAction + Send + Sync>;

/// Options for one replay run.
#[derive(Default)]
pub struct ReplayOptions {
    /// Fold up to this index inclusive; unbounded when `None`.
    pub to_index: Option<Index>,
    /// Called with the inclusive bounds of each index gap. Without a
    /// handler the fold stops at the first gap.
    pub on_missing: Option<HoleHandler>,
    pub token: CancellationToken,
}

impl ReplayOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn up_to(mut self, to_index: Index) -> Self {
        self.to_index = Some(to_index);
        self
    }

    pub fn on_missing(
        mut self,
        handler: impl Fn(Index, Index) -> HoleAction + Send + Sync + 'static,
    ) -> Self {
        self.on_missing = Some(Box::new(handler));
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }
}

/// Marker used to abort the scan when the reducer fails; the real error
/// is carried on the fold and re-raised by the replayer.
#[derive(Debug, thiserror::Error)]
#[error("Fold halted")]
struct FoldHalt;

struct Fold<'a, R: Reducer> {
    reducer: &'a R,
    state: Option<R::State>,
    next_expected: Index,
    last_applied: Index,
    applied: usize,
    on_missing: Option<&'a HoleHandler>,
    failure: Option<ReplayError>,
}

#[async_trait]
impl<R: Reducer> Subscriber for Fold<'_, R> {
    async fn on_next(&mut self, chunk: Chunk) -> StoreResult<bool> {
        if chunk.index > self.next_expected {
            let action = match self.on_missing {
                Some(handler) => handler(self.next_expected, chunk.index - 1),
                None => HoleAction::Stop,
            };
            if action == HoleAction::Stop {
                return Ok(false);
            }
        }

        let state = match self.state.take() {
            Some(state) => state,
            None => return Err(StoreError::Internal("Fold state missing".to_string())),
        };
        match self.reducer.apply(state, &chunk.payload).await {
            Ok(next) => {
                self.state = Some(next);
                self.last_applied = chunk.index;
                self.next_expected = chunk.index + 1;
                self.applied += 1;
                Ok(true)
            }
            Err(source) => {
                self.failure = Some(ReplayError::Reducer {
                    index: chunk.index,
                    source,
                });
                Err(StoreError::Subscriber(Box::new(FoldHalt)))
            }
        }
    }
}

/// Runs folds, consulting a snapshot store when one is configured.
#[derive(Default)]
pub struct Replayer {
    snapshots: Option<Arc<dyn SnapshotStore>>,
}

impl Replayer {
    /// A replayer with no snapshot store: every fold starts from seed.
    pub fn new() -> Self {
        Self { snapshots: None }
    }

    pub fn with_snapshots(snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            snapshots: Some(snapshots),
        }
    }

    /// Fold `stream` through `reducer`.
    ///
    /// The run seeds from the most recent snapshot whose version does not
    /// exceed the bound and whose schema version matches, reads the
    /// remaining chunks, and persists a fresh snapshot when anything was
    /// applied. A snapshot at exactly the requested bound short-circuits
    /// the read entirely.
    pub async fn run<R: Reducer>(
        &self,
        stream: &mut dyn Stream,
        reducer: &R,
        options: ReplayOptions,
    ) -> ReplayResult<R::State> {
        let snapshot_id = format!("{}/{}", stream.partition_id(), reducer.name());
        let bound = options.to_index.unwrap_or(i64::MAX);

        let snapshot = match &self.snapshots {
            Some(snapshots) => {
                let found = snapshots.get(&snapshot_id, bound).await?;
                match found {
                    Some(info) if info.schema_version != reducer.schema_version() => {
                        debug!(
                            snapshot_id,
                            theirs = %info.schema_version,
                            ours = %reducer.schema_version(),
                            "Ignoring snapshot with different schema version"
                        );
                        None
                    }
                    other => other,
                }
            }
            None => None,
        };

        let (state, start, snapshot_version) = match snapshot {
            Some(info) => {
                let state: R::State =
                    serde_json::from_value(info.payload).map_err(SnapshotError::from)?;
                if options.to_index == Some(info.source_version) {
                    debug!(snapshot_id, version = info.source_version, "Exact snapshot hit");
                    return Ok(state);
                }
                (state, info.source_version + 1, info.source_version)
            }
            None => (reducer.seed(), 1, 0),
        };

        let mut fold = Fold {
            reducer,
            state: Some(state),
            next_expected: start,
            last_applied: snapshot_version,
            applied: 0,
            on_missing: options.on_missing.as_ref(),
            failure: None,
        };
        let read = stream.read(start, bound, &mut fold, &options.token).await;
        if let Some(failure) = fold.failure.take() {
            return Err(failure);
        }
        read?;

        let Some(state) = fold.state else {
            return Err(ReplayError::Stream(StreamError::Store(StoreError::Internal(
                "Fold finished without state".to_string(),
            ))));
        };

        if fold.applied > 0 {
            if let Some(snapshots) = &self.snapshots {
                let payload: Value =
                    serde_json::to_value(&state).map_err(SnapshotError::from)?;
                snapshots
                    .add(SnapshotInfo::new(
                        snapshot_id,
                        fold.last_applied,
                        payload,
                        reducer.schema_version(),
                    ))
                    .await?;
            }
        } else if snapshot_version > 0 {
            // Seeded but read nothing: make sure the stream did not fall
            // behind the snapshot.
            let tail = stream.last_index().await?.unwrap_or(0);
            if tail < snapshot_version {
                return Err(ReplayError::StaleSnapshot {
                    snapshot_id,
                    snapshot_version,
                });
            }
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use crate::replay::ReducerFn;
    use crate::snapshot::ChunkSnapshots;
    use crate::store::{ChunkStore, AUTO_INDEX};
    use crate::stream::PartitionStream;
    use serde_json::json;

    fn sum_reducer() -> ReducerFn<i64, impl Fn(i64, &Value) -> i64 + Send + Sync> {
        ReducerFn::new("sum", 0i64, |acc, payload: &Value| {
            acc + payload.as_i64().unwrap_or(0)
        })
    }

    async fn seed_stream(store: &Arc<MemoryStore>, n: i64) {
        for i in 1..=n {
            store
                .append("numbers", AUTO_INDEX, json!(i), None)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_fold_sums_the_stream() {
        let store = Arc::new(MemoryStore::new());
        seed_stream(&store, 10).await;
        let mut stream =
            PartitionStream::new(store.clone() as Arc<dyn ChunkStore>, "numbers");

        let total = Replayer::new()
            .run(&mut stream, &sum_reducer(), ReplayOptions::new())
            .await
            .unwrap();
        assert_eq!(total, 55);
    }

    #[tokio::test]
    async fn test_bounded_fold_stops_at_index() {
        let store = Arc::new(MemoryStore::new());
        seed_stream(&store, 10).await;
        let mut stream =
            PartitionStream::new(store.clone() as Arc<dyn ChunkStore>, "numbers");

        let total = Replayer::new()
            .run(&mut stream, &sum_reducer(), ReplayOptions::new().up_to(2))
            .await
            .unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_fold_persists_and_reuses_snapshot() {
        let store = Arc::new(MemoryStore::new());
        seed_stream(&store, 10).await;
        let snapshots = Arc::new(ChunkSnapshots::new(store.clone() as Arc<dyn ChunkStore>));
        let replayer = Replayer::with_snapshots(snapshots.clone() as Arc<dyn SnapshotStore>);

        let mut stream =
            PartitionStream::new(store.clone() as Arc<dyn ChunkStore>, "numbers");
        let total = replayer
            .run(&mut stream, &sum_reducer(), ReplayOptions::new())
            .await
            .unwrap();
        assert_eq!(total, 55);

        let stored = snapshots
            .get_last("numbers/sum")
            .await
            .unwrap()
            .expect("snapshot persisted after fold");
        assert_eq!(stored.source_version, 10);

        // Second run folds nothing new and still lands on the same state.
        let total = replayer
            .run(&mut stream, &sum_reducer(), ReplayOptions::new())
            .await
            .unwrap();
        assert_eq!(total, 55);
    }

    #[tokio::test]
    async fn test_reducer_error_carries_the_index() {
        let store = Arc::new(MemoryStore::new());
        seed_stream(&store, 3).await;
        let mut stream =
            PartitionStream::new(store.clone() as Arc<dyn ChunkStore>, "numbers");

        struct Failing;
        #[async_trait]
        impl Reducer for Failing {
            type State = i64;
            fn name(&self) -> &str {
                "failing"
            }
            fn seed(&self) -> i64 {
                0
            }
            async fn apply(
                &self,
                _state: i64,
                payload: &Value,
            ) -> Result<i64, Box<dyn std::error::Error + Send + Sync>> {
                if payload.as_i64() == Some(2) {
                    return Err("boom".into());
                }
                Ok(0)
            }
        }

        let err = Replayer::new()
            .run(&mut stream, &Failing, ReplayOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::Reducer { index: 2, .. }));
    }
}
