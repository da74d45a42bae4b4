//! Scan delivery loop shared by the embedded backends.

use tokio_util::sync::CancellationToken;

use crate::store::{Chunk, StoreError, StoreResult, Subscriber};

/// Push an already-collected page through the subscriber protocol.
///
/// `key` extracts the value reported to the lifecycle hooks: the partition
/// index for partition scans, the global position for log scans. Backends
/// collect pages under their state lock and deliver here without holding
/// it, so consumers can take their time.
pub(crate) async fn deliver<K>(
    subscriber: &mut dyn Subscriber,
    start: i64,
    chunks: Vec<Chunk>,
    key: K,
    token: &CancellationToken,
) -> StoreResult<()>
where
    K: Fn(&Chunk) -> i64,
{
    if token.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    subscriber.on_start(start).await?;
    let mut last = start;
    for chunk in chunks {
        if token.is_cancelled() {
            subscriber.on_stopped(last).await?;
            return Ok(());
        }
        let at = key(&chunk);
        match subscriber.on_next(chunk).await {
            Ok(true) => last = at,
            Ok(false) => {
                subscriber.on_stopped(at).await?;
                return Ok(());
            }
            Err(err) => {
                subscriber.on_error(at, &err).await;
                return Err(err);
            }
        }
    }
    subscriber.on_completed(last).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Collector;
    use serde_json::json;

    fn chunks(indexes: &[i64]) -> Vec<Chunk> {
        indexes
            .iter()
            .map(|i| Chunk {
                position: *i,
                partition_id: "p".to_string(),
                index: *i,
                operation_id: format!("op-{i}"),
                payload: json!(i),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_deliver_all_then_complete() {
        let mut collector = Collector::new();
        let token = CancellationToken::new();
        deliver(&mut collector, 1, chunks(&[1, 2, 3]), |c| c.index, &token)
            .await
            .unwrap();
        assert_eq!(collector.indexes(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_cancelled_at_entry_fails_fast() {
        let mut collector = Collector::new();
        let token = CancellationToken::new();
        token.cancel();
        let err = deliver(&mut collector, 1, chunks(&[1]), |c| c.index, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
        assert!(collector.is_empty());
    }
}
