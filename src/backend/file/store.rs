//! Durable single-file backend adapter.
//!
//! One append-only log file holds every committed write. Appends are
//! acknowledged only after `sync_all`; the in-memory [`ChunkIndex`] is the
//! read path and is rebuilt from the log on open. A failed append rolls
//! the file back to its acknowledged length; if that rollback cannot be
//! confirmed the store closes to writes, since anything appended behind
//! torn bytes would be truncated away on the next open. A torn tail left
//! by a crash mid-write is truncated during recovery; everything before
//! it survives.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::records::{FileHeader, LogRecord, StoredChunk};
use crate::backend::index::{ChunkIndex, ConflictKind};
use crate::backend::scan::deliver;
use crate::backend::sequence::{LocalSequence, SequenceAllocator};
use crate::store::{
    AppendOutcome, Chunk, ChunkStore, Index, JsonCodec, PayloadCodec, Position, StoreError,
    StoreResult, Subscriber, WriteOutcome, WriteRequest,
};

/// Name of the log file inside the store directory.
pub const LOG_FILE: &str = "chunks.silt";

/// Tuning for [`FileStore`].
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Attempts at recomputing a backend-assigned index after an index
    /// collision before the conflict is surfaced.
    pub max_index_retries: u32,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            max_index_retries: 10,
        }
    }
}

/// Store-wide summary, as reported by the inspection binary.
#[derive(Debug, Clone, Serialize)]
pub struct FileStoreStats {
    pub chunks: usize,
    pub partitions: usize,
    pub last_position: Position,
    pub file_bytes: u64,
    pub created_at: String,
}

/// Per-partition summary.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStats {
    pub partition_id: String,
    pub chunks: usize,
    pub last_index: Index,
}

/// Injected failure for the next durable write, for durability tests.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
enum WriteFault {
    /// The write tears mid-record; the rollback succeeds.
    Torn,
    /// The write tears mid-record and the rollback fails too.
    TornAndStuck,
}

struct FileInner {
    file: File,
    index: ChunkIndex,
    /// Byte length of the acknowledged prefix of the log. Everything
    /// past it is rolled back after a failed write.
    durable_len: u64,
    /// Set when a failed write could not be rolled back. The append
    /// handle would place every later write behind the torn bytes,
    /// where recovery truncates it away.
    closed: bool,
    #[cfg(test)]
    fault: Option<WriteFault>,
}

impl FileInner {
    fn new(file: File, index: ChunkIndex, durable_len: u64) -> Self {
        Self {
            file,
            index,
            durable_len,
            closed: false,
            #[cfg(test)]
            fault: None,
        }
    }

    /// Write and fsync before anything is committed to the index. A
    /// failed write is rolled back to the acknowledged prefix before the
    /// error surfaces; an unconfirmed rollback closes the store to
    /// writes, so no acknowledged append can ever land behind torn bytes.
    fn write(&mut self, bytes: &[u8]) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::Closed {
                reason: "an earlier write failure could not be rolled back".to_string(),
            });
        }
        match self.try_write(bytes) {
            Ok(()) => {
                self.durable_len += bytes.len() as u64;
                Ok(())
            }
            Err(e) => {
                match self.restore_tail() {
                    Ok(()) => {
                        warn!(
                            durable_len = self.durable_len,
                            error = %e,
                            "Write failed, log rolled back to its acknowledged length"
                        );
                    }
                    Err(rollback) => {
                        self.closed = true;
                        error!(
                            durable_len = self.durable_len,
                            error = %rollback,
                            "Torn write could not be rolled back, store closed to writes"
                        );
                    }
                }
                Err(e.into())
            }
        }
    }

    fn try_write(&mut self, bytes: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        self.fault_write(bytes)?;
        self.file.write_all(bytes)?;
        self.file.sync_all()
    }

    /// Drop whatever a failed write left past the acknowledged prefix.
    fn restore_tail(&mut self) -> io::Result<()> {
        #[cfg(test)]
        self.fault_restore()?;
        self.file.set_len(self.durable_len)?;
        self.file.sync_all()
    }
}

#[cfg(test)]
impl FileInner {
    /// Leave half a record behind, the state a failed `write_all` leaves.
    fn fault_write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.fault.is_some() {
            self.file.write_all(&bytes[..bytes.len() / 2])?;
            self.file.sync_all()?;
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        Ok(())
    }

    fn fault_restore(&mut self) -> io::Result<()> {
        match self.fault.take() {
            Some(WriteFault::TornAndStuck) => Err(io::Error::new(
                io::ErrorKind::Other,
                "injected rollback failure",
            )),
            _ => Ok(()),
        }
    }
}

/// Durable embedded store over one log file.
pub struct FileStore {
    path: PathBuf,
    created_at: String,
    inner: Mutex<FileInner>,
    sequence: Arc<dyn SequenceAllocator>,
    codec: Arc<dyn PayloadCodec>,
    config: FileStoreConfig,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("created_at", &self.created_at)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct Recovered {
    index: ChunkIndex,
    tail: Position,
    created_at: String,
}

impl FileStore {
    /// Open or create a store in `dir` with the default configuration,
    /// JSON payload codec and a local position counter.
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with(
            dir,
            FileStoreConfig::default(),
            Arc::new(JsonCodec),
            Arc::new(LocalSequence::new()),
        )
        .await
    }

    pub async fn open_with(
        dir: impl AsRef<Path>,
        config: FileStoreConfig,
        codec: Arc<dyn PayloadCodec>,
        sequence: Arc<dyn SequenceAllocator>,
    ) -> StoreResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE);

        let recovered = Self::recover(&path, codec.as_ref())?;
        sequence.resync(recovered.tail).await?;

        let file = OpenOptions::new().append(true).open(&path)?;
        let durable_len = file.metadata()?.len();
        Ok(Self {
            path,
            created_at: recovered.created_at,
            inner: Mutex::new(FileInner::new(file, recovered.index, durable_len)),
            sequence,
            codec,
            config,
        })
    }

    /// Replay the log into a fresh index. The recovered tail is the
    /// highest position ever written, deleted chunks included, so the
    /// allocator never reuses a position.
    fn recover(path: &Path, codec: &dyn PayloadCodec) -> StoreResult<Recovered> {
        if !path.exists() {
            return Self::create(path);
        }
        let data = fs::read(path)?;
        if data.is_empty() {
            // Crashed between file creation and the header write.
            return Self::create(path);
        }

        let (header, header_len) =
            FileHeader::deserialize(&data).map_err(|e| StoreError::Corrupt {
                offset: 0,
                reason: e.to_string(),
            })?;

        let mut index = ChunkIndex::new();
        let mut tail: Position = 0;
        let mut offset = header_len;
        while offset < data.len() {
            match LogRecord::deserialize(&data[offset..]) {
                Ok((LogRecord::Chunk(stored), consumed)) => {
                    let payload = codec.decode(&stored.payload, &stored.codec)?;
                    tail = tail.max(stored.position);
                    index.commit(Chunk {
                        position: stored.position,
                        partition_id: stored.partition_id,
                        index: stored.index,
                        operation_id: stored.operation_id,
                        payload,
                    });
                    offset += consumed;
                }
                Ok((
                    LogRecord::Delete {
                        partition_id,
                        from_index,
                        to_index,
                    },
                    consumed,
                )) => {
                    index.delete_range(&partition_id, from_index, to_index);
                    offset += consumed;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        offset,
                        error = %e,
                        "Truncating torn log tail"
                    );
                    let file = OpenOptions::new().write(true).open(path)?;
                    file.set_len(offset as u64)?;
                    file.sync_all()?;
                    break;
                }
            }
        }

        Ok(Recovered {
            index,
            tail,
            created_at: header.created_at,
        })
    }

    fn create(path: &Path) -> StoreResult<Recovered> {
        let created_at = Utc::now().to_rfc3339();
        let header = FileHeader::new(created_at.clone());
        let mut file = OpenOptions::new().create(true).write(true).open(path)?;
        file.write_all(&header.serialize())?;
        file.sync_all()?;
        if let Some(dir) = path.parent() {
            File::open(dir)?.sync_all()?;
        }
        Ok(Recovered {
            index: ChunkIndex::new(),
            tail: 0,
            created_at,
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, FileInner>> {
        self.inner.lock().map_err(|_| StoreError::poisoned())
    }

    /// Encode a chunk for the log.
    fn frame(&self, chunk: &Chunk, payload_bytes: Vec<u8>) -> Vec<u8> {
        LogRecord::Chunk(StoredChunk {
            position: chunk.position,
            partition_id: chunk.partition_id.clone(),
            index: chunk.index,
            operation_id: chunk.operation_id.clone(),
            codec: self.codec.tag().to_string(),
            payload: payload_bytes,
        })
        .serialize()
    }

    /// Persist and commit a filler for a position that cannot carry its
    /// logical write.
    fn write_filler(&self, inner: &mut FileInner, position: Position) -> StoreResult<()> {
        let filler = Chunk::filler(position);
        let payload_bytes = self.codec.encode(&filler.payload)?;
        let bytes = self.frame(&filler, payload_bytes);
        inner.write(&bytes)?;
        inner.index.commit(filler);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn stats(&self) -> StoreResult<FileStoreStats> {
        let inner = self.lock()?;
        Ok(FileStoreStats {
            chunks: inner.index.len(),
            partitions: inner.index.partition_stats().len(),
            last_position: inner.index.last_position(),
            file_bytes: inner.file.metadata()?.len(),
            created_at: self.created_at.clone(),
        })
    }

    pub async fn partitions(&self) -> StoreResult<Vec<PartitionStats>> {
        let inner = self.lock()?;
        Ok(inner
            .index
            .partition_stats()
            .into_iter()
            .map(|(partition_id, chunks, last_index)| PartitionStats {
                partition_id,
                chunks,
                last_index,
            })
            .collect())
    }

    /// Make the next durable write fail, for durability tests.
    #[cfg(test)]
    fn inject_write_fault(&self, fault: WriteFault) {
        self.lock().expect("store lock").fault = Some(fault);
    }
}

#[async_trait]
impl ChunkStore for FileStore {
    async fn append(
        &self,
        partition_id: &str,
        index: Index,
        payload: Value,
        operation_id: Option<String>,
    ) -> StoreResult<AppendOutcome> {
        let operation_id = operation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let auto = index < 0;
        let payload_bytes = self.codec.encode(&payload)?;
        let position = self.sequence.allocate().await?;
        let mut candidate = if auto {
            self.lock()?.index.last_index(partition_id) + 1
        } else {
            index
        };

        let mut attempt = 0u32;
        loop {
            let final_attempt = !auto || attempt >= self.config.max_index_retries;
            let chunk = Chunk {
                position,
                partition_id: partition_id.to_string(),
                index: candidate,
                operation_id: operation_id.clone(),
                payload: payload.clone(),
            };
            let bytes = self.frame(&chunk, payload_bytes.clone());

            let conflict = {
                let mut inner = self.lock()?;
                let conflict = inner.index.check(partition_id, chunk.index, &operation_id);
                match conflict {
                    None => {
                        inner.write(&bytes)?;
                        inner.index.commit(chunk.clone());
                    }
                    Some(ConflictKind::Operation) => self.write_filler(&mut inner, position)?,
                    Some(ConflictKind::Index) => {
                        if final_attempt {
                            self.write_filler(&mut inner, position)?;
                        } else {
                            candidate = inner.index.last_index(partition_id) + 1;
                        }
                    }
                }
                conflict
            };

            match conflict {
                None => return Ok(AppendOutcome::Applied(chunk)),
                Some(ConflictKind::Operation) => {
                    debug!(
                        partition_id,
                        operation_id, position, "Duplicate operation, filler written"
                    );
                    return Ok(AppendOutcome::AlreadyApplied);
                }
                Some(ConflictKind::Index) if final_attempt => {
                    return Err(StoreError::DuplicateStreamIndex {
                        partition_id: chunk.partition_id,
                        index: chunk.index,
                    });
                }
                Some(ConflictKind::Index) => {
                    attempt += 1;
                    debug!(partition_id, candidate, attempt, "Index collision, retrying");
                }
            }
        }
    }

    async fn read_forward(
        &self,
        partition_id: &str,
        from_index: Index,
        to_index: Index,
        limit: Option<usize>,
        subscriber: &mut dyn Subscriber,
        token: &CancellationToken,
    ) -> StoreResult<()> {
        let page = self
            .lock()?
            .index
            .page_forward(partition_id, from_index, to_index, limit);
        deliver(subscriber, from_index, page, |c| c.index, token).await
    }

    async fn read_backward(
        &self,
        partition_id: &str,
        from_index: Index,
        to_index: Index,
        limit: Option<usize>,
        subscriber: &mut dyn Subscriber,
        token: &CancellationToken,
    ) -> StoreResult<()> {
        let page = self
            .lock()?
            .index
            .page_backward(partition_id, from_index, to_index, limit);
        deliver(subscriber, from_index, page, |c| c.index, token).await
    }

    async fn read_last_chunk(
        &self,
        partition_id: &str,
        max_index: Index,
    ) -> StoreResult<Option<Chunk>> {
        Ok(self.lock()?.index.last_chunk(partition_id, max_index))
    }

    async fn read_all(
        &self,
        from_position: Position,
        limit: Option<usize>,
        subscriber: &mut dyn Subscriber,
        token: &CancellationToken,
    ) -> StoreResult<()> {
        let page = self.lock()?.index.page_all(from_position, limit);
        deliver(subscriber, from_position, page, |c| c.position, token).await
    }

    async fn read_last_position(&self) -> StoreResult<Position> {
        Ok(self.lock()?.index.last_position())
    }

    async fn delete(
        &self,
        partition_id: &str,
        from_index: Index,
        to_index: Index,
    ) -> StoreResult<()> {
        let bytes = LogRecord::Delete {
            partition_id: partition_id.to_string(),
            from_index,
            to_index,
        }
        .serialize();

        let mut inner = self.lock()?;
        if !inner.index.delete_matches(partition_id, from_index, to_index) {
            return Err(StoreError::DeleteEmpty {
                partition_id: partition_id.to_string(),
                from: from_index,
                to: to_index,
            });
        }
        inner.write(&bytes)?;
        let removed = inner.index.delete_range(partition_id, from_index, to_index);
        debug!(partition_id, removed = removed.len(), "Deleted index range");
        Ok(())
    }

    async fn read_by_operation_id(
        &self,
        partition_id: &str,
        operation_id: &str,
    ) -> StoreResult<Option<Chunk>> {
        Ok(self.lock()?.index.find_operation(partition_id, operation_id))
    }

    async fn append_batch(
        &self,
        requests: Vec<WriteRequest>,
        token: &CancellationToken,
    ) -> StoreResult<Vec<WriteOutcome>> {
        if token.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let mut positions = Vec::with_capacity(requests.len());
        for _ in &requests {
            positions.push(self.sequence.allocate().await?);
        }

        let mut inner = self.lock()?;
        let mut frames: Vec<u8> = Vec::new();
        let mut outcomes = Vec::with_capacity(requests.len());
        let mut staged: Vec<Chunk> = Vec::new();

        for (request, position) in requests.into_iter().zip(positions) {
            let operation_id = request
                .operation_id
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let index = if request.index < 0 {
                inner.index.last_index(&request.partition_id) + 1
            } else {
                request.index
            };
            let conflict = inner.index.check(&request.partition_id, index, &operation_id);
            let (chunk, outcome) = match conflict {
                None => {
                    let chunk = Chunk {
                        position,
                        partition_id: request.partition_id,
                        index,
                        operation_id,
                        payload: request.payload,
                    };
                    (chunk.clone(), WriteOutcome::Applied(chunk))
                }
                Some(ConflictKind::Operation) => {
                    (Chunk::filler(position), WriteOutcome::DuplicateOperation)
                }
                Some(ConflictKind::Index) => {
                    (Chunk::filler(position), WriteOutcome::DuplicateIndex)
                }
            };

            let payload_bytes = match self.codec.encode(&chunk.payload) {
                Ok(bytes) => bytes,
                Err(e) => {
                    rollback(&mut inner.index, &staged);
                    return Err(e);
                }
            };
            frames.extend_from_slice(&self.frame(&chunk, payload_bytes));
            inner.index.commit(chunk.clone());
            staged.push(chunk);
            outcomes.push(outcome);
        }

        // One write and one fsync for the whole batch.
        if let Err(e) = inner.write(&frames) {
            rollback(&mut inner.index, &staged);
            return Err(e);
        }
        Ok(outcomes)
    }
}

/// Undo index commits for a batch whose durable write failed.
fn rollback(index: &mut ChunkIndex, staged: &[Chunk]) {
    for chunk in staged {
        index.delete_range(&chunk.partition_id, chunk.index, chunk.index);
    }
}
