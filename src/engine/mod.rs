//! # Engine
//!
//! The public face of the crate. One engine sits on top of one log and
//! owns the index store, the builder and the indexes directory. Opening
//! loads the three core indexes eagerly and registers every other index
//! file header-only; bodies load the first time a query references them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use crate::builder::Builder;
use crate::codec::CodecRef;
use crate::errors::{JetError, Result};
use crate::live::{LivePump, LiveQuery};
use crate::log::LogRef;
use crate::paginate::{Materializer, QueryPage};
use crate::persist::{
    index_path, list_index_files, load_f64, load_u32, read_header, remove_file, save_f64,
    save_u32,
};
use crate::progress::{Progress, ProgressSnapshot};
use crate::query::resolver::Resolver;
use crate::query::{validate_live, Operation};
use crate::store::{
    CoreIndex, F64Arr, IndexEntry, Registry, U32Arr, OFFSET_INDEX, SEQUENCE_INDEX,
    TIMESTAMP_INDEX,
};

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the persisted index files
    pub indexes_dir: PathBuf,
    /// Persist intermediate index state every this many scanned records
    pub save_every: u32,
    /// Minimum delay between two progress updates
    pub progress_interval: Duration,
    /// Buffered records per live query
    pub live_capacity: usize,
}

impl EngineConfig {
    pub fn new(indexes_dir: impl Into<PathBuf>) -> Self {
        Self {
            indexes_dir: indexes_dir.into(),
            save_every: 65_536,
            progress_interval: Duration::from_secs(1),
            live_capacity: 64,
        }
    }
}

/// Just-in-time index engine over one append-only log
pub struct Engine {
    log: LogRef,
    codec: CodecRef,
    store: Arc<RwLock<Registry>>,
    builder: Builder,
    resolver: Resolver,
    materializer: Materializer,
    progress: Progress,
    config: EngineConfig,
}

impl Engine {
    /// Opens an engine over `log`, creating the indexes directory if
    /// needed and picking up whatever index files a previous instance
    /// left behind. A corrupt core index fails the open; corrupt derived
    /// indexes surface when first referenced.
    pub async fn open(log: LogRef, codec: CodecRef, config: EngineConfig) -> Result<Engine> {
        let dir = config.indexes_dir.clone();
        let registry = tokio::task::spawn_blocking(move || open_registry(&dir))
            .await
            .map_err(|e| JetError::Io(format!("index open task failed: {e}")))??;

        let store = Arc::new(RwLock::new(registry));
        let progress = Progress::new(config.progress_interval);
        let builder = Builder::new(
            Arc::clone(&log),
            Arc::clone(&codec),
            Arc::clone(&store),
            progress.clone(),
            config.indexes_dir.clone(),
            config.save_every,
        );
        let resolver = Resolver::new(
            Arc::clone(&store),
            builder.clone(),
            Arc::clone(&log),
            Arc::clone(&codec),
        );
        let materializer = Materializer::new(Arc::clone(&store), Arc::clone(&log), Arc::clone(&codec));

        info!(dir = %config.indexes_dir.display(), "index engine opened");
        Ok(Engine {
            log,
            codec,
            store,
            builder,
            resolver,
            materializer,
            progress,
            config,
        })
    }

    /// Resolves `op` and returns one page of matches ordered by timestamp
    pub async fn paginate(
        &self,
        op: &Operation,
        page_start: u64,
        limit: Option<u64>,
        descending: bool,
    ) -> Result<QueryPage> {
        let started = Instant::now();
        let bits = self.resolver.resolve(op).await?;
        self.materializer
            .page(&bits, page_start, limit, descending, started)
            .await
    }

    /// Resolves `op` and returns every match ordered by timestamp
    pub async fn all(&self, op: &Operation, descending: bool) -> Result<QueryPage> {
        self.paginate(op, 0, None, descending).await
    }

    /// Number of matching offsets, without materializing any record
    pub async fn count(&self, op: &Operation) -> Result<u64> {
        let bits = self.resolver.resolve(op).await?;
        Ok(bits.cardinality())
    }

    /// The `k` best-ranked matches by timestamp, selected with a bounded
    /// heap instead of a full sort
    pub async fn top(&self, op: &Operation, k: usize, descending: bool) -> Result<QueryPage> {
        let started = Instant::now();
        let bits = self.resolver.resolve(op).await?;
        self.materializer.top(&bits, k, descending, started).await
    }

    /// Starts a live query. The tree's indexes are brought in sync first;
    /// records resolvable at that point are excluded, everything appended
    /// afterwards is evaluated against the tree and delivered on match.
    pub async fn live(&self, op: &Operation) -> Result<LiveQuery> {
        validate_live(op)?;
        self.resolver.prepare(op).await?;
        let (resume_after, next_offset) = {
            let reg = self.store.read().await;
            (reg.tail_marker(), reg.count())
        };
        Ok(LivePump::spawn(
            Arc::clone(&self.log),
            Arc::clone(&self.codec),
            Arc::clone(&self.store),
            op.clone(),
            resume_after,
            next_offset,
            self.config.live_capacity,
        ))
    }

    /// Discards index state from `from_offset` onward, forcing the next
    /// query to rescan that range. Called after deleting records, so the
    /// affected slots are reindexed with their tombstone values.
    pub async fn reindex(&self, from_offset: u32) -> Result<()> {
        self.log.deletes_flushed().await;
        self.builder.drain().await;
        // hold out new passes while the store and the files change
        let _gate = self.builder.gate().await;

        let (marker, derived_keys, cores) = {
            let mut reg = self.store.write().await;
            if from_offset >= reg.count() {
                return Ok(());
            }
            let marker = if from_offset == 0 {
                None
            } else {
                reg.offsets.buf.get(from_offset - 1)
            };
            reg.offsets.buf.truncate(from_offset);
            reg.timestamps.buf.truncate(from_offset);
            reg.sequences.buf.truncate(from_offset);
            reg.offsets.marker = marker;
            reg.timestamps.marker = marker;
            reg.sequences.marker = marker;
            let cores = (
                reg.offsets.buf.live().to_vec(),
                reg.timestamps.buf.live().to_vec(),
                reg.sequences.buf.live().to_vec(),
            );
            (marker, reg.clear_derived(), cores)
        };

        let dir = self.config.indexes_dir.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            for key in &derived_keys {
                remove_file(&index_path(&dir, key))?;
            }
            let (offsets, timestamps, sequences) = cores;
            match marker {
                Some(marker) => {
                    save_u32(&index_path(&dir, OFFSET_INDEX), marker, &offsets)?;
                    save_f64(&index_path(&dir, TIMESTAMP_INDEX), marker, &timestamps)?;
                    save_u32(&index_path(&dir, SEQUENCE_INDEX), marker, &sequences)?;
                }
                None => {
                    for core in [OFFSET_INDEX, TIMESTAMP_INDEX, SEQUENCE_INDEX] {
                        remove_file(&index_path(&dir, core))?;
                    }
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| JetError::Io(format!("reindex persist task failed: {e}")))??;

        let snapshot = {
            let reg = self.store.read().await;
            ProgressSnapshot {
                indexes: reg.marker_snapshot(),
            }
        };
        self.progress.publish(snapshot);
        debug!(from_offset, "indexes reset");
        Ok(())
    }

    /// Observable of per-index sync markers, throttled to the configured
    /// interval
    pub fn status(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }
}

fn open_registry(dir: &Path) -> Result<Registry> {
    std::fs::create_dir_all(dir).map_err(|e| JetError::io(dir, e))?;
    let mut reg = Registry::new();
    for (key, path) in list_index_files(dir)? {
        match key.as_str() {
            OFFSET_INDEX => {
                let (header, body) = load_u32(&path)?;
                reg.offsets = CoreIndex {
                    marker: Some(header.last_seq),
                    buf: U32Arr::with_elements(body),
                };
            }
            TIMESTAMP_INDEX => {
                let (header, body) = load_f64(&path)?;
                reg.timestamps = CoreIndex {
                    marker: Some(header.last_seq),
                    buf: F64Arr::with_elements(body),
                };
            }
            SEQUENCE_INDEX => {
                let (header, body) = load_u32(&path)?;
                reg.sequences = CoreIndex {
                    marker: Some(header.last_seq),
                    buf: U32Arr::with_elements(body),
                };
            }
            _ => {
                let header = read_header(&path)?;
                reg.insert_derived(key, IndexEntry::lazy(header.last_seq, header.count));
            }
        }
    }
    Ok(reg)
}
