//! # Index Builder
//!
//! All index mutation happens here. A query that references missing or
//! stale indexes asks the builder to bring them in sync; the builder runs
//! one forward scan over the log per pass, updating the three core indexes
//! and every target derived index in the same sweep. Concurrent callers
//! needing the same index name coalesce onto the pass already in flight
//! and all receive its result.
//!
//! Passes run as detached tasks, so a caller that gives up waiting does
//! not abort the rebuild for everyone else.

mod pass;

pub(crate) use pass::prefix_word;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tokio::sync::{watch, Mutex, RwLock};
use tracing::warn;

use crate::bitset::BitSet;
use crate::codec::CodecRef;
use crate::errors::{JetError, Result};
use crate::log::LogRef;
use crate::persist::{index_path, load_u32};
use crate::progress::Progress;
use crate::query::ScanTarget;
use crate::store::{DerivedData, Registry, U32Arr, OFFSET_INDEX, SEQUENCE_INDEX, TIMESTAMP_INDEX};

/// `None` while a pass runs, `Some(result)` once it completes
type CompletionFlag = Option<Result<()>>;

type InflightMap = HashMap<String, watch::Receiver<CompletionFlag>>;

/// How to interpret a lazy index body on load
#[derive(Debug, Clone, Copy)]
pub(crate) enum LoadKind {
    Bits,
    Prefixes,
}

/// Builds and updates indexes by scanning the log.
///
/// A builder is a bundle of shared handles; clones drive the same indexes.
#[derive(Clone)]
pub struct Builder {
    log: LogRef,
    codec: CodecRef,
    store: Arc<RwLock<Registry>>,
    progress: Progress,
    dir: PathBuf,
    save_every: u32,
    inflight: Arc<StdMutex<InflightMap>>,
    /// Whole-log passes run one at a time
    scan_gate: Arc<Mutex<()>>,
}

impl Builder {
    pub fn new(
        log: LogRef,
        codec: CodecRef,
        store: Arc<RwLock<Registry>>,
        progress: Progress,
        dir: PathBuf,
        save_every: u32,
    ) -> Self {
        Self {
            log,
            codec,
            store,
            progress,
            dir,
            save_every,
            inflight: Arc::new(StdMutex::new(HashMap::new())),
            scan_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Brings every target index, and the cores, in sync with the log tail.
    ///
    /// Targets already covered by an in-flight pass are awaited rather than
    /// rescanned; the remaining targets share one new pass.
    pub(crate) async fn ensure_synced(&self, targets: &[ScanTarget]) -> Result<()> {
        if !self.needs_scan(targets).await {
            return Ok(());
        }

        let mut waiters: Vec<watch::Receiver<CompletionFlag>> = Vec::new();
        let mut mine: Vec<ScanTarget> = Vec::new();
        {
            let mut inflight = lock_map(&self.inflight);
            for target in targets {
                match inflight.get(target.key()) {
                    Some(rx) => waiters.push(rx.clone()),
                    None => mine.push(target.clone()),
                }
            }

            let cores_inflight = inflight.get(OFFSET_INDEX).cloned();
            let spawn = !mine.is_empty() || (waiters.is_empty() && cores_inflight.is_none());
            if !spawn && waiters.is_empty() {
                // pure core sync riding on someone else's pass
                if let Some(rx) = cores_inflight {
                    waiters.push(rx);
                }
            }

            if spawn {
                let (tx, rx) = watch::channel(None);
                let mut registered: Vec<String> = Vec::new();
                for target in &mine {
                    inflight.insert(target.key().to_string(), rx.clone());
                    registered.push(target.key().to_string());
                }
                for core in [OFFSET_INDEX, TIMESTAMP_INDEX, SEQUENCE_INDEX] {
                    if !inflight.contains_key(core) {
                        inflight.insert(core.to_string(), rx.clone());
                        registered.push(core.to_string());
                    }
                }
                waiters.push(rx);

                let builder = self.clone();
                tokio::spawn(async move {
                    builder.run_registered(mine, registered, tx).await;
                });
            }
        }

        for rx in waiters {
            await_done(rx).await?;
        }
        Ok(())
    }

    /// Loads a lazy index body from disk. A no-op when the entry is already
    /// loaded or was dropped meanwhile.
    pub(crate) async fn load_derived(&self, key: &str, kind: LoadKind) -> Result<()> {
        {
            let reg = self.store.read().await;
            match reg.derived(key) {
                Some(entry) if entry.is_lazy() => {}
                _ => return Ok(()),
            }
        }

        let path = index_path(&self.dir, key);
        let (header, body) = tokio::task::spawn_blocking(move || load_u32(&path))
            .await
            .map_err(|e| JetError::Io(format!("index load task failed: {e}")))??;

        let mut reg = self.store.write().await;
        let Some(entry) = reg.derived_mut(key) else {
            return Ok(());
        };
        if !entry.is_lazy() {
            return Ok(());
        }
        entry.marker = Some(header.last_seq);
        entry.data = match kind {
            LoadKind::Bits => DerivedData::Bits(BitSet::from_words(body)),
            LoadKind::Prefixes => DerivedData::Prefixes(U32Arr::with_elements(body)),
        };
        Ok(())
    }

    /// Waits for every in-flight pass to finish, ignoring their results
    pub(crate) async fn drain(&self) {
        let waiters: Vec<watch::Receiver<CompletionFlag>> =
            lock_map(&self.inflight).values().cloned().collect();
        for rx in waiters {
            let _ = await_done(rx).await;
        }
    }

    async fn needs_scan(&self, targets: &[ScanTarget]) -> bool {
        let Some(tail) = self.log.since() else {
            return false;
        };
        let reg = self.store.read().await;
        if reg.offsets.marker != Some(tail)
            || reg.timestamps.marker != Some(tail)
            || reg.sequences.marker != Some(tail)
        {
            return true;
        }
        targets.iter().any(|t| match reg.derived(t.key()) {
            None => true,
            Some(entry) => entry.marker != Some(tail),
        })
    }

    async fn run_registered(
        &self,
        targets: Vec<ScanTarget>,
        registered: Vec<String>,
        tx: watch::Sender<CompletionFlag>,
    ) {
        let result = self.run_pass(&targets).await;
        if let Err(e) = &result {
            warn!(error = %e, "index pass failed");
        }
        // remove before broadcasting, so a caller arriving after completion
        // starts a fresh pass instead of latching onto a finished one
        {
            let mut inflight = lock_map(&self.inflight);
            for key in &registered {
                inflight.remove(key);
            }
        }
        let _ = tx.send(Some(result));
    }

    pub(crate) async fn gate(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.scan_gate.lock().await
    }
}

async fn await_done(mut rx: watch::Receiver<CompletionFlag>) -> Result<()> {
    loop {
        let current = rx.borrow().as_ref().cloned();
        if let Some(result) = current {
            return result;
        }
        if rx.changed().await.is_err() {
            return Err(JetError::Io(
                "index pass was dropped before completing".into(),
            ));
        }
    }
}

fn lock_map(map: &StdMutex<InflightMap>) -> MutexGuard<'_, InflightMap> {
    match map.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
