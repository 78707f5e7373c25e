//! # Live Queries
//!
//! A live query keeps delivering matches after the initial resolution
//! point. The referenced indexes are brought in sync first; from there
//! every newly observed record is evaluated directly against the tree,
//! without touching any index. Delivery preserves append order. Dropping
//! the stream cancels the pump, which releases the log tail or the
//! external offset feed.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::codec::CodecRef;
use crate::errors::{JetError, Result};
use crate::log::{LogRef, StreamOptions};
use crate::paginate::Record;
use crate::query::{find_live_source, matches, EvalCtx, OffsetSource, Operation};
use crate::store::Registry;

/// Stream of records matching a live query, in append order.
///
/// The stream ends after the first error; transient conditions (a record
/// tombstoned between observation and fetch) are skipped, not surfaced.
pub struct LiveQuery {
    rx: mpsc::Receiver<Result<Record>>,
}

impl Stream for LiveQuery {
    type Item = Result<Record>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Feeds one live query from the log tail or an external offset feed
pub(crate) struct LivePump {
    log: LogRef,
    codec: CodecRef,
    store: Arc<RwLock<Registry>>,
    op: Operation,
    tx: mpsc::Sender<Result<Record>>,
}

impl LivePump {
    /// Spawns the pump task and returns the consumer side.
    ///
    /// `resume_after` and `next_offset` are the store's sync point at spawn
    /// time: records at or before it were resolvable by a plain query and
    /// are excluded from live delivery.
    pub(crate) fn spawn(
        log: LogRef,
        codec: CodecRef,
        store: Arc<RwLock<Registry>>,
        op: Operation,
        resume_after: Option<u32>,
        next_offset: u32,
        capacity: usize,
    ) -> LiveQuery {
        let (tx, rx) = mpsc::channel(capacity);
        let pump = LivePump {
            log,
            codec,
            store,
            op,
            tx,
        };
        tokio::spawn(async move {
            match find_live_source(&pump.op) {
                Some(source) => pump.run_source(source).await,
                None => pump.run_tail(resume_after, next_offset).await,
            }
        });
        LiveQuery { rx }
    }

    /// Tails the log from the sync point, assigning dense offsets as slots
    /// appear. Tombstones occupy their slot but are never delivered.
    async fn run_tail(self, resume_after: Option<u32>, mut next_offset: u32) {
        let mut entries = self.log.stream(StreamOptions {
            after_seq: resume_after,
            live: true,
        });
        while let Some(entry) = entries.next().await {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let _ = self.tx.send(Err(e)).await;
                    break;
                }
            };
            let offset = next_offset;
            next_offset += 1;
            let Some(payload) = entry.payload else {
                continue;
            };
            if !self.deliver(&payload, entry.seq, offset, false).await {
                break;
            }
        }
    }

    /// Pumps an external offset feed, resolving each offset through the
    /// offset core index. Offsets beyond the indexed range are skipped.
    async fn run_source(self, source: OffsetSource) {
        let Some(mut offsets) = source.take() else {
            debug!("live offset feed already consumed, nothing to pump");
            return;
        };
        while let Some(offset) = offsets.next().await {
            let seq = {
                let reg = self.store.read().await;
                reg.offsets.buf.get(offset)
            };
            let Some(seq) = seq else {
                debug!(offset, "live offset beyond the indexed range, skipped");
                continue;
            };
            let bytes = match self.log.get(seq).await {
                Ok(bytes) => bytes,
                // tombstoned between the feed observing it and the fetch
                Err(JetError::NotFound(_)) => continue,
                Err(e) => {
                    let _ = self.tx.send(Err(e)).await;
                    break;
                }
            };
            if !self.deliver(&bytes, seq, offset, true).await {
                break;
            }
        }
    }

    /// Evaluates one record and forwards it on match. Returns `false` when
    /// pumping must stop: evaluation failed or the consumer went away.
    async fn deliver(&self, bytes: &[u8], seq: u32, offset: u32, driven: bool) -> bool {
        let ctx = EvalCtx {
            codec: self.codec.as_ref(),
            seq,
            offset,
            driven,
        };
        let matched = match matches(&self.op, bytes, &ctx) {
            Ok(matched) => matched,
            Err(e) => {
                let _ = self.tx.send(Err(e)).await;
                return false;
            }
        };
        if !matched {
            return true;
        }
        let value = match self.codec.decode(bytes, 0) {
            Ok(value) => value,
            Err(e) => {
                let _ = self
                    .tx
                    .send(Err(JetError::decode(seq, e.to_string())))
                    .await;
                return false;
            }
        };
        self.tx.send(Ok(Record { offset, seq, value })).await.is_ok()
    }
}
