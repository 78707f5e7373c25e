//! # Indexing Progress
//!
//! A throttled observable of per-index markers. The builder publishes a
//! snapshot after every pass and periodically during long ones; subscribers
//! see at most one update per interval, with the newest snapshot winning.
//! With no subscribers the whole thing is inert.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

/// Marker position of every index that has seen at least one record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    /// index name → seq of the last record reflected
    pub indexes: BTreeMap<String, u32>,
}

struct Throttle {
    last_sent: Option<Instant>,
    pending: Option<ProgressSnapshot>,
    flush_scheduled: bool,
}

struct Shared {
    tx: watch::Sender<ProgressSnapshot>,
    interval: Duration,
    throttle: StdMutex<Throttle>,
}

impl Shared {
    fn flush(&self) {
        let mut throttle = lock(&self.throttle);
        throttle.flush_scheduled = false;
        if let Some(snapshot) = throttle.pending.take() {
            throttle.last_sent = Some(Instant::now());
            let _ = self.tx.send(snapshot);
        }
    }
}

/// Throttled progress publisher
#[derive(Clone)]
pub struct Progress {
    shared: Arc<Shared>,
}

impl Progress {
    pub fn new(interval: Duration) -> Self {
        let (tx, _) = watch::channel(ProgressSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                tx,
                interval,
                throttle: StdMutex::new(Throttle {
                    last_sent: None,
                    pending: None,
                    flush_scheduled: false,
                }),
            }),
        }
    }

    /// Latest snapshot plus every future update
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.shared.tx.subscribe()
    }

    /// Publishes a snapshot, subject to throttling. Updates inside the
    /// quiet window are deferred and coalesced; only the newest survives.
    pub fn publish(&self, snapshot: ProgressSnapshot) {
        if self.shared.tx.receiver_count() == 0 {
            return;
        }
        let now = Instant::now();
        let mut throttle = lock(&self.shared.throttle);
        match throttle.last_sent {
            Some(sent) if now.duration_since(sent) < self.shared.interval => {
                throttle.pending = Some(snapshot);
                if !throttle.flush_scheduled {
                    throttle.flush_scheduled = true;
                    let remaining = self.shared.interval - now.duration_since(sent);
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        tokio::time::sleep(remaining).await;
                        shared.flush();
                    });
                }
            }
            _ => {
                throttle.last_sent = Some(now);
                let _ = self.shared.tx.send(snapshot);
            }
        }
    }
}

fn lock(m: &StdMutex<Throttle>) -> MutexGuard<'_, Throttle> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(marker: u32) -> ProgressSnapshot {
        let mut indexes = BTreeMap::new();
        indexes.insert("offset".to_string(), marker);
        ProgressSnapshot { indexes }
    }

    #[tokio::test]
    async fn test_first_update_is_immediate() {
        let progress = Progress::new(Duration::from_secs(1));
        let rx = progress.subscribe();
        progress.publish(snap(10));
        assert_eq!(rx.borrow().indexes["offset"], 10);
    }

    #[tokio::test]
    async fn test_updates_inside_window_coalesce() {
        let progress = Progress::new(Duration::from_millis(50));
        let rx = progress.subscribe();

        progress.publish(snap(1));
        progress.publish(snap(2));
        progress.publish(snap(3));
        // inside the quiet window only the first got through
        assert_eq!(rx.borrow().indexes["offset"], 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        // the deferred flush delivered the newest pending snapshot
        assert_eq!(rx.borrow().indexes["offset"], 3);
    }

    #[tokio::test]
    async fn test_no_subscribers_means_no_work() {
        let progress = Progress::new(Duration::from_millis(10));
        progress.publish(snap(1));
        let throttle = lock(&progress.shared.throttle);
        assert!(throttle.last_sent.is_none());
        assert!(throttle.pending.is_none());
    }
}
