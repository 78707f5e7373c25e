//! Live Query Tests
//!
//! Tests for live delivery invariants:
//! - Only records appended after the sync point are delivered
//! - Delivery preserves append order and dense offset assignment
//! - Tombstones occupy their slot silently
//! - External offset feeds drive delivery in feed order
//! - Dropping the stream releases the log subscription

mod common;

use std::time::Duration;

use futures_util::{stream, StreamExt};
use serde_json::json;
use tempfile::tempdir;

use common::{equal, msg, open_engine, MemoryLog};
use jetdb::errors::JetError;
use jetdb::log::Log;
use jetdb::query::{OffsetSource, Operation};

// =============================================================================
// Log Tail Tests
// =============================================================================

/// Records resolvable before the call are excluded; new matches arrive
/// in append order.
#[tokio::test]
async fn test_live_delivers_only_new_matches() {
    let log = MemoryLog::new();
    log.append(&msg("post", "alice", 100.0, 1));
    log.append(&msg("post", "bob", 200.0, 2));
    let dir = tempdir().unwrap();
    let engine = open_engine(log.clone(), dir.path()).await;
    let op = equal("type", &json!("post"));

    // sync the index, then subscribe
    assert_eq!(engine.count(&op).await.unwrap(), 2);
    let mut live = engine.live(&op).await.unwrap();

    log.append(&msg("post", "carol", 300.0, 3));
    log.append(&msg("vote", "dan", 400.0, 4));
    log.append(&msg("post", "erin", 500.0, 5));

    let first = live.next().await.unwrap().unwrap();
    assert_eq!(first.seq, 30);
    assert_eq!(first.value["author"], "carol");

    let second = live.next().await.unwrap().unwrap();
    assert_eq!(second.seq, 50);
    assert_eq!(second.value["author"], "erin");
}

/// Live records carry the dense offsets their slots occupy.
#[tokio::test]
async fn test_live_offsets_continue_densely() {
    let log = MemoryLog::new();
    log.append(&msg("post", "alice", 100.0, 1));
    log.append(&msg("post", "bob", 200.0, 2));
    let dir = tempdir().unwrap();
    let engine = open_engine(log.clone(), dir.path()).await;
    let op = equal("type", &json!("post"));

    engine.count(&op).await.unwrap();
    let mut live = engine.live(&op).await.unwrap();

    log.append(&msg("vote", "carol", 300.0, 3));
    log.append(&msg("post", "dan", 400.0, 4));

    // the vote occupies offset 2, so the matching post lands on 3
    let record = live.next().await.unwrap().unwrap();
    assert_eq!(record.offset, 3);
    assert_eq!(record.seq, 40);
}

/// Tombstoned records keep their offset slot; live delivery resumes after
/// them with the right density.
#[tokio::test]
async fn test_live_resumes_after_tombstoned_records() {
    let log = MemoryLog::new();
    log.append(&msg("post", "alice", 100.0, 1));
    let doomed = log.append(&msg("post", "bob", 200.0, 2));
    let dir = tempdir().unwrap();
    let engine = open_engine(log.clone(), dir.path()).await;
    let op = equal("type", &json!("post"));

    assert_eq!(engine.count(&op).await.unwrap(), 2);
    log.del(doomed).await.unwrap();

    let mut live = engine.live(&op).await.unwrap();
    log.append(&msg("post", "carol", 300.0, 3));

    let record = live.next().await.unwrap().unwrap();
    // bob's slot 1 stays occupied, carol lands on slot 2
    assert_eq!(record.seq, 30);
    assert_eq!(record.offset, 2);
}

/// A mixed tree is evaluated directly against each new record.
#[tokio::test]
async fn test_live_evaluates_whole_tree() {
    let log = MemoryLog::new();
    log.append(&msg("post", "alice", 100.0, 1));
    let dir = tempdir().unwrap();
    let engine = open_engine(log.clone(), dir.path()).await;

    let op = Operation::And(vec![
        equal("type", &json!("post")),
        Operation::Gte {
            index_name: "timestamp".into(),
            value: 300.0,
        },
    ]);
    let mut live = engine.live(&op).await.unwrap();

    log.append(&msg("post", "bob", 200.0, 2));
    log.append(&msg("vote", "carol", 400.0, 3));
    log.append(&msg("post", "dan", 500.0, 4));

    let record = live.next().await.unwrap().unwrap();
    assert_eq!(record.seq, 40);
    assert_eq!(record.value["author"], "dan");
}

/// A record that cannot be decoded ends the stream with one error.
#[tokio::test]
async fn test_live_decode_failure_ends_stream() {
    let log = MemoryLog::new();
    let dir = tempdir().unwrap();
    let engine = open_engine(log.clone(), dir.path()).await;

    let op = Operation::Gt {
        index_name: "timestamp".into(),
        value: 0.0,
    };
    let mut live = engine.live(&op).await.unwrap();

    log.append(&msg("post", "alice", 100.0, 1));
    // a timestamp entry whose value bytes are not valid JSON
    let mut bad = Vec::new();
    bad.push(9u8);
    bad.extend_from_slice(b"timestamp");
    bad.extend_from_slice(&3u16.to_le_bytes());
    bad.extend_from_slice(b"@@@");
    log.append_raw(bad);

    let first = live.next().await.unwrap().unwrap();
    assert_eq!(first.seq, 10);

    let second = live.next().await.unwrap();
    assert!(matches!(second, Err(JetError::RecordDecode { .. })));
    assert!(live.next().await.is_none());
}

/// Dropping the stream releases the log subscription.
#[tokio::test]
async fn test_dropping_live_query_releases_subscription() {
    let log = MemoryLog::new();
    let dir = tempdir().unwrap();
    let engine = open_engine(log.clone(), dir.path()).await;
    let op = equal("type", &json!("post"));

    let live = engine.live(&op).await.unwrap();
    drop(live);

    log.append(&msg("post", "alice", 100.0, 1));
    tokio::time::sleep(Duration::from_millis(20)).await;
    log.append(&msg("post", "bob", 200.0, 2));

    assert_eq!(log.live_subscriber_count(), 0);
}

// =============================================================================
// Offset Feed Tests
// =============================================================================

/// An offset feed drives delivery in feed order, skipping unindexed slots.
#[tokio::test]
async fn test_offset_feed_drives_delivery() {
    let log = MemoryLog::new();
    log.append(&msg("post", "alice", 100.0, 1));
    log.append(&msg("vote", "bob", 200.0, 2));
    log.append(&msg("post", "carol", 300.0, 3));
    let dir = tempdir().unwrap();
    let engine = open_engine(log, dir.path()).await;

    let source = OffsetSource::new(stream::iter(vec![2u32, 0, 99]));
    let mut live = engine
        .live(&Operation::LiveOffsets(source))
        .await
        .unwrap();

    let first = live.next().await.unwrap().unwrap();
    assert_eq!((first.offset, first.seq), (2, 30));
    let second = live.next().await.unwrap().unwrap();
    assert_eq!((second.offset, second.seq), (0, 10));
    // offset 99 is beyond the indexed range and the feed is exhausted
    assert!(live.next().await.is_none());
}

/// The feed combines with predicates: only matching offsets come through.
#[tokio::test]
async fn test_offset_feed_respects_predicates() {
    let log = MemoryLog::new();
    log.append(&msg("post", "alice", 100.0, 1));
    log.append(&msg("vote", "bob", 200.0, 2));
    log.append(&msg("post", "carol", 300.0, 3));
    let dir = tempdir().unwrap();
    let engine = open_engine(log, dir.path()).await;

    let source = OffsetSource::new(stream::iter(vec![0u32, 1, 2]));
    let op = Operation::And(vec![
        equal("type", &json!("post")),
        Operation::LiveOffsets(source),
    ]);
    let mut live = engine.live(&op).await.unwrap();

    let seqs: Vec<u32> = vec![
        live.next().await.unwrap().unwrap().seq,
        live.next().await.unwrap().unwrap().seq,
    ];
    assert_eq!(seqs, vec![10, 30]);
    assert!(live.next().await.is_none());
}

// =============================================================================
// Validation Tests
// =============================================================================

/// Two offset feeds in one tree are rejected.
#[tokio::test]
async fn test_two_offset_feeds_are_rejected() {
    let log = MemoryLog::new();
    log.append(&msg("post", "alice", 100.0, 1));
    let dir = tempdir().unwrap();
    let engine = open_engine(log, dir.path()).await;

    let op = Operation::Or(vec![
        Operation::LiveOffsets(OffsetSource::new(stream::empty())),
        Operation::LiveOffsets(OffsetSource::new(stream::empty())),
    ]);
    assert!(matches!(engine.live(&op).await, Err(JetError::Usage(_))));
}

/// Live ranges are limited to the numeric core fields.
#[tokio::test]
async fn test_live_range_on_custom_index_is_rejected() {
    let log = MemoryLog::new();
    log.append(&msg("post", "alice", 100.0, 1));
    let dir = tempdir().unwrap();
    let engine = open_engine(log, dir.path()).await;

    let op = Operation::Gt {
        index_name: "votes".into(),
        value: 1.0,
    };
    assert!(matches!(engine.live(&op).await, Err(JetError::Usage(_))));
}
