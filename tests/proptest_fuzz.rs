//! Property-based tests (fuzzing) for queue persistence resilience.
//!
//! Uses proptest to generate random/malformed persisted state and verify the
//! queue never panics, only quarantines what it cannot read.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{json, Value};

use capture_sync::feed::{FeedPhoto, PhotoFeed};
use capture_sync::{
    GeoLocation, InMemoryStore, KvStore, MediaType, QueueItem, QueueStore, StorageError,
};

const KEY: &str = "@PENDING_UPLOADS";

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Generate a valid persisted queue entry
fn valid_entry_strategy() -> impl Strategy<Value = Value> {
    (
        "[A-Z]{3}_[0-9]{1,4}",
        any::<bool>(),
        -90.0f64..90.0,
        -180.0f64..180.0,
    )
        .prop_map(|(key, video, lat, lon)| {
            let media_type = if video { MediaType::Video } else { MediaType::Image };
            let item = QueueItem::new(
                format!("/pending/{key}.bin").into(),
                media_type,
                GeoLocation::new(lat, lon),
                key,
            );
            serde_json::to_value(item).unwrap()
        })
}

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(
        4,   // depth
        64,  // max nodes
        10,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10)
                    .prop_map(Value::Array),
                prop::collection::hash_map(".*", inner, 0..10)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        },
    )
}

/// Entry that is valid or garbage, half and half
fn mixed_entry_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![valid_entry_strategy(), arbitrary_json_strategy()]
}

async fn load_raw(raw: &str) -> (Result<Vec<QueueItem>, StorageError>, Arc<InMemoryStore>, QueueStore) {
    let kv = Arc::new(InMemoryStore::new());
    kv.put(KEY, raw).await.unwrap();
    let queue = QueueStore::new(kv.clone(), KEY);
    (queue.list().await, kv, queue)
}

// =============================================================================
// Persisted queue fuzzing
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn fuzz_queue_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..4096)) {
        let raw = String::from_utf8_lossy(&bytes).into_owned();
        runtime().block_on(async {
            let (items, _, _) = load_raw(&raw).await;
            // Never an error, never a panic
            prop_assert!(items.is_ok());
            Ok(())
        })?;
    }

    #[test]
    fn fuzz_queue_from_arbitrary_json(value in arbitrary_json_strategy()) {
        runtime().block_on(async {
            let (items, kv, _) = load_raw(&value.to_string()).await;
            let items = items.unwrap();

            // Whatever survived must be re-persisted as clean state
            let stored = kv.get(KEY).await.unwrap().unwrap_or_else(|| "[]".into());
            let reparsed: Vec<QueueItem> = serde_json::from_str(&stored).unwrap();
            prop_assert_eq!(reparsed.len(), items.len());
            Ok(())
        })?;
    }

    #[test]
    fn prop_valid_entries_survive_garbage_neighbours(
        entries in prop::collection::vec(mixed_entry_strategy(), 0..20)
    ) {
        let expected: Vec<String> = {
            let mut seen = HashSet::new();
            entries
                .iter()
                .filter_map(|v| serde_json::from_value::<QueueItem>(v.clone()).ok())
                .filter(|item| seen.insert(item.local_cache_key.clone()))
                .map(|item| item.local_cache_key)
                .collect()
        };
        let raw = Value::Array(entries.clone()).to_string();

        runtime().block_on(async {
            let (items, _, queue) = load_raw(&raw).await;
            let keys: Vec<String> = items.unwrap().into_iter().map(|i| i.local_cache_key).collect();
            prop_assert_eq!(&keys, &expected);

            let quarantined = queue.quarantined().await.unwrap();
            prop_assert_eq!(quarantined.len(), entries.len() - expected.len());
            Ok(())
        })?;
    }
}

// =============================================================================
// Cache-key uniqueness under churn
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Enqueue(u8),
    Remove(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..16).prop_map(Op::Enqueue),
        (0u8..16).prop_map(Op::Remove),
    ]
}

fn item(n: u8) -> QueueItem {
    QueueItem::new(
        format!("/pending/IMG_{n}.jpg").into(),
        MediaType::Image,
        GeoLocation::new(0.0, 0.0),
        format!("IMG_{n}"),
    )
}

proptest! {
    #[test]
    fn prop_cache_keys_stay_unique(ops in prop::collection::vec(op_strategy(), 0..64)) {
        runtime().block_on(async {
            let queue = QueueStore::new(Arc::new(InMemoryStore::new()), KEY);
            let mut model: Vec<u8> = Vec::new();

            for op in ops {
                match op {
                    Op::Enqueue(n) => {
                        let result = queue.enqueue(item(n)).await;
                        if model.contains(&n) {
                            prop_assert!(
                                matches!(result, Err(StorageError::DuplicateCacheKey(_))),
                                "duplicate enqueue must be rejected"
                            );
                        } else {
                            prop_assert!(result.is_ok());
                            model.push(n);
                        }
                    }
                    Op::Remove(n) => {
                        let removed = queue.remove(&item(n)).await.unwrap();
                        prop_assert_eq!(removed, model.contains(&n));
                        model.retain(|m| *m != n);
                    }
                }
            }

            // FIFO order preserved, one entry per key
            let keys: Vec<String> = queue.list().await.unwrap().into_iter().map(|i| i.local_cache_key).collect();
            let expected: Vec<String> = model.iter().map(|n| format!("IMG_{n}")).collect();
            prop_assert_eq!(keys, expected);
            Ok(())
        })?;
    }
}

// =============================================================================
// Feed merging
// =============================================================================

proptest! {
    #[test]
    fn prop_feed_has_no_duplicate_ids(
        pages in prop::collection::vec(prop::collection::vec((0u8..32, 0i64..100), 0..10), 1..8)
    ) {
        let mut feed = PhotoFeed::new();
        let generation = feed.next_request().generation;

        for page in pages {
            let photos = page
                .into_iter()
                .map(|(id, row)| FeedPhoto::new(format!("p{id}"), Some(row), "t", false))
                .collect();
            feed.apply_page(generation, photos, false);
        }

        let ids: Vec<&str> = feed.photos().iter().map(FeedPhoto::id).collect();
        let unique: HashSet<&str> = ids.iter().copied().collect();
        prop_assert_eq!(ids.len(), unique.len());

        let rows: Vec<Option<i64>> = feed.photos().iter().map(FeedPhoto::row_number).collect();
        prop_assert!(rows.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[test]
fn test_unparsable_blob_resets_and_quarantines() {
    runtime().block_on(async {
        let (items, kv, queue) = load_raw("{not json").await;
        assert!(items.unwrap().is_empty());
        assert_eq!(kv.get(KEY).await.unwrap().as_deref(), Some("[]"));
        assert_eq!(queue.quarantined().await.unwrap(), vec!["{not json".to_string()]);
    });
}

#[test]
fn test_mixed_blob_keeps_good_entries() {
    let good = serde_json::to_value(item(1)).unwrap();
    let raw = json!([good, {"localCacheKey": 7}, "junk"]).to_string();

    runtime().block_on(async {
        let (items, _, queue) = load_raw(&raw).await;
        let items = items.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].local_cache_key, "IMG_1");
        assert_eq!(queue.quarantined().await.unwrap().len(), 2);
    });
}
