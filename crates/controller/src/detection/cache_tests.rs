// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::types::{AnalysisQuality, AnalysisTiming};

fn analysis(hash: &str) -> FrameAnalysis {
    FrameAnalysis {
        frame_id: uuid::Uuid::new_v4(),
        frame_hash: hash.to_owned(),
        detections: Vec::new(),
        fruit_count: 0,
        timing: AnalysisTiming::default(),
        quality: AnalysisQuality::Failed,
        frame_shape: (64, 64),
        lighting_score: 0.5,
        blur_score: 0.5,
    }
}

#[test]
fn hit_returns_identical_record() {
    let cache = DedupCache::new(4);
    let a = analysis("h1");
    let id = a.frame_id;
    cache.put("h1".to_owned(), a);

    let hit = cache.get("h1").unwrap();
    assert_eq!(hit.frame_id, id);
    assert_eq!(cache.hit_count(), 1);
    assert_eq!(cache.miss_count(), 0);
}

#[test]
fn miss_is_counted() {
    let cache = DedupCache::new(4);
    assert!(cache.get("absent").is_none());
    assert_eq!(cache.miss_count(), 1);
}

#[test]
fn size_never_exceeds_capacity() {
    let cache = DedupCache::new(3);
    for i in 0..10 {
        cache.put(format!("h{i}"), analysis(&format!("h{i}")));
        assert!(cache.len() <= 3);
    }
    assert_eq!(cache.len(), 3);
}

#[test]
fn over_capacity_insert_evicts_exactly_one() {
    let cache = DedupCache::new(2);
    cache.put("a".to_owned(), analysis("a"));
    cache.put("b".to_owned(), analysis("b"));
    cache.put("c".to_owned(), analysis("c"));
    assert_eq!(cache.len(), 2);
    // Oldest entry went.
    assert!(cache.get("a").is_none());
    assert!(cache.get("b").is_some());
    assert!(cache.get("c").is_some());
}

#[test]
fn get_refreshes_recency() {
    let cache = DedupCache::new(2);
    cache.put("a".to_owned(), analysis("a"));
    cache.put("b".to_owned(), analysis("b"));
    // Touch "a" so "b" becomes the LRU victim.
    cache.get("a");
    cache.put("c".to_owned(), analysis("c"));
    assert!(cache.get("a").is_some());
    assert!(cache.get("b").is_none());
}

#[test]
fn reinsert_same_hash_does_not_grow() {
    let cache = DedupCache::new(2);
    cache.put("a".to_owned(), analysis("a"));
    cache.put("a".to_owned(), analysis("a"));
    assert_eq!(cache.len(), 1);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The LRU bound holds under arbitrary interleavings of puts/gets.
        #[test]
        fn bounded_under_arbitrary_ops(ops in prop::collection::vec((0u8..2, 0u8..20), 0..200)) {
            let cache = DedupCache::new(5);
            for (op, key) in ops {
                let key = format!("k{key}");
                if op == 0 {
                    cache.put(key.clone(), analysis(&key));
                } else {
                    cache.get(&key);
                }
                prop_assert!(cache.len() <= 5);
            }
        }
    }
}
