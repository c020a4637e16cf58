//! Match aggregation — per-user match counts over a batch of photo records.
//!
//! Counting is the hot path, so the input is partitioned into contiguous
//! shards, one per available execution unit, and each shard worker builds a
//! local map with no shared state. Only the cheap merge step serializes,
//! under a single mutex.

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;

use matchcast_common::types::PhotoMatch;

/// Shard count fallback when the platform cannot report its parallelism.
const DEFAULT_SHARDS: usize = 4;

/// Count, for each user id, how many match records reference it.
///
/// Users matched by zero photos are absent from the result — absence implies
/// zero, not an explicit entry. Empty input yields an empty map.
pub fn aggregate_matches(matches: &[PhotoMatch]) -> HashMap<String, u64> {
    if matches.is_empty() {
        return HashMap::new();
    }

    let shards = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_SHARDS)
        .min(matches.len());
    let shard_len = matches.len().div_ceil(shards);

    let global: Mutex<HashMap<String, u64>> = Mutex::new(HashMap::new());

    thread::scope(|scope| {
        let global = &global;
        for shard in matches.chunks(shard_len) {
            scope.spawn(move || {
                let mut local: HashMap<String, u64> = HashMap::new();
                for record in shard {
                    for user_id in &record.matched_user_ids {
                        *local.entry(user_id.clone()).or_insert(0) += 1;
                    }
                }

                let mut merged = global.lock().unwrap_or_else(|e| e.into_inner());
                for (user_id, count) in local {
                    *merged.entry(user_id).or_insert(0) += count;
                }
            });
        }
    });

    global.into_inner().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(photo_id: &str, users: &[&str]) -> PhotoMatch {
        PhotoMatch {
            photo_id: photo_id.to_string(),
            matched_user_ids: users.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[test]
    fn test_empty_input_yields_empty_map() {
        assert!(aggregate_matches(&[]).is_empty());
    }

    #[test]
    fn test_counts_across_records() {
        let matches = vec![
            record("p1", &["A", "B"]),
            record("p2", &["B", "C"]),
            record("p3", &["B"]),
        ];

        let counts = aggregate_matches(&matches);

        assert_eq!(counts.len(), 3);
        assert_eq!(counts["A"], 1);
        assert_eq!(counts["B"], 3);
        assert_eq!(counts["C"], 1);
    }

    #[test]
    fn test_unmatched_user_has_no_entry() {
        let matches = vec![record("p1", &["A"])];
        let counts = aggregate_matches(&matches);
        assert!(!counts.contains_key("Z"));
    }

    #[test]
    fn test_record_with_no_users_contributes_nothing() {
        let matches = vec![record("p1", &[]), record("p2", &["A"])];
        let counts = aggregate_matches(&matches);
        assert_eq!(counts.len(), 1);
        assert_eq!(counts["A"], 1);
    }

    #[test]
    fn test_sum_of_counts_equals_total_pairs() {
        // Enough records to exercise several shards.
        let mut matches = Vec::new();
        let mut expected_pairs = 0u64;
        for i in 0..200 {
            let users: Vec<String> = (0..(i % 5)).map(|j| format!("user-{j}")).collect();
            expected_pairs += users.len() as u64;
            matches.push(PhotoMatch {
                photo_id: format!("photo-{i}"),
                matched_user_ids: users,
            });
        }

        let counts = aggregate_matches(&matches);
        let total: u64 = counts.values().sum();
        assert_eq!(total, expected_pairs);
    }

    #[test]
    fn test_per_user_count_matches_sequential_count() {
        let mut matches = Vec::new();
        for i in 0..64 {
            let mut users = vec!["common".to_string()];
            if i % 3 == 0 {
                users.push("sparse".to_string());
            }
            matches.push(PhotoMatch {
                photo_id: format!("photo-{i}"),
                matched_user_ids: users,
            });
        }

        let counts = aggregate_matches(&matches);
        assert_eq!(counts["common"], 64);
        assert_eq!(counts["sparse"], 22); // ceil(64 / 3)
    }
}
