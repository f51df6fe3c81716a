// backuptool/src/retention/mod.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

use crate::config::RetentionPolicy;
use crate::store::{ObjectMeta, ObjectStore};

/// Computes the keys to delete under one job's prefix from a listing
/// snapshot. Retention is strictly opt-in: no configured rule, no deletions.
///
/// Candidates are ranked newest-first (key order breaks timestamp ties so the
/// outcome is deterministic). `max_keep` marks everything past the first
/// `max_keep` ranks; `max_age_days` additionally marks everything older than
/// the cutoff regardless of rank. The result is the sorted union.
pub fn plan(objects: &[ObjectMeta], policy: &RetentionPolicy, now: DateTime<Utc>) -> Vec<String> {
    if policy.is_empty() || objects.is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<&ObjectMeta> = objects.iter().collect();
    ranked.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| a.key.cmp(&b.key))
    });

    let mut to_delete: BTreeSet<&str> = BTreeSet::new();

    if let Some(max_keep) = policy.max_keep {
        for meta in ranked.iter().skip(max_keep) {
            to_delete.insert(meta.key.as_str());
        }
    }

    if let Some(max_age_days) = policy.max_age_days {
        let cutoff = now - Duration::days(max_age_days);
        for meta in &ranked {
            if meta.last_modified < cutoff {
                to_delete.insert(meta.key.as_str());
            }
        }
    }

    to_delete.into_iter().map(|k| k.to_string()).collect()
}

/// Lists a job's prefix, plans deletions, and applies them. In dry-run mode
/// the plan is only reported; the store receives no mutating call.
/// Returns the number of objects deleted (or that would be deleted).
pub async fn apply_retention(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    policy: &RetentionPolicy,
    dry_run: bool,
) -> Result<usize> {
    if policy.is_empty() {
        return Ok(0);
    }

    let list_prefix = format!("{}/", prefix.trim_end_matches('/'));
    let objects = store
        .list(bucket, &list_prefix)
        .await
        .with_context(|| format!("Failed to list bucket {bucket} under {list_prefix}"))?;

    let to_delete = plan(&objects, policy, Utc::now());
    if to_delete.is_empty() {
        return Ok(0);
    }

    let freed: i64 = objects
        .iter()
        .filter(|o| to_delete.binary_search(&o.key).is_ok())
        .map(|o| o.size)
        .sum();
    println!(
        "Retention: will delete {} object(s) ({freed} bytes) under prefix '{prefix}'",
        to_delete.len()
    );
    if dry_run {
        for key in &to_delete {
            println!("[dry-run] delete s3://{bucket}/{key}");
        }
        return Ok(to_delete.len());
    }

    store
        .delete_objects(bucket, &to_delete)
        .await
        .with_context(|| format!("Failed to delete object(s) from bucket {bucket}"))?;
    println!("Retention applied.");
    Ok(to_delete.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn meta(key: &str, age_days: i64, now: DateTime<Utc>) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            last_modified: now - Duration::days(age_days),
            size: 1,
        }
    }

    fn policy(max_keep: Option<usize>, max_age_days: Option<i64>) -> RetentionPolicy {
        RetentionPolicy { max_keep, max_age_days }
    }

    #[test]
    fn test_max_keep_deletes_all_but_newest() {
        let now = Utc::now();
        let objects: Vec<ObjectMeta> = (0..5)
            .map(|i| meta(&format!("backups/job/{i}.tar.gz"), i, now))
            .collect();

        let deleted = plan(&objects, &policy(Some(2), None), now);
        // Ages 0 and 1 are the two newest; 2, 3, 4 go.
        assert_eq!(
            deleted,
            vec![
                "backups/job/2.tar.gz",
                "backups/job/3.tar.gz",
                "backups/job/4.tar.gz"
            ]
        );
    }

    #[test]
    fn test_max_keep_larger_than_listing_marks_nothing() {
        let now = Utc::now();
        let objects = vec![meta("a", 1, now), meta("b", 2, now)];
        assert!(plan(&objects, &policy(Some(10), None), now).is_empty());
    }

    #[test]
    fn test_max_age_rule_is_rank_independent() {
        let now = Utc::now();
        let objects = vec![
            meta("fresh", 3, now),
            meta("stale", 10, now),
            meta("ancient", 40, now),
        ];

        let deleted = plan(&objects, &policy(None, Some(7)), now);
        assert_eq!(deleted, vec!["ancient", "stale"]);
    }

    #[test]
    fn test_rules_union() {
        let now = Utc::now();
        let objects = vec![
            meta("newest", 0, now),
            meta("second", 1, now),
            meta("old-but-ranked", 30, now),
        ];

        // max_keep=2 would delete only the third; max_age=7 also catches it,
        // and neither touches the first two.
        let deleted = plan(&objects, &policy(Some(2), Some(7)), now);
        assert_eq!(deleted, vec!["old-but-ranked"]);

        // Age rule reaches objects the keep rule would retain.
        let deleted = plan(&objects, &policy(Some(3), Some(7)), now);
        assert_eq!(deleted, vec!["old-but-ranked"]);
    }

    #[test]
    fn test_no_rules_means_no_deletions() {
        let now = Utc::now();
        let objects = vec![meta("a", 100, now), meta("b", 200, now)];
        assert!(plan(&objects, &policy(None, None), now).is_empty());
    }

    #[test]
    fn test_plan_is_idempotent_on_a_snapshot() {
        let now = Utc::now();
        let objects: Vec<ObjectMeta> = (0..10)
            .map(|i| meta(&format!("k{i}"), i, now))
            .collect();
        let p = policy(Some(3), Some(5));

        let first = plan(&objects, &p, now);
        let second = plan(&objects, &p, now);
        assert_eq!(first, second);
    }

    #[test]
    fn test_timestamp_ties_break_on_key_order() {
        let now = Utc::now();
        let objects = vec![meta("b", 1, now), meta("a", 1, now), meta("c", 1, now)];

        // All three share a timestamp; the lexicographically first key ranks
        // newest and survives max_keep=1.
        let deleted = plan(&objects, &policy(Some(1), None), now);
        assert_eq!(deleted, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_apply_without_policy_never_lists_or_deletes() -> Result<()> {
        let now = Utc::now();
        let store = MemoryStore::with_objects(
            "bucket",
            vec![meta("backups/job/x", 500, now), meta("backups/job/y", 600, now)],
        );

        let deleted =
            apply_retention(&store, "bucket", "backups/job", &policy(None, None), false).await?;
        assert_eq!(deleted, 0);
        assert_eq!(store.mutating_calls(), 0);
        assert_eq!(store.keys("bucket").len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_dry_run_reports_without_deleting() -> Result<()> {
        let now = Utc::now();
        let store = MemoryStore::with_objects(
            "bucket",
            vec![
                meta("backups/job/old", 30, now),
                meta("backups/job/new", 0, now),
            ],
        );

        let planned =
            apply_retention(&store, "bucket", "backups/job", &policy(None, Some(7)), true).await?;
        assert_eq!(planned, 1);
        assert_eq!(store.mutating_calls(), 0);
        assert_eq!(store.keys("bucket").len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_deletes_planned_objects() -> Result<()> {
        let now = Utc::now();
        let store = MemoryStore::with_objects(
            "bucket",
            vec![
                meta("backups/job/old", 30, now),
                meta("backups/job/new", 0, now),
                meta("backups/other/old", 90, now),
            ],
        );

        let deleted =
            apply_retention(&store, "bucket", "backups/job", &policy(Some(1), None), false).await?;
        assert_eq!(deleted, 1);
        // The sibling prefix is out of scope.
        let keys = store.keys("bucket");
        assert!(keys.contains(&"backups/job/new".to_string()));
        assert!(keys.contains(&"backups/other/old".to_string()));
        assert!(!keys.contains(&"backups/job/old".to_string()));
        Ok(())
    }
}
