//! Decides per shard whether to upload, download, both or nothing
//!
//! Three manifests take part: the local one (built from the store), the
//! remote one and the baseline committed by the last successful sync. A side
//! has changed when its entry is newer than the baseline entry.

use crate::models::Manifest;
use crate::services::sync_paths::{critical_shards, ShardPath};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Upload,
    Download,
    /// Download and merge first, then upload the merged shard
    Both,
    Noop,
}

impl SyncAction {
    pub fn downloads(&self) -> bool {
        matches!(self, SyncAction::Download | SyncAction::Both)
    }

    pub fn uploads(&self) -> bool {
        matches!(self, SyncAction::Upload | SyncAction::Both)
    }
}

/// Which shards a sync looks at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncScope {
    /// Aggregate shards plus current and previous week
    #[default]
    Bounded,
    /// Additionally every shard known to either manifest
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlan {
    pub path: String,
    pub shard: ShardPath,
    pub action: SyncAction,
    pub local: Option<i64>,
    pub remote: Option<i64>,
}

/// Counts per action, for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub uploads: usize,
    pub downloads: usize,
    pub both: usize,
    pub noops: usize,
}

impl PlanSummary {
    pub fn from_plans(plans: &[ShardPlan]) -> Self {
        let mut summary = Self::default();
        for plan in plans {
            match plan.action {
                SyncAction::Upload => summary.uploads += 1,
                SyncAction::Download => summary.downloads += 1,
                SyncAction::Both => summary.both += 1,
                SyncAction::Noop => summary.noops += 1,
            }
        }
        summary
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} upload, {} download, {} both, {} unchanged",
            self.uploads, self.downloads, self.both, self.noops
        )
    }
}

/// Remote paths considered by a sync
pub fn candidate_paths(
    root: &str,
    now_ms: i64,
    local: &Manifest,
    remote: &Manifest,
    scope: SyncScope,
) -> BTreeSet<String> {
    let mut candidates: BTreeSet<String> = critical_shards(now_ms)
        .iter()
        .map(|shard| shard.to_remote_path(root))
        .collect();

    if scope == SyncScope::Full {
        candidates.extend(
            local
                .paths()
                .chain(remote.paths())
                .filter(|path| ShardPath::parse(root, path).is_some())
                .cloned(),
        );
    }

    candidates
}

fn decide(
    path: &str,
    local: Option<i64>,
    remote: Option<i64>,
    baseline: Option<&Manifest>,
) -> SyncAction {
    match baseline {
        Some(baseline) => {
            let base = baseline.updated_at(path).unwrap_or(0);
            let remote_changed = remote.is_some_and(|r| r > base);
            let local_changed = local.is_some_and(|l| l > base);
            match (local_changed, remote_changed) {
                (true, true) => SyncAction::Both,
                (true, false) => SyncAction::Upload,
                (false, true) => SyncAction::Download,
                (false, false) => SyncAction::Noop,
            }
        }
        // First sync on this device: compare the two sides directly
        None => match (local, remote) {
            (Some(_), None) => SyncAction::Upload,
            (None, Some(_)) => SyncAction::Download,
            (Some(l), Some(r)) if l != r => SyncAction::Both,
            _ => SyncAction::Noop,
        },
    }
}

/// One plan per candidate; paths that are not shard paths are ignored
pub fn plan(
    root: &str,
    candidates: &BTreeSet<String>,
    local: &Manifest,
    remote: &Manifest,
    baseline: Option<&Manifest>,
) -> Vec<ShardPlan> {
    candidates
        .iter()
        .filter_map(|path| {
            let shard = ShardPath::parse(root, path)?;
            let local_ts = local.updated_at(path);
            let remote_ts = remote.updated_at(path);
            Some(ShardPlan {
                path: path.clone(),
                shard,
                action: decide(path, local_ts, remote_ts, baseline),
                local: local_ts,
                remote: remote_ts,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "life-habits-data";
    const TODO: &str = "life-habits-data/todo/all.json";
    // 2025-12-25T12:00:00Z
    const NOW: i64 = 1_766_664_000_000;

    fn manifest(entries: &[(&str, i64)]) -> Manifest {
        let mut manifest = Manifest::new();
        for (path, ts) in entries {
            manifest.set(*path, *ts);
        }
        manifest
    }

    fn action_for(local: &Manifest, remote: &Manifest, baseline: Option<&Manifest>) -> SyncAction {
        let candidates = candidate_paths(ROOT, NOW, local, remote, SyncScope::Bounded);
        plan(ROOT, &candidates, local, remote, baseline)
            .into_iter()
            .find(|p| p.path == TODO)
            .unwrap()
            .action
    }

    #[test]
    fn test_with_baseline() {
        let base = manifest(&[(TODO, 500)]);

        // Remote moved on
        assert_eq!(
            action_for(&manifest(&[(TODO, 500)]), &manifest(&[(TODO, 600)]), Some(&base)),
            SyncAction::Download
        );
        // Local moved on
        assert_eq!(
            action_for(&manifest(&[(TODO, 700)]), &manifest(&[(TODO, 500)]), Some(&base)),
            SyncAction::Upload
        );
        // Both moved on
        assert_eq!(
            action_for(&manifest(&[(TODO, 700)]), &manifest(&[(TODO, 600)]), Some(&base)),
            SyncAction::Both
        );
        // Nothing changed
        assert_eq!(
            action_for(&manifest(&[(TODO, 500)]), &manifest(&[(TODO, 500)]), Some(&base)),
            SyncAction::Noop
        );
    }

    #[test]
    fn test_path_missing_from_baseline_counts_as_zero() {
        let base = manifest(&[]);
        assert_eq!(
            action_for(&manifest(&[(TODO, 1)]), &manifest(&[]), Some(&base)),
            SyncAction::Upload
        );
        assert_eq!(
            action_for(&manifest(&[]), &manifest(&[(TODO, 1)]), Some(&base)),
            SyncAction::Download
        );
    }

    #[test]
    fn test_without_baseline() {
        assert_eq!(
            action_for(&manifest(&[(TODO, 5)]), &manifest(&[]), None),
            SyncAction::Upload
        );
        assert_eq!(
            action_for(&manifest(&[]), &manifest(&[(TODO, 5)]), None),
            SyncAction::Download
        );
        assert_eq!(
            action_for(&manifest(&[(TODO, 5)]), &manifest(&[(TODO, 9)]), None),
            SyncAction::Both
        );
        assert_eq!(
            action_for(&manifest(&[(TODO, 5)]), &manifest(&[(TODO, 5)]), None),
            SyncAction::Noop
        );
        assert_eq!(action_for(&manifest(&[]), &manifest(&[]), None), SyncAction::Noop);
    }

    #[test]
    fn test_bounded_and_full_candidates() {
        let old_week = "life-habits-data/accounting/2024-W10.json";
        let local = manifest(&[(old_week, 10)]);
        let remote = manifest(&[("life-habits-data/unknown/file.json", 10)]);

        let bounded = candidate_paths(ROOT, NOW, &local, &remote, SyncScope::Bounded);
        assert_eq!(bounded.len(), 8);
        assert!(bounded.contains(TODO));
        assert!(bounded.contains("life-habits-data/reviews/templates.json"));
        assert!(bounded.contains("life-habits-data/reviews/2025-W52.json"));
        assert!(!bounded.contains(old_week));

        let full = candidate_paths(ROOT, NOW, &local, &remote, SyncScope::Full);
        assert_eq!(full.len(), 9);
        assert!(full.contains(old_week));
    }

    #[test]
    fn test_summary_counts() {
        let local = manifest(&[(TODO, 5), ("life-habits-data/habits/all.json", 3)]);
        let remote = manifest(&[("life-habits-data/projects/all.json", 4)]);
        let candidates = candidate_paths(ROOT, NOW, &local, &remote, SyncScope::Bounded);
        let plans = plan(ROOT, &candidates, &local, &remote, None);

        let summary = PlanSummary::from_plans(&plans);
        assert_eq!(summary.uploads, 2);
        assert_eq!(summary.downloads, 1);
        assert_eq!(summary.both, 0);
        assert_eq!(summary.noops, plans.len() - 3);
        assert!(SyncAction::Both.downloads() && SyncAction::Both.uploads());
    }
}
