//! Differential sync cycle: manifests → plan → parallel shard transfers →
//! manifest commit → baseline

use crate::database::RecordStore;
use crate::error::SyncError;
use crate::models::{Category, Manifest, SyncSettings, MANIFEST_VERSION};
use crate::services::legacy_migration::migrate_legacy;
use crate::services::manifest_service::{
    build_local_manifest, commit_manifest, fetch_remote_manifest, RemoteDirs,
};
use crate::services::merge_service::MergeStats;
use crate::services::scheduler::run_with_concurrency;
use crate::services::shard_transfer::{download_shard, transfer_shard};
use crate::services::sync_paths::{now_millis, ShardPath};
use crate::services::sync_planner::{candidate_paths, plan, PlanSummary, SyncAction, SyncScope};
use crate::services::sync_service::{load_baseline, save_baseline, update_last_sync};
use std::fmt;
use std::sync::Arc;
use webdav_store::{RemoteStore, WebDavStore};

/// Outcome of one sync cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Shards downloaded and merged
    pub downloaded: usize,
    /// Shards uploaded
    pub uploaded: usize,
    /// Shards unchanged on both sides
    pub skipped: usize,
    /// Shards whose transfer failed; retried next cycle
    pub failed: usize,
    pub failed_paths: Vec<String>,
    pub migrated_files: usize,
    /// Records inserted or updated locally
    pub records_merged: usize,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sync complete: {} downloaded, {} uploaded, {} skipped, {} failed",
            self.downloaded, self.uploaded, self.skipped, self.failed
        )?;
        if self.migrated_files > 0 {
            write!(f, " ({} legacy files migrated)", self.migrated_files)?;
        }
        Ok(())
    }
}

/// Sync engine for one local store and one remote root
pub struct SyncEngine<R: RemoteStore> {
    settings: SyncSettings,
    remote: Arc<R>,
    store: Arc<RecordStore>,
    dirs: Arc<RemoteDirs>,
    running: tokio::sync::Mutex<()>,
}

impl SyncEngine<WebDavStore> {
    /// Engine talking to the WebDAV server configured in `settings`
    pub fn from_settings(
        settings: SyncSettings,
        store: Arc<RecordStore>,
    ) -> Result<Self, SyncError> {
        settings.validate().map_err(SyncError::Config)?;
        let remote = WebDavStore::new(settings.webdav_config())?;
        Ok(Self::new(settings, Arc::new(remote), store))
    }
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(settings: SyncSettings, remote: Arc<R>, store: Arc<RecordStore>) -> Self {
        Self {
            settings,
            remote,
            store,
            dirs: Arc::new(RemoteDirs::new()),
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// True while a sync cycle holds the engine
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Bounded sync: aggregate shards plus current and previous week
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        self.run(SyncScope::Bounded, now_millis()).await
    }

    /// Sync of every shard known locally or remotely
    pub async fn sync_full(&self) -> Result<SyncReport, SyncError> {
        self.run(SyncScope::Full, now_millis()).await
    }

    fn ensure_enabled(&self) -> Result<(), SyncError> {
        if !self.settings.enabled {
            return Err(SyncError::Validation("Sync is disabled".to_string()));
        }
        Ok(())
    }

    pub(crate) async fn run(&self, scope: SyncScope, now_ms: i64) -> Result<SyncReport, SyncError> {
        self.ensure_enabled()?;
        let _running = self
            .running
            .try_lock()
            .map_err(|_| SyncError::Validation("A sync is already in progress".to_string()))?;

        let root = self.settings.root().to_string();
        let mut report = SyncReport::default();
        log::info!("Starting {:?} sync of {}", scope, root);

        // 1. Remote manifest; without one, seed from legacy files
        let remote_manifest = fetch_remote_manifest(&*self.remote, &root).await?;
        let has_remote_manifest = remote_manifest.is_some();
        let remote_manifest = match remote_manifest {
            Some(manifest) => manifest,
            None => {
                // The folder may have been wiped; cached collections are stale
                self.dirs.clear();
                let migration = migrate_legacy(&*self.remote, &self.store, &root).await?;
                report.migrated_files = migration.files_migrated;
                report.records_merged += migration.merged.applied();
                Manifest::new()
            }
        };

        // 2. Local manifest and baseline. A baseline is meaningless once the
        // remote manifest is gone, so fall back to a two-way comparison.
        let local_manifest = build_local_manifest(&self.store, &root)?;
        let baseline = if has_remote_manifest {
            self.store.with_connection(load_baseline)?
        } else {
            None
        };

        // 3. Plan
        let candidates = candidate_paths(&root, now_ms, &local_manifest, &remote_manifest, scope);
        let plans = plan(
            &root,
            &candidates,
            &local_manifest,
            &remote_manifest,
            baseline.as_ref(),
        );
        log::info!("Sync plan: {}", PlanSummary::from_plans(&plans));

        // 4. Transfers
        let active: Vec<_> = plans
            .iter()
            .filter(|p| p.action != SyncAction::Noop)
            .cloned()
            .collect();
        let tasks: Vec<_> = active
            .iter()
            .map(|shard_plan| {
                let remote = Arc::clone(&self.remote);
                let store = Arc::clone(&self.store);
                let dirs = Arc::clone(&self.dirs);
                let root = root.clone();
                let shard_plan = shard_plan.clone();
                move || async move {
                    transfer_shard(&*remote, &store, &dirs, &root, &shard_plan).await
                }
            })
            .collect();
        let results = run_with_concurrency(tasks, self.settings.concurrency).await;

        // 5. Committed manifest and new baseline
        let mut committed = remote_manifest.clone();
        committed.version = MANIFEST_VERSION;
        let mut new_baseline = baseline.unwrap_or_default();
        let mut fatal = None;
        let mut succeeded = Vec::new();

        for shard_plan in plans.iter().filter(|p| p.action == SyncAction::Noop) {
            report.skipped += 1;
            succeeded.push(shard_plan.path.clone());
        }

        for (shard_plan, result) in active.iter().zip(results) {
            match result {
                Ok(outcome) => {
                    if shard_plan.action.downloads() {
                        report.downloaded += 1;
                    }
                    if let Some(uploaded_at) = outcome.uploaded {
                        report.uploaded += 1;
                        committed.set(shard_plan.path.clone(), uploaded_at);
                    }
                    report.records_merged += outcome.merged.applied();
                    succeeded.push(shard_plan.path.clone());
                }
                Err(e) => {
                    log::warn!("Shard {} failed: {}", shard_plan.path, e);
                    report.failed += 1;
                    report.failed_paths.push(shard_plan.path.clone());
                    if matches!(&e, SyncError::Remote(remote_err) if remote_err.is_fatal()) {
                        fatal = Some(e);
                    }
                }
            }
        }

        if let Some(e) = fatal {
            log::error!("Sync aborted before commit: {}", e);
            return Err(e);
        }

        for path in succeeded {
            if let Some(updated_at) = committed.updated_at(&path) {
                new_baseline.set(path, updated_at);
            }
        }
        new_baseline.version = MANIFEST_VERSION;
        new_baseline.last_updated = now_ms;

        // 6. Commit, then persist the baseline
        if !has_remote_manifest || committed.files != remote_manifest.files {
            committed.last_updated = now_ms;
            commit_manifest(&*self.remote, &self.dirs, &root, &committed).await?;
        }
        self.store.with_connection(|conn| {
            save_baseline(conn, &new_baseline)?;
            update_last_sync(conn)
        })?;

        log::info!("{}", report);
        Ok(report)
    }

    /// Fetches one older week on demand if the remote copy is newer.
    /// Neither the manifest nor the baseline is written.
    pub async fn backfill_week(
        &self,
        category: Category,
        week: &str,
    ) -> Result<MergeStats, SyncError> {
        self.ensure_enabled()?;
        let shard = ShardPath::weekly(category, week).ok_or_else(|| {
            SyncError::Validation(format!("{} has no week {}", category.as_str(), week))
        })?;

        let root = self.settings.root();
        let path = shard.to_remote_path(root);

        let Some(remote_manifest) = fetch_remote_manifest(&*self.remote, root).await? else {
            return Ok(MergeStats::default());
        };
        let Some(remote_updated_at) = remote_manifest.updated_at(&path) else {
            log::debug!("Backfill: {} not on remote", path);
            return Ok(MergeStats::default());
        };

        let local_updated_at = build_local_manifest(&self.store, root)?.updated_at(&path);
        if local_updated_at.is_some_and(|local| local >= remote_updated_at) {
            log::debug!("Backfill: {} is up to date", path);
            return Ok(MergeStats::default());
        }

        log::info!("Backfilling {}", path);
        download_shard(&*self.remote, &self.store, root, &shard).await
    }
}
