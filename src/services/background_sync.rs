//! Automatic synchronization driven by local changes
//!
//! The worker consumes [`ChangeEvent`]s from the record store. Every event
//! (re)arms a debounce deadline; when it expires one sync runs. An initial
//! sync runs right after start, an optional poll interval adds periodic
//! syncs, and a failed sync is retried with jittered exponential backoff.

use crate::database::ChangeEvent;
use crate::error::SyncError;
use crate::services::sync_engine::{SyncEngine, SyncReport};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use webdav_store::RemoteStore;

/// Entries kept in the in-memory session log
pub const SESSION_LOG_CAPACITY: usize = 500;
const RETRY_BASE_SECONDS: u64 = 5;
const RETRY_MAX_SECONDS: u64 = 300;

/// Current state of the auto sync worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    /// A sync is due at the end of the debounce period
    Scheduled,
    Syncing,
    /// Last sync failed
    Failed(String),
}

/// In-memory session log entry (volatile, lost on restart)
#[derive(Debug, Clone, PartialEq)]
pub struct SyncLogEntry {
    pub ts_ms: i64,
    pub report: Option<SyncReport>,
    pub error: Option<String>,
}

/// Gets notified around every automatic or manual sync
pub trait SyncObserver: Send + Sync {
    fn on_sync_started(&self) {}
    fn on_sync_finished(&self, result: &Result<SyncReport, SyncError>);
}

enum Command {
    Trigger,
    SyncNow(oneshot::Sender<Result<SyncReport, SyncError>>),
    Stop,
}

struct Shared {
    observers: Mutex<Vec<Arc<dyn SyncObserver>>>,
    log: Mutex<VecDeque<SyncLogEntry>>,
    status: watch::Sender<SyncStatus>,
}

impl Shared {
    fn append_log(&self, entry: SyncLogEntry) {
        if let Ok(mut log) = self.log.lock() {
            log.push_back(entry);
            while log.len() > SESSION_LOG_CAPACITY {
                log.pop_front();
            }
        }
    }

    fn observers(&self) -> Vec<Arc<dyn SyncObserver>> {
        self.observers
            .lock()
            .map(|observers| observers.clone())
            .unwrap_or_default()
    }

    fn set_status(&self, status: SyncStatus) {
        self.status.send_replace(status);
    }
}

/// Delay before retry number `retry` (1-based): exponential, capped, with jitter
fn calculate_backoff(retry: u32) -> Duration {
    use rand::Rng;

    let base_delay = RETRY_BASE_SECONDS * (1 << retry.saturating_sub(1).min(6));
    let max_delay = base_delay.min(RETRY_MAX_SECONDS);
    let millis = rand::rng().random_range(max_delay * 500..=max_delay * 1000);
    Duration::from_millis(millis)
}

async fn run_once<R: RemoteStore>(
    engine: &SyncEngine<R>,
    shared: &Shared,
) -> Result<SyncReport, SyncError> {
    let observers = shared.observers();
    shared.set_status(SyncStatus::Syncing);
    for observer in &observers {
        observer.on_sync_started();
    }

    let result = engine.sync().await;

    match &result {
        Ok(report) => {
            shared.append_log(SyncLogEntry {
                ts_ms: Utc::now().timestamp_millis(),
                report: Some(report.clone()),
                error: None,
            });
            shared.set_status(SyncStatus::Idle);
        }
        Err(e) => {
            log::error!("Auto sync failed: {}", e);
            shared.append_log(SyncLogEntry {
                ts_ms: Utc::now().timestamp_millis(),
                report: None,
                error: Some(e.to_string()),
            });
            shared.set_status(SyncStatus::Failed(e.user_message()));
        }
    }

    for observer in &observers {
        observer.on_sync_finished(&result);
    }
    result
}

struct Worker<R: RemoteStore> {
    engine: Arc<SyncEngine<R>>,
    shared: Arc<Shared>,
    debounce: Duration,
    poll_interval: Option<Duration>,
    retry: u32,
    next_run: Option<Instant>,
}

impl<R: RemoteStore> Worker<R> {
    fn arm_debounce(&mut self) {
        self.next_run = Some(Instant::now() + self.debounce);
        self.shared.set_status(SyncStatus::Scheduled);
    }

    async fn sync(&mut self) -> Result<SyncReport, SyncError> {
        if self.engine.is_running() {
            log::debug!("Sync already in progress, rescheduling");
            self.arm_debounce();
            return Err(SyncError::Validation(
                "A sync is already in progress".to_string(),
            ));
        }

        let result = run_once(&self.engine, &self.shared).await;
        match &result {
            Ok(_) => {
                self.retry = 0;
                self.next_run = self.poll_interval.map(|interval| Instant::now() + interval);
            }
            // Retrying cannot fix settings; wait for the next change or poll
            Err(SyncError::Validation(_) | SyncError::Config(_)) => {
                self.retry = 0;
                self.next_run = self.poll_interval.map(|interval| Instant::now() + interval);
            }
            Err(_) => {
                self.retry += 1;
                let delay = calculate_backoff(self.retry);
                log::info!("Retrying sync in {} s (attempt {})", delay.as_secs(), self.retry);
                self.next_run = Some(Instant::now() + delay);
            }
        }
        result
    }

    async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<Command>,
        mut changes: mpsc::UnboundedReceiver<ChangeEvent>,
    ) {
        let mut changes_open = true;
        // Initial sync right after start
        self.next_run = Some(Instant::now());

        loop {
            let deadline = self.next_run.unwrap_or_else(Instant::now);
            tokio::select! {
                command = control.recv() => match command {
                    Some(Command::Trigger) => self.arm_debounce(),
                    Some(Command::SyncNow(reply)) => {
                        let result = self.sync().await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Stop) | None => break,
                },
                event = changes.recv(), if changes_open => match event {
                    Some(event) => {
                        log::debug!("Change in {} ({}), sync scheduled", event.table.as_str(), event.id);
                        self.arm_debounce();
                    }
                    None => changes_open = false,
                },
                _ = tokio::time::sleep_until(deadline), if self.next_run.is_some() => {
                    self.next_run = None;
                    let _ = self.sync().await;
                }
            }
        }

        log::info!("Auto sync stopped");
    }
}

/// Change-driven background synchronization around a [`SyncEngine`]
pub struct AutoSync<R: RemoteStore> {
    engine: Arc<SyncEngine<R>>,
    shared: Arc<Shared>,
    debounce: Duration,
    poll_interval: Option<Duration>,
    control: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<R: RemoteStore> AutoSync<R> {
    /// Debounce and poll interval are taken from the engine's settings
    pub fn new(engine: Arc<SyncEngine<R>>) -> Self {
        let settings = engine.settings();
        let debounce = Duration::from_millis(settings.debounce_ms);
        let poll_interval = settings.poll_interval_secs.map(Duration::from_secs);
        let (status, _) = watch::channel(SyncStatus::Idle);

        Self {
            engine,
            shared: Arc::new(Shared {
                observers: Mutex::new(Vec::new()),
                log: Mutex::new(VecDeque::new()),
                status,
            }),
            debounce,
            poll_interval,
            control: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn engine(&self) -> &Arc<SyncEngine<R>> {
        &self.engine
    }

    pub fn add_observer(&self, observer: Arc<dyn SyncObserver>) {
        if let Ok(mut observers) = self.shared.observers.lock() {
            observers.push(observer);
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    pub fn session_log(&self) -> Vec<SyncLogEntry> {
        self.shared
            .log
            .lock()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Command>> {
        self.control.lock().ok().and_then(|control| control.clone())
    }

    /// Checks if the worker is running
    pub fn is_running(&self) -> bool {
        self.sender().is_some_and(|tx| !tx.is_closed())
    }

    /// Spawns the worker on the current tokio runtime. `changes` usually
    /// comes from [`crate::database::RecordStore::subscribe_changes`].
    pub fn start(&self, changes: mpsc::UnboundedReceiver<ChangeEvent>) {
        if self.is_running() {
            log::warn!("Auto sync already running");
            return;
        }
        if !self.engine.settings().enabled {
            log::warn!("Sync is disabled, auto sync not started");
            return;
        }

        log::info!(
            "Starting auto sync (debounce {} ms, poll {:?})",
            self.debounce.as_millis(),
            self.poll_interval
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            engine: Arc::clone(&self.engine),
            shared: Arc::clone(&self.shared),
            debounce: self.debounce,
            poll_interval: self.poll_interval,
            retry: 0,
            next_run: None,
        };
        let handle = tokio::spawn(worker.run(rx, changes));

        if let Ok(mut control) = self.control.lock() {
            *control = Some(tx);
        }
        if let Ok(mut slot) = self.worker.lock() {
            *slot = Some(handle);
        }
    }

    /// Schedules a sync after the debounce period
    pub fn trigger(&self) {
        match self.sender() {
            Some(tx) => {
                let _ = tx.send(Command::Trigger);
            }
            None => log::debug!("Auto sync not running, trigger ignored"),
        }
    }

    /// Runs a sync immediately and waits for its result
    pub async fn sync_now(&self) -> Result<SyncReport, SyncError> {
        if let Some(tx) = self.sender() {
            let (reply_tx, reply_rx) = oneshot::channel();
            if tx.send(Command::SyncNow(reply_tx)).is_ok() {
                return reply_rx
                    .await
                    .map_err(|_| SyncError::Other("Auto sync worker stopped".to_string()))?;
            }
        }
        run_once(&self.engine, &self.shared).await
    }

    /// Stops the worker and waits for it to finish
    pub async fn stop(&self) {
        let tx = self.control.lock().ok().and_then(|mut control| control.take());
        if let Some(tx) = tx {
            let _ = tx.send(Command::Stop);
        }

        let handle = self.worker.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Auto sync worker failed: {}", e);
            }
        }
        self.shared.set_status(SyncStatus::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::RecordStore;
    use crate::models::{Record, SyncSettings, Table};
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use webdav_store::MemoryStore;

    fn settings(enabled: bool) -> SyncSettings {
        let mut settings = SyncSettings::new(
            "https://dav.example.invalid".to_string(),
            "alex".to_string(),
            "secret".to_string(),
            "life-habits-data".to_string(),
        );
        settings.enabled = enabled;
        settings
    }

    fn engine(remote: &Arc<MemoryStore>, enabled: bool) -> Arc<SyncEngine<MemoryStore>> {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        Arc::new(SyncEngine::new(settings(enabled), Arc::clone(remote), store))
    }

    fn auto_sync(remote: &Arc<MemoryStore>) -> AutoSync<MemoryStore> {
        AutoSync::new(engine(remote, true)).with_debounce(Duration::from_millis(40))
    }

    fn worker(engine: Arc<SyncEngine<MemoryStore>>) -> Worker<MemoryStore> {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Worker {
            engine,
            shared: Arc::new(Shared {
                observers: Mutex::new(Vec::new()),
                log: Mutex::new(VecDeque::new()),
                status,
            }),
            debounce: Duration::from_millis(40),
            poll_interval: None,
            retry: 0,
            next_run: None,
        }
    }

    fn task(title: &str) -> Record {
        let mut fields = Map::new();
        fields.insert("title".to_string(), json!(title));
        Record::new(fields)
    }

    async fn wait_for_log(auto: &AutoSync<MemoryStore>, entries: usize) {
        for _ in 0..200 {
            if auto.session_log().len() >= entries {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} sync log entries", entries);
    }

    #[derive(Default)]
    struct CountingObserver {
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    impl SyncObserver for CountingObserver {
        fn on_sync_started(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_sync_finished(&self, _result: &Result<SyncReport, SyncError>) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_changes_are_debounced_into_one_sync() {
        let remote = Arc::new(MemoryStore::new());
        let auto = auto_sync(&remote);
        let store = Arc::clone(auto.engine().store());

        auto.start(store.subscribe_changes());
        assert!(auto.is_running());
        wait_for_log(&auto, 1).await;

        for i in 0..3 {
            store.put(Table::Tasks, &task(&format!("task {}", i))).unwrap();
        }
        wait_for_log(&auto, 2).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let log = auto.session_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].report.as_ref().unwrap().uploaded, 1);
        assert!(remote.file("life-habits-data/todo/all.json").is_some());

        auto.stop().await;
        assert!(!auto.is_running());
    }

    #[tokio::test]
    async fn test_sync_now_notifies_observers() {
        let remote = Arc::new(MemoryStore::new());
        let auto = auto_sync(&remote);
        let observer = Arc::new(CountingObserver::default());
        auto.add_observer(observer.clone());
        let mut status = auto.subscribe_status();

        auto.engine().store().put(Table::Tasks, &task("now")).unwrap();
        let report = auto.sync_now().await.unwrap();

        assert_eq!(report.uploaded, 1);
        assert_eq!(observer.started.load(Ordering::SeqCst), 1);
        assert_eq!(observer.finished.load(Ordering::SeqCst), 1);
        assert_eq!(*status.borrow_and_update(), SyncStatus::Idle);
        assert_eq!(auto.session_log().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_logged_and_reported() {
        let remote = Arc::new(MemoryStore::new());
        remote.set_unauthorized(true);
        let auto = auto_sync(&remote);
        let status = auto.subscribe_status();

        assert!(auto.sync_now().await.is_err());

        let log = auto.session_log();
        assert!(log[0].report.is_none());
        assert!(log[0].error.is_some());
        assert!(matches!(*status.borrow(), SyncStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_disabled_sync_is_not_started_or_retried() {
        let remote = Arc::new(MemoryStore::new());
        let engine = engine(&remote, false);
        let auto = AutoSync::new(Arc::clone(&engine));

        auto.start(engine.store().subscribe_changes());
        assert!(!auto.is_running());

        let mut worker = worker(engine);
        let result = worker.sync().await;
        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert_eq!(worker.retry, 0);
        assert_eq!(worker.next_run, None);
        assert!(remote.request_log().is_empty());
    }

    #[tokio::test]
    async fn test_remote_failure_schedules_retry() {
        let remote = Arc::new(MemoryStore::new());
        remote.fail_path("life-habits-data/sync-manifest.json");
        let mut worker = worker(engine(&remote, true));

        assert!(worker.sync().await.is_err());
        assert_eq!(worker.retry, 1);
        assert!(worker.next_run.is_some());
    }

    #[test]
    fn test_session_log_is_capped() {
        let (status, _) = watch::channel(SyncStatus::Idle);
        let shared = Shared {
            observers: Mutex::new(Vec::new()),
            log: Mutex::new(VecDeque::new()),
            status,
        };

        for i in 0..(SESSION_LOG_CAPACITY + 20) {
            shared.append_log(SyncLogEntry {
                ts_ms: i as i64,
                report: None,
                error: None,
            });
        }

        let log = shared.log.lock().unwrap();
        assert_eq!(log.len(), SESSION_LOG_CAPACITY);
        assert_eq!(log.front().unwrap().ts_ms, 20);
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let first = calculate_backoff(1);
        assert!(first >= Duration::from_millis(2500) && first <= Duration::from_secs(5));

        let third = calculate_backoff(3);
        assert!(third >= Duration::from_secs(10) && third <= Duration::from_secs(20));

        for retry in 10..15 {
            assert!(calculate_backoff(retry) <= Duration::from_secs(RETRY_MAX_SECONDS));
        }
    }
}
