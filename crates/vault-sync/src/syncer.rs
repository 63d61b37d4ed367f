//! FileSyncer: drives repeated reconciliation of one vault.
//!
//! Lifecycle: `new` → `init` → `start` → ticks → `teardown`.
//!
//! Each tick:
//!
//! 1. Merge remote changes pushed by the subscription since the last tick
//! 2. Query the remote store (incremental from the newest known entry time,
//!    or full when a refresh is due)
//! 3. Scan the local tree and merge it
//! 4. Diff every node and apply at most `max_update_per_syncer` actions
//! 5. Rewrite the cache if the remote half changed
//! 6. Report the cycle and schedule the next tick on the clock
//!
//! If the remote store is unreachable (or times out) the tick degrades to a
//! local-only pass: the scan is merged but nothing is transferred.

use crate::cache::{CacheError, LocalMetadataCache};
use crate::clock::{self, Clock, Elapsed, TimerId};
use crate::config::SyncerConfig;
use crate::device_id::DeviceId;
use crate::diff::{self, Action, ActionKind};
use crate::document::{document_id, Author, DocumentContent, FileVersion, RemoteDocument};
use crate::error::{Result, SyncerError, TransferError};
use crate::filter::PathFilter;
use crate::fs::{FsError, LocalFileStore, WriteOptions};
use crate::hash::ContentHash;
use crate::node::{LocalHalf, StorageRef};
use crate::progress::{CycleSummary, ProgressSink};
use crate::registry::{LocalSnapshot, Registry, RemoteOrigin, RemoteSnapshot};
use crate::remote::{self, DocumentQuery, RemoteDocumentStore, RemoteError, Subscription};
use futures::channel::mpsc;
use futures::{FutureExt, StreamExt};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, debug_span, info, info_span, warn, Instrument};

/// Collaborators a syncer runs against.
pub struct SyncContext<L, R> {
    pub local: L,
    pub remote: R,
    pub clock: Arc<dyn Clock>,
    pub progress: Arc<dyn ProgressSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncerState {
    Constructed,
    Initialized,
    Running,
    TornDown,
}

/// Outcome of one applied action.
enum Applied {
    Done,
    /// The remote moved on before the action ran; the next tick re-plans
    Superseded,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct HandleInner {
    torn_down: AtomicBool,
    timer: Mutex<Option<TimerId>>,
    subscription: Mutex<Option<Subscription>>,
    tick_tx: mpsc::UnboundedSender<()>,
    clock: Arc<dyn Clock>,
}

/// Cloneable handle for stopping a syncer from another task.
#[derive(Clone)]
pub struct SyncerHandle {
    inner: Arc<HandleInner>,
}

impl SyncerHandle {
    /// Stop the syncer: cancel the scheduled tick, stop scheduling new
    /// ones, and release the remote subscription.
    ///
    /// Idempotent. A tick already in flight runs to completion.
    pub fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_timer();
        let subscription = lock(&self.inner.subscription).take();
        drop(subscription);
        self.inner.tick_tx.close_channel();
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    /// Run a tick as soon as the syncer is next polled, instead of waiting
    /// for the timer. The interval restarts after that tick.
    pub fn request_tick(&self) {
        if !self.is_torn_down() {
            let _ = self.inner.tick_tx.unbounded_send(());
        }
    }

    fn schedule(&self, delay_ms: u64) {
        if self.is_torn_down() {
            return;
        }
        let tx = self.inner.tick_tx.clone();
        let id = self.inner.clock.set_timeout(
            Box::new(move || {
                let _ = tx.unbounded_send(());
            }),
            delay_ms,
        );
        if let Some(previous) = lock(&self.inner.timer).replace(id) {
            self.inner.clock.clear_timeout(previous);
        }
        // Teardown may have run between the check above and storing the id
        if self.is_torn_down() {
            self.cancel_timer();
        }
    }

    /// Forget the scheduled timer, cancelling it if it has not fired yet.
    fn cancel_timer(&self) {
        if let Some(id) = lock(&self.inner.timer).take() {
            self.inner.clock.clear_timeout(id);
        }
    }

    fn set_subscription(&self, subscription: Subscription) {
        let mut slot = lock(&self.inner.subscription);
        if !self.is_torn_down() {
            *slot = Some(subscription);
        }
    }

    fn is_subscribed(&self) -> bool {
        lock(&self.inner.subscription).is_some()
    }
}

/// Keeps one vault converged with the remote document store.
pub struct FileSyncer<L, R> {
    config: SyncerConfig,
    device_id: DeviceId,
    filter: PathFilter,
    local: L,
    remote: R,
    clock: Arc<dyn Clock>,
    progress: Arc<dyn ProgressSink>,
    cache: LocalMetadataCache,
    registry: Registry,
    state: SyncerState,
    ticks: u64,
    needs_full_refresh: bool,
    /// Paths whose action failed in the last apply; planned after the rest
    failed_last: BTreeSet<String>,
    /// The remote half changed since the cache was last written
    cache_dirty: bool,
    /// Documents pushed by the subscription, merged at the next tick
    pushes: Arc<Mutex<Vec<RemoteDocument>>>,
    last_summary: Option<CycleSummary>,
    handle: SyncerHandle,
    tick_rx: mpsc::UnboundedReceiver<()>,
}

impl<L: LocalFileStore, R: RemoteDocumentStore> FileSyncer<L, R> {
    /// Validate `config` and build a syncer. Performs no I/O.
    pub fn new(config: SyncerConfig, ctx: SyncContext<L, R>) -> Result<Self> {
        config.validate()?;

        let device_id = config.device_id.unwrap_or_else(DeviceId::generate);
        let filter = config.filter.clone().with_internal(&config.cache_path);
        let cache = LocalMetadataCache::new(
            &config.cache_path,
            &config.syncer_config_id,
            &config.vault_name,
        );
        let (tick_tx, tick_rx) = mpsc::unbounded();
        let handle = SyncerHandle {
            inner: Arc::new(HandleInner {
                torn_down: AtomicBool::new(false),
                timer: Mutex::new(None),
                subscription: Mutex::new(None),
                tick_tx,
                clock: Arc::clone(&ctx.clock),
            }),
        };

        Ok(Self {
            config,
            device_id,
            filter,
            local: ctx.local,
            remote: ctx.remote,
            clock: ctx.clock,
            progress: ctx.progress,
            cache,
            registry: Registry::new(),
            state: SyncerState::Constructed,
            ticks: 0,
            needs_full_refresh: false,
            failed_last: BTreeSet::new(),
            cache_dirty: false,
            pushes: Arc::new(Mutex::new(Vec::new())),
            last_summary: None,
            handle,
            tick_rx,
        })
    }

    pub fn config(&self) -> &SyncerConfig {
        &self.config
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn state(&self) -> SyncerState {
        if self.handle.is_torn_down() {
            SyncerState::TornDown
        } else {
            self.state
        }
    }

    pub fn handle(&self) -> SyncerHandle {
        self.handle.clone()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub fn last_summary(&self) -> Option<&CycleSummary> {
        self.last_summary.as_ref()
    }

    /// Current remote-half view, keyed by path.
    pub fn remote_files(&self) -> RemoteSnapshot {
        self.registry.remote_snapshot()
    }

    /// Make the next tick run a full remote query.
    pub fn request_full_refresh(&mut self) {
        debug!("Full remote refresh requested");
        self.needs_full_refresh = true;
    }

    /// Load the cache, scan the local tree, and do the first remote
    /// reconciliation (merge only, nothing is transferred).
    ///
    /// With a usable cache no remote query is made. Without one, a full
    /// query is required and its failure is fatal.
    pub async fn init(&mut self) -> Result<()> {
        if self.state() != SyncerState::Constructed {
            return Err(SyncerError::Init(format!(
                "init called on a syncer that is {:?}",
                self.state()
            )));
        }
        let span = info_span!("init", syncer = %self.config.syncer_config_id);
        self.init_inner().instrument(span).await
    }

    async fn init_inner(&mut self) -> Result<()> {
        let cached = match self.cache.load(&self.local).await {
            Ok(load) => {
                if !load.skipped.is_empty() {
                    warn!("Skipped {} malformed cache entries", load.skipped.len());
                }
                Some(load)
            }
            Err(CacheError::NotFound(path)) => {
                info!("No remote cache at {}, full query required", path);
                None
            }
            Err(e) => {
                warn!("Discarding remote cache: {}", e);
                self.progress.on_error(&SyncerError::Cache(e));
                None
            }
        };

        let local = self
            .scan_local()
            .await
            .map_err(|e| SyncerError::Init(format!("local scan failed: {}", e)))?;

        match cached {
            Some(load) => {
                let newest = load.max_entry_time();
                let entries: RemoteSnapshot = load
                    .entries
                    .into_iter()
                    .filter(|(path, _)| self.filter.matches(path))
                    .collect();
                info!(
                    "Loaded {} remote entries from cache (saved at {}, newest entry {:?})",
                    entries.len(),
                    load.saved_at,
                    newest
                );
                self.registry
                    .merge_remote_snapshot(&entries, RemoteOrigin::Cache);
                // Writes made while we were away may carry entry times
                // below the cached maximum
                self.needs_full_refresh = true;
            }
            None => {
                self.subscribe();
                let query = DocumentQuery::all(&self.config.vault_name);
                let docs = self
                    .remote_call(self.remote.query_all(&query))
                    .await
                    .map_err(|e| SyncerError::Init(format!("full remote query failed: {}", e)))?;
                let snapshot = self.remote_snapshot_from(docs);
                info!("Loaded {} remote entries from store", snapshot.len());
                self.registry
                    .merge_remote_snapshot(&snapshot, RemoteOrigin::LiveFull);
                self.cache_dirty = true;
            }
        }

        self.registry.merge_local_snapshot(&local);
        if !self.handle.is_subscribed() {
            self.subscribe();
        }
        self.state = SyncerState::Initialized;
        info!(
            "Initialized with {} paths ({} local)",
            self.registry.len(),
            local.len()
        );
        Ok(())
    }

    /// Begin ticking. The first tick is scheduled immediately on the clock.
    pub fn start(&mut self) -> Result<()> {
        if self.state() != SyncerState::Initialized {
            return Err(SyncerError::Init(format!(
                "start called on a syncer that is {:?}",
                self.state()
            )));
        }
        self.state = SyncerState::Running;
        self.handle.schedule(0);
        Ok(())
    }

    /// Wait for the next scheduled tick and run it.
    ///
    /// Returns false once the syncer is torn down (or was never started).
    pub async fn next_tick(&mut self) -> bool {
        if self.state() != SyncerState::Running {
            return false;
        }
        match self.tick_rx.next().await {
            Some(()) => self.run_scheduled_tick().await,
            None => {
                self.state = SyncerState::TornDown;
                false
            }
        }
    }

    /// Run every tick whose timer has already fired, without waiting.
    /// Returns the number of ticks run.
    pub async fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while self.state() == SyncerState::Running {
            match self.tick_rx.next().now_or_never() {
                Some(Some(())) => {
                    if !self.run_scheduled_tick().await {
                        break;
                    }
                    ran += 1;
                }
                Some(None) => {
                    self.state = SyncerState::TornDown;
                    break;
                }
                None => break,
            }
        }
        ran
    }

    /// Stop ticking. See `SyncerHandle::teardown`.
    pub fn teardown(&mut self) {
        if self.state() != SyncerState::TornDown {
            info!("Tearing down syncer {}", self.config.syncer_config_id);
        }
        self.handle.teardown();
        self.state = SyncerState::TornDown;
    }

    async fn run_scheduled_tick(&mut self) -> bool {
        self.handle.cancel_timer();
        // Requests queued behind this one are served by this tick
        while let Some(Some(())) = self.tick_rx.next().now_or_never() {}
        if self.handle.is_torn_down() {
            self.state = SyncerState::TornDown;
            return false;
        }
        self.tick().await;
        self.handle.schedule(self.config.tick_interval_ms);
        true
    }

    async fn tick(&mut self) {
        self.ticks += 1;
        let span = info_span!(
            "tick",
            syncer = %self.config.syncer_config_id,
            tick = self.ticks
        );
        let summary = self.run_tick().instrument(span).await;
        self.last_summary = Some(summary);
    }

    async fn run_tick(&mut self) -> CycleSummary {
        let mut summary = CycleSummary {
            tick: self.ticks,
            started_at: self.clock.now(),
            ..CycleSummary::default()
        };
        self.progress.new_cycle(summary.tick, summary.started_at);

        self.drain_pushes();

        let every = self.config.full_refresh_every;
        let full = self.needs_full_refresh || (every > 0 && self.ticks % every == 0);
        match self
            .refresh_remote(full)
            .instrument(debug_span!("remote", full))
            .await
        {
            Ok(()) => {
                summary.remote_available = true;
                summary.full_refresh = full;
            }
            Err(e) => {
                warn!("Remote unavailable, local-only pass: {}", e);
                self.progress.on_error(&SyncerError::RemoteUnavailable(e));
            }
        }
        let resubscribed = summary.remote_available && !self.handle.is_subscribed();
        if resubscribed {
            self.subscribe();
        }
        // Without pushes, writes stamped by a lagging clock can land below
        // max_entry_time; only a full query finds them
        if resubscribed || !summary.remote_available || !self.handle.is_subscribed() {
            self.needs_full_refresh = true;
        }

        let local_ok = match self.scan_local().instrument(debug_span!("scan")).await {
            Ok(snapshot) => {
                self.registry.merge_local_snapshot(&snapshot);
                true
            }
            Err(e) => {
                warn!("Local scan failed, skipping transfers: {}", e);
                self.progress.on_error(&SyncerError::LocalUnavailable(e));
                false
            }
        };

        if summary.remote_available && local_ok {
            let plan = diff::plan(
                &self.registry,
                self.config.tombstone_policy,
                self.config.max_update_per_syncer,
                &self.failed_last,
            );
            if !plan.deferred.is_empty() {
                debug!("Deferring {} actions to later ticks", plan.deferred.len());
            }
            summary.deferred = plan.deferred.len();
            self.apply(plan.actions, &mut summary)
                .instrument(debug_span!("apply"))
                .await;
        }

        if self.cache_dirty {
            self.persist().instrument(debug_span!("persist")).await;
        }

        self.registry.settle_deletions();
        let pruned = self.registry.prune();
        if pruned > 0 {
            debug!("Pruned {} empty nodes", pruned);
        }

        summary.finished_at = self.clock.now();
        if summary.applied() > 0 || summary.failed > 0 {
            info!(
                "Tick done: {} up, {} down, {} deleted remotely, {} deleted locally, {} failed",
                summary.uploaded,
                summary.downloaded,
                summary.deleted_remote,
                summary.deleted_local,
                summary.failed
            );
        } else {
            debug!("Tick done, nothing to do");
        }
        self.progress.cycle_done(&summary);
        summary
    }

    /// Race a remote call against the configured timeout.
    async fn remote_call<T>(
        &self,
        call: impl Future<Output = remote::Result<T>>,
    ) -> remote::Result<T> {
        match clock::timeout(self.clock.as_ref(), self.config.remote_timeout_ms, call).await {
            Ok(result) => result,
            Err(Elapsed(ms)) => Err(RemoteError::Timeout(ms)),
        }
    }

    fn subscribe(&mut self) {
        if self.handle.is_torn_down() {
            return;
        }
        let pushes = Arc::clone(&self.pushes);
        let query = DocumentQuery::all(&self.config.vault_name);
        let on_change = Arc::new(move |doc: RemoteDocument| {
            lock(&pushes).push(doc);
        });
        match self.remote.subscribe(query, on_change) {
            Ok(subscription) => {
                debug!("Subscribed to remote changes");
                self.handle.set_subscription(subscription);
            }
            Err(e) => {
                warn!("Remote subscription failed, relying on polling: {}", e);
                self.progress.on_error(&SyncerError::RemoteUnavailable(e));
            }
        }
    }

    fn drain_pushes(&mut self) {
        let pushed = std::mem::take(&mut *lock(&self.pushes));
        if pushed.is_empty() {
            return;
        }
        debug!("Merging {} pushed remote changes", pushed.len());
        let snapshot = self.remote_snapshot_from(pushed);
        if self
            .registry
            .merge_remote_snapshot(&snapshot, RemoteOrigin::LiveIncremental)
        {
            self.cache_dirty = true;
        }
    }

    async fn refresh_remote(&mut self, full: bool) -> remote::Result<()> {
        let vault = &self.config.vault_name;
        let (query, origin) = match self.registry.max_entry_time() {
            // Re-read the newest millisecond: other peers may have written
            // in it after we listed
            Some(newest) if !full => (
                DocumentQuery::newer_than(vault, newest.saturating_sub(1)),
                RemoteOrigin::LiveIncremental,
            ),
            _ => (DocumentQuery::all(vault), RemoteOrigin::LiveFull),
        };

        let docs = self.remote_call(self.remote.query_all(&query)).await?;
        debug!("Remote returned {} documents", docs.len());

        let snapshot = self.remote_snapshot_from(docs);
        if self.registry.merge_remote_snapshot(&snapshot, origin) {
            self.cache_dirty = true;
        }
        if origin.is_complete() {
            self.needs_full_refresh = false;
        }
        Ok(())
    }

    /// Validate and filter documents into remote halves. For repeated
    /// paths the latest entry time wins.
    fn remote_snapshot_from(&self, docs: Vec<RemoteDocument>) -> RemoteSnapshot {
        let mut snapshot = RemoteSnapshot::new();
        for doc in docs {
            if doc.vault_name != self.config.vault_name {
                continue;
            }
            if let Err(e) = doc.validate() {
                let err = SyncerError::corrupt(&doc.path, e);
                warn!("Ignoring remote document: {}", err);
                self.progress.on_error(&err);
                continue;
            }
            if !self.filter.matches(&doc.path) {
                continue;
            }
            let half = doc.to_remote_half();
            match snapshot.get(&doc.path) {
                Some(existing) if existing.entry_time >= half.entry_time => {}
                _ => {
                    snapshot.insert(doc.path, half);
                }
            }
        }
        snapshot
    }

    /// List and hash the local tree.
    ///
    /// Files whose size and mtime match the last scan keep their hash
    /// without being read. A file that cannot be read keeps its last known
    /// state (so it is not mistaken for a deletion).
    async fn scan_local(&self) -> std::result::Result<LocalSnapshot, FsError> {
        let entries = self.local.list(&self.filter).await?;
        let mut snapshot = LocalSnapshot::new();
        let mut hashed = 0;

        for entry in entries {
            if !self.filter.matches(&entry.path) {
                continue;
            }
            let previous = self
                .registry
                .get(&entry.path)
                .and_then(|node| node.local.as_ref());

            if let Some(prev) = previous.filter(|p| p.size == entry.size && p.mtime == entry.mtime) {
                let half = LocalHalf {
                    ctime: entry.ctime,
                    ..prev.clone()
                };
                snapshot.insert(entry.path, half);
                continue;
            }

            match self.local.read_binary(&entry.path).await {
                Ok(bytes) => {
                    hashed += 1;
                    let half = LocalHalf {
                        hash: ContentHash::of(&bytes),
                        size: bytes.len() as u64,
                        mtime: entry.mtime,
                        ctime: entry.ctime,
                    };
                    snapshot.insert(entry.path, half);
                }
                Err(e) => {
                    warn!("Cannot read {}, keeping last known state: {}", entry.path, e);
                    if let Some(prev) = previous {
                        snapshot.insert(entry.path, prev.clone());
                    }
                }
            }
        }

        debug!("Scanned {} local files ({} hashed)", snapshot.len(), hashed);
        Ok(snapshot)
    }

    async fn apply(&mut self, actions: Vec<Action>, summary: &mut CycleSummary) {
        self.failed_last.clear();
        for action in actions {
            let name = action.kind.name();
            self.progress.add_entry(&action.path, name);
            self.progress.set_entry_progress(&action.path, 0.0);

            let result = match action.kind {
                ActionKind::Upload(_) => self.upload(&action.path).await,
                ActionKind::Download(_) => self.download(&action.path).await,
                ActionKind::DeleteRemote => self.delete_remote(&action.path).await,
                ActionKind::DeleteLocal => self.delete_local(&action.path).await,
            };

            match result {
                Ok(Applied::Done) => {
                    debug!(path = %action.path, kind = ?action.kind, "Applied {}", name);
                    match action.kind {
                        ActionKind::Upload(_) => summary.uploaded += 1,
                        ActionKind::Download(_) => summary.downloaded += 1,
                        ActionKind::DeleteRemote => summary.deleted_remote += 1,
                        ActionKind::DeleteLocal => summary.deleted_local += 1,
                    }
                    self.progress.set_entry_progress(&action.path, 1.0);
                }
                Ok(Applied::Superseded) => {
                    debug!(path = %action.path, "Skipped {}: remote changed", name);
                    self.progress.set_entry_progress(&action.path, 1.0);
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(path = %action.path, action = name, "{}", e);
                    self.progress.on_error(&e);
                    self.failed_last.insert(action.path);
                }
            }
        }
    }

    fn author(&self) -> Author<'_> {
        Author {
            vault_name: &self.config.vault_name,
            user_id: &self.config.user_id,
            device_id: self.device_id,
            syncer_config_id: &self.config.syncer_config_id,
        }
    }

    /// Entry time for a new write to `path`: now, but always later than
    /// the version it replaces.
    fn next_entry_time(&self, path: &str) -> u64 {
        let now = self.clock.now();
        match self.registry.get(path).and_then(|node| node.remote.as_ref()) {
            Some(remote) if remote.entry_time >= now => remote.entry_time + 1,
            _ => now,
        }
    }

    async fn upload(&mut self, path: &str) -> Result<Applied> {
        const ACTION: &str = "upload";

        let stat = self
            .local
            .stat(path)
            .await
            .map_err(|e| SyncerError::transfer(path, ACTION, e))?;
        let bytes = self
            .local
            .read_binary(path)
            .await
            .map_err(|e| SyncerError::transfer(path, ACTION, e))?;
        let after = self
            .local
            .stat(path)
            .await
            .map_err(|e| SyncerError::transfer(path, ACTION, e))?;
        // Written to while we read; retried next tick
        if bytes.len() as u64 != stat.size || after.size != stat.size || after.mtime != stat.mtime {
            return Err(SyncerError::transfer(
                path,
                ACTION,
                TransferError::ChangedDuringRead,
            ));
        }
        let version = FileVersion {
            hash: ContentHash::of(&bytes),
            size: bytes.len() as u64,
            mtime: stat.mtime,
            ctime: stat.ctime,
        };
        let id = document_id(&self.config.vault_name, path);

        let content = if version.size <= self.config.max_inline_bytes {
            DocumentContent::Raw(bytes)
        } else {
            let key = format!("{}/{}", id, version.hash);
            let reference = self
                .remote_call(self.remote.put_blob(&key, &bytes))
                .await
                .map_err(|e| SyncerError::transfer(path, ACTION, e))?;
            self.progress.set_entry_progress(path, 0.5);
            DocumentContent::ExternalRef(reference)
        };

        let local = LocalHalf {
            hash: version.hash.clone(),
            size: version.size,
            mtime: version.mtime,
            ctime: version.ctime,
        };
        let doc = RemoteDocument::live(
            path,
            version,
            content,
            &self.author(),
            self.next_entry_time(path),
        );
        self.remote_call(self.remote.set_document(&id, &doc))
            .await
            .map_err(|e| SyncerError::transfer(path, ACTION, e))?;

        self.registry.record_remote_write(path, doc.to_remote_half());
        self.registry.record_local_write(path, local);
        self.cache_dirty = true;
        Ok(Applied::Done)
    }

    async fn download(&mut self, path: &str) -> Result<Applied> {
        const ACTION: &str = "download";

        let Some(listed) = self.registry.get(path).and_then(|node| node.remote.clone()) else {
            return Err(SyncerError::corrupt(path, "no remote version to download"));
        };

        let (bytes, half) = match &listed.storage {
            StorageRef::ExternalRef(reference) => {
                let bytes = self
                    .remote_call(self.remote.get_blob(reference))
                    .await
                    .map_err(|e| SyncerError::transfer(path, ACTION, e))?;
                (bytes, listed.clone())
            }
            StorageRef::Raw => {
                let id = document_id(&self.config.vault_name, path);
                let doc = self
                    .remote_call(self.remote.get_document(&id))
                    .await
                    .map_err(|e| SyncerError::transfer(path, ACTION, e))?
                    .ok_or_else(|| {
                        SyncerError::transfer(path, ACTION, RemoteError::NotFound(id.clone()))
                    })?;
                doc.validate().map_err(|e| SyncerError::corrupt(path, e))?;

                let half = doc.to_remote_half();
                if half.entry_time < listed.entry_time {
                    return Err(SyncerError::corrupt(
                        path,
                        "fetched document is older than the listed version",
                    ));
                }
                if half.deleted {
                    debug!("{} was deleted remotely before download", path);
                    self.registry.record_remote_write(path, half);
                    self.cache_dirty = true;
                    return Ok(Applied::Superseded);
                }
                let bytes = match doc.content {
                    DocumentContent::Raw(bytes) => bytes,
                    DocumentContent::ExternalRef(reference) => self
                        .remote_call(self.remote.get_blob(&reference))
                        .await
                        .map_err(|e| SyncerError::transfer(path, ACTION, e))?,
                };
                (bytes, half)
            }
        };

        let actual = ContentHash::of(&bytes);
        if actual != half.hash {
            return Err(SyncerError::corrupt(
                path,
                format!("content hash {} does not match {}", actual, half.hash),
            ));
        }
        self.progress.set_entry_progress(path, 0.5);

        let options = WriteOptions {
            mtime: Some(half.mtime),
            ctime: Some(half.ctime),
        };
        self.local
            .write_binary(path, &bytes, options)
            .await
            .map_err(|e| SyncerError::transfer(path, ACTION, e))?;

        // Record what the file system actually stamped so the next scan
        // reuses this hash
        let stat = self.local.stat(path).await.ok();
        let local = LocalHalf {
            hash: actual,
            size: bytes.len() as u64,
            mtime: stat.as_ref().map_or(half.mtime, |s| s.mtime),
            ctime: stat.as_ref().map_or(half.ctime, |s| s.ctime),
        };
        self.registry.record_local_write(path, local);
        if half != listed {
            self.registry.record_remote_write(path, half);
            self.cache_dirty = true;
        }
        Ok(Applied::Done)
    }

    async fn delete_remote(&mut self, path: &str) -> Result<Applied> {
        const ACTION: &str = "delete-remote";

        let Some(deleted_hash) = self
            .registry
            .get(path)
            .and_then(|node| node.deleted_locally.clone())
        else {
            return Ok(Applied::Superseded);
        };
        let doc = RemoteDocument::tombstone(
            path,
            deleted_hash,
            &self.author(),
            self.next_entry_time(path),
        );
        self.remote_call(self.remote.set_document(&doc.id(), &doc))
            .await
            .map_err(|e| SyncerError::transfer(path, ACTION, e))?;

        self.registry.record_remote_write(path, doc.to_remote_half());
        self.cache_dirty = true;
        Ok(Applied::Done)
    }

    async fn delete_local(&mut self, path: &str) -> Result<Applied> {
        match self.local.delete(path).await {
            Ok(()) | Err(FsError::NotFound(_)) => {}
            Err(e) => return Err(SyncerError::transfer(path, "delete-local", e)),
        }
        self.registry.record_local_delete(path);
        Ok(Applied::Done)
    }

    async fn persist(&mut self) {
        let snapshot = self.registry.remote_snapshot();
        match self.cache.save(&self.local, &snapshot, self.clock.now()).await {
            Ok(()) => self.cache_dirty = false,
            Err(e) => {
                warn!("Cache write failed, retrying next tick: {}", e);
                self.progress.on_error(&SyncerError::Cache(e));
            }
        }
    }
}

impl<L, R> Drop for FileSyncer<L, R> {
    fn drop(&mut self) {
        self.handle.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::document::tests::live_doc;
    use crate::error::ErrorKind;
    use crate::fs::InMemoryFs;
    use crate::progress::{EventBus, NoopProgress, SyncEvent};
    use crate::fs::{FileStat, LocalEntry};
    use crate::remote::InMemoryRemote;
    use std::sync::atomic::AtomicUsize;

    type TestSyncer = FileSyncer<Arc<InMemoryFs>, Arc<InMemoryRemote>>;

    const INTERVAL: u64 = 1000;

    fn config(id: &str, device: u64) -> SyncerConfig {
        let mut config = SyncerConfig::new(id, "vault", "user-1");
        config.device_id = Some(DeviceId::from(device));
        config.tick_interval_ms = INTERVAL;
        config
    }

    fn syncer(
        config: SyncerConfig,
        fs: &Arc<InMemoryFs>,
        remote: &Arc<InMemoryRemote>,
        clock: &Arc<SimulatedClock>,
    ) -> TestSyncer {
        FileSyncer::new(
            config,
            SyncContext {
                local: Arc::clone(fs),
                remote: Arc::clone(remote),
                clock: clock.clone(),
                progress: Arc::new(NoopProgress),
            },
        )
        .unwrap()
    }

    async fn write(fs: &InMemoryFs, path: &str, content: &[u8]) {
        fs.write_binary(path, content, WriteOptions::default())
            .await
            .unwrap();
    }

    /// Advance one interval and run the tick that fires.
    async fn tick(syncer: &mut TestSyncer, clock: &SimulatedClock) -> CycleSummary {
        clock.advance(INTERVAL);
        assert_eq!(syncer.run_pending().await, 1);
        syncer.last_summary().cloned().unwrap()
    }

    async fn started(
        fs: &Arc<InMemoryFs>,
        remote: &Arc<InMemoryRemote>,
        clock: &Arc<SimulatedClock>,
    ) -> TestSyncer {
        let mut s = syncer(config("main", 1), fs, remote, clock);
        s.init().await.unwrap();
        s.start().unwrap();
        s
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut bad = config("main", 1);
        bad.max_update_per_syncer = 0;
        let clock = Arc::new(SimulatedClock::new(0));
        let result = FileSyncer::new(
            bad,
            SyncContext {
                local: Arc::new(InMemoryFs::new()),
                remote: Arc::new(InMemoryRemote::new()),
                clock,
                progress: Arc::new(NoopProgress),
            },
        );
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::Config));
    }

    #[tokio::test]
    async fn test_init_without_cache_requires_remote() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        remote.set_offline(true);

        let mut s = syncer(config("main", 1), &fs, &remote, &clock);
        let err = s.init().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Init);
        assert_eq!(s.state(), SyncerState::Constructed);
    }

    #[tokio::test]
    async fn test_lifecycle_order_is_enforced() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));

        let mut s = syncer(config("main", 1), &fs, &remote, &clock);
        assert!(s.start().is_err());
        assert!(!s.next_tick().await);

        s.init().await.unwrap();
        assert_eq!(s.state(), SyncerState::Initialized);
        assert!(s.init().await.is_err());
        s.start().unwrap();
        assert_eq!(s.state(), SyncerState::Running);
        assert_eq!(clock.pending_timers(), 1);
    }

    #[tokio::test]
    async fn test_ticks_follow_the_clock() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        let mut s = started(&fs, &remote, &clock).await;

        // First tick is due immediately
        clock.advance(0);
        assert_eq!(s.run_pending().await, 1);
        assert_eq!(s.run_pending().await, 0);

        clock.advance(INTERVAL - 1);
        assert_eq!(s.run_pending().await, 0);
        clock.advance(1);
        assert!(s.next_tick().await);
        assert_eq!(s.tick_count(), 2);
    }

    #[tokio::test]
    async fn test_requested_ticks_coalesce_and_restart_interval() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        let mut s = started(&fs, &remote, &clock).await;
        clock.advance(0);
        assert_eq!(s.run_pending().await, 1);

        write(&fs, "a.md", b"a").await;
        let handle = s.handle();
        handle.request_tick();
        handle.request_tick();
        assert_eq!(s.run_pending().await, 1);
        assert_eq!(s.last_summary().unwrap().uploaded, 1);

        // The scheduled tick moved a full interval past the requested one
        assert_eq!(clock.pending_timers(), 1);
        clock.advance(INTERVAL - 1);
        assert_eq!(s.run_pending().await, 0);
        clock.advance(1);
        assert_eq!(s.run_pending().await, 1);

        s.teardown();
        handle.request_tick();
        assert_eq!(s.run_pending().await, 0);
        assert_eq!(s.tick_count(), 3);
    }

    #[tokio::test]
    async fn test_teardown_cancels_and_is_idempotent() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        let mut s = started(&fs, &remote, &clock).await;
        assert_eq!(remote.subscriber_count(), 1);

        let handle = s.handle();
        handle.teardown();
        handle.teardown();
        s.teardown();

        assert_eq!(s.state(), SyncerState::TornDown);
        assert_eq!(clock.pending_timers(), 0);
        assert_eq!(remote.subscriber_count(), 0);
        clock.advance(INTERVAL * 5);
        assert!(!s.next_tick().await);
        assert_eq!(s.tick_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_during_tick_lets_it_finish() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        let mut s = started(&fs, &remote, &clock).await;
        let handle = s.handle();
        let timeout_ms = s.config().remote_timeout_ms;

        remote.set_stalled(true);
        clock.advance(0);
        {
            let mut running = Box::pin(s.run_pending());
            assert!(futures::poll!(running.as_mut()).is_pending());
            handle.teardown();
            clock.advance(timeout_ms);
            assert_eq!(running.await, 1);
        }

        assert_eq!(s.tick_count(), 1);
        assert_eq!(s.state(), SyncerState::TornDown);
        assert_eq!(clock.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_remote_timeout_degrades_to_local_only() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        let mut s = started(&fs, &remote, &clock).await;
        let timeout_ms = s.config().remote_timeout_ms;
        write(&fs, "a.md", b"hello").await;

        remote.set_stalled(true);
        clock.advance(0);
        {
            let mut running = Box::pin(s.run_pending());
            assert!(futures::poll!(running.as_mut()).is_pending());
            clock.advance(timeout_ms);
            assert_eq!(running.await, 1);
        }

        let summary = s.last_summary().unwrap();
        assert!(!summary.remote_available);
        assert_eq!(summary.uploaded, 0);
        // Local state still merged
        assert!(s.registry().get("a.md").unwrap().local.is_some());
        assert_eq!(remote.write_count(), 0);

        remote.set_stalled(false);
        let summary = tick(&mut s, &clock).await;
        assert!(summary.remote_available);
        assert_eq!(summary.uploaded, 1);
    }

    #[tokio::test]
    async fn test_cap_defers_excess_actions() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        for name in ["a.md", "b.md", "c.md"] {
            write(&fs, name, name.as_bytes()).await;
        }
        let mut cfg = config("main", 1);
        cfg.max_update_per_syncer = 2;
        let mut s = syncer(cfg, &fs, &remote, &clock);
        s.init().await.unwrap();
        s.start().unwrap();

        let first = tick(&mut s, &clock).await;
        assert_eq!((first.uploaded, first.deferred), (2, 1));
        assert!(remote.document("vault", "c.md").is_none());

        let second = tick(&mut s, &clock).await;
        assert_eq!((second.uploaded, second.deferred), (1, 0));
        assert!(remote.document("vault", "c.md").is_some());
    }

    #[tokio::test]
    async fn test_failed_transfer_is_isolated_and_retried() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        remote.insert(live_doc("a.md", b"aaa", 900_000, 10));
        remote.insert(live_doc("b.md", b"bbb", 900_000, 11));
        fs.fail_path("b.md");

        let mut s = started(&fs, &remote, &clock).await;
        let summary = tick(&mut s, &clock).await;
        assert_eq!((summary.downloaded, summary.failed), (1, 1));
        assert_eq!(fs.contents("a.md").unwrap(), b"aaa");

        fs.clear_failures();
        let summary = tick(&mut s, &clock).await;
        assert_eq!((summary.downloaded, summary.failed), (1, 0));
        assert_eq!(fs.contents("b.md").unwrap(), b"bbb");
    }

    #[tokio::test]
    async fn test_repeated_failures_do_not_starve_deferred_actions() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        for (i, name) in ["a.md", "b.md", "c.md"].iter().enumerate() {
            remote.insert(live_doc(name, name.as_bytes(), 900_000, 10 + i as u64));
        }
        fs.fail_path("a.md");
        fs.fail_path("b.md");
        let mut cfg = config("main", 1);
        cfg.max_update_per_syncer = 2;
        let mut s = syncer(cfg, &fs, &remote, &clock);
        s.init().await.unwrap();
        s.start().unwrap();

        let first = tick(&mut s, &clock).await;
        assert_eq!((first.failed, first.deferred), (2, 1));
        assert!(fs.contents("c.md").is_none());

        let second = tick(&mut s, &clock).await;
        assert_eq!((second.downloaded, second.failed, second.deferred), (1, 1, 1));
        assert_eq!(fs.contents("c.md").unwrap(), b"c.md");

        // The failing pair keeps rotating through the cap
        fs.clear_failures();
        tick(&mut s, &clock).await;
        tick(&mut s, &clock).await;
        assert_eq!(fs.contents("a.md").unwrap(), b"a.md");
        assert_eq!(fs.contents("b.md").unwrap(), b"b.md");
    }

    /// Rewrites one file right after each read of it while armed, like an
    /// editor saving in the middle of an upload.
    struct EditedWhileRead {
        inner: Arc<InMemoryFs>,
        path: &'static str,
        armed: AtomicBool,
        edits: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl LocalFileStore for EditedWhileRead {
        async fn list(&self, filter: &PathFilter) -> std::result::Result<Vec<LocalEntry>, FsError> {
            self.inner.list(filter).await
        }

        async fn read_binary(&self, path: &str) -> std::result::Result<Vec<u8>, FsError> {
            let bytes = self.inner.read_binary(path).await?;
            if path == self.path && self.armed.load(Ordering::SeqCst) {
                let n = self.edits.fetch_add(1, Ordering::SeqCst);
                let edited = format!("edited {}", n);
                self.inner
                    .write_binary(path, edited.as_bytes(), WriteOptions::default())
                    .await?;
            }
            Ok(bytes)
        }

        async fn write_binary(
            &self,
            path: &str,
            content: &[u8],
            options: WriteOptions,
        ) -> std::result::Result<(), FsError> {
            self.inner.write_binary(path, content, options).await
        }

        async fn delete(&self, path: &str) -> std::result::Result<(), FsError> {
            self.inner.delete(path).await
        }

        async fn stat(&self, path: &str) -> std::result::Result<FileStat, FsError> {
            self.inner.stat(path).await
        }
    }

    #[tokio::test]
    async fn test_upload_retries_file_edited_while_read() {
        let inner = Arc::new(InMemoryFs::new());
        write(&inner, "a.md", b"v1").await;
        let fs = Arc::new(EditedWhileRead {
            inner: Arc::clone(&inner),
            path: "a.md",
            armed: AtomicBool::new(false),
            edits: AtomicUsize::new(0),
        });
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        let mut s = FileSyncer::new(
            config("main", 1),
            SyncContext {
                local: Arc::clone(&fs),
                remote: Arc::clone(&remote),
                clock: clock.clone(),
                progress: Arc::new(NoopProgress),
            },
        )
        .unwrap();
        s.init().await.unwrap();
        s.start().unwrap();

        fs.armed.store(true, Ordering::SeqCst);
        clock.advance(INTERVAL);
        s.run_pending().await;
        let summary = s.last_summary().cloned().unwrap();
        assert_eq!((summary.uploaded, summary.failed), (0, 1));
        assert!(remote.document("vault", "a.md").is_none());

        fs.armed.store(false, Ordering::SeqCst);
        clock.advance(INTERVAL);
        s.run_pending().await;
        let doc = remote.document("vault", "a.md").unwrap();
        let on_disk = inner.contents("a.md").unwrap();
        assert_eq!(on_disk, b"edited 0");
        assert_eq!(doc.file_hash, ContentHash::of(&on_disk));
        assert_eq!(doc.m_time, inner.stat("a.md").await.unwrap().mtime);
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_not_written() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        let mut doc = live_doc("a.md", b"real", 900_000, 10);
        doc.content = DocumentContent::Raw(b"fake".to_vec());
        remote.insert(doc);

        let bus = Arc::new(EventBus::new());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_clone = Arc::clone(&errors);
        let _sub = bus.subscribe(move |event| {
            if let SyncEvent::Error { kind, .. } = event {
                errors_clone.lock().unwrap().push(kind);
            }
        });
        let mut s = FileSyncer::new(
            config("main", 1),
            SyncContext {
                local: Arc::clone(&fs),
                remote: Arc::clone(&remote),
                clock: clock.clone(),
                progress: bus.clone(),
            },
        )
        .unwrap();
        s.init().await.unwrap();
        s.start().unwrap();
        clock.advance(0);
        s.run_pending().await;

        assert!(fs.contents("a.md").is_none());
        assert_eq!(s.last_summary().unwrap().failed, 1);
        assert_eq!(*errors.lock().unwrap(), vec!["corrupt-data".to_string()]);
    }

    #[tokio::test]
    async fn test_large_files_use_blob_storage() {
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        let fs_a = Arc::new(InMemoryFs::new());
        let fs_b = Arc::new(InMemoryFs::new());
        write(&fs_a, "video.bin", b"more than eight bytes").await;

        let mut cfg = config("main", 1);
        cfg.max_inline_bytes = 8;
        let mut a = syncer(cfg, &fs_a, &remote, &clock);
        let mut b = syncer(config("main", 2), &fs_b, &remote, &clock);
        for s in [&mut a, &mut b] {
            s.init().await.unwrap();
            s.start().unwrap();
        }

        clock.advance(0);
        a.run_pending().await;
        let doc = remote.document("vault", "video.bin").unwrap();
        assert!(matches!(doc.content, DocumentContent::ExternalRef(_)));

        b.run_pending().await;
        assert_eq!(fs_b.contents("video.bin").unwrap(), b"more than eight bytes");
    }

    #[tokio::test]
    async fn test_pushes_are_merged_at_next_tick() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        let mut s = started(&fs, &remote, &clock).await;
        clock.advance(0);
        s.run_pending().await;

        remote.insert(live_doc("pushed.md", b"p", 900_000, 2_000_000));
        assert!(s.registry().get("pushed.md").is_none());

        // Offline: only the buffered push can bring the document in
        remote.set_offline(true);
        let summary = tick(&mut s, &clock).await;
        assert!(!summary.remote_available);
        let node = s.registry().get("pushed.md").unwrap();
        assert_eq!(node.remote.as_ref().unwrap().entry_time, 2_000_000);
        assert!(fs.contents("pushed.md").is_none());
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_retried() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));

        // Cache present so init succeeds offline
        let cache = LocalMetadataCache::new(crate::cache::DEFAULT_CACHE_PATH, "main", "vault");
        cache.save(fs.as_ref(), &RemoteSnapshot::new(), 1).await.unwrap();
        remote.set_offline(true);

        let mut s = started(&fs, &remote, &clock).await;
        assert_eq!(remote.subscriber_count(), 0);

        remote.set_offline(false);
        clock.advance(0);
        s.run_pending().await;
        assert_eq!(remote.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_full_refresh_on_request_and_schedule() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        remote.insert(live_doc("a.md", b"a", 900_000, 10));

        let mut cfg = config("main", 1);
        cfg.full_refresh_every = 3;
        let mut s = syncer(cfg, &fs, &remote, &clock);
        s.init().await.unwrap();
        s.start().unwrap();

        let flags: Vec<bool> = {
            let mut flags = Vec::new();
            for _ in 0..3 {
                flags.push(tick(&mut s, &clock).await.full_refresh);
            }
            flags
        };
        assert_eq!(flags, vec![false, false, true]);

        s.request_full_refresh();
        assert!(tick(&mut s, &clock).await.full_refresh);
        assert!(!tick(&mut s, &clock).await.full_refresh);
    }

    async fn cache_with(fs: &InMemoryFs, docs: &[&RemoteDocument]) {
        let snapshot: RemoteSnapshot = docs
            .iter()
            .map(|doc| (doc.path.clone(), doc.to_remote_half()))
            .collect();
        LocalMetadataCache::new(crate::cache::DEFAULT_CACHE_PATH, "main", "vault")
            .save(fs, &snapshot, 1_900_000)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_tick_after_cache_init_is_full() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(2_000_000));
        let newest = live_doc("newest.md", b"n", 1_400_000, 1_500_000);
        remote.insert(newest.clone());
        cache_with(&fs, &[&newest]).await;
        // Written while we were away by a peer whose clock lags ours
        remote.insert(live_doc("x.md", b"skewed", 1_390_000, 1_400_000));

        let mut s = started(&fs, &remote, &clock).await;
        let first = tick(&mut s, &clock).await;
        assert!(first.full_refresh);
        assert_eq!(fs.contents("x.md").unwrap(), b"skewed");
        assert!(!tick(&mut s, &clock).await.full_refresh);
    }

    #[tokio::test]
    async fn test_lagging_write_while_offline_is_found_on_reconnect() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(2_000_000));
        let newest = live_doc("newest.md", b"n", 1_400_000, 1_500_000);
        remote.insert(newest.clone());
        cache_with(&fs, &[&newest]).await;
        remote.set_offline(true);

        let mut s = started(&fs, &remote, &clock).await;
        remote.insert(live_doc("x.md", b"skewed", 1_390_000, 1_400_000));
        assert!(!tick(&mut s, &clock).await.remote_available);

        remote.set_offline(false);
        let back = tick(&mut s, &clock).await;
        assert!(back.remote_available && back.full_refresh);
        assert_eq!(fs.contents("x.md").unwrap(), b"skewed");
        assert_eq!(s.remote_files()["x.md"].entry_time, 1_400_000);
    }

    #[tokio::test]
    async fn test_cache_write_failure_is_retried() {
        let fs = Arc::new(InMemoryFs::new());
        let remote = Arc::new(InMemoryRemote::new());
        let clock = Arc::new(SimulatedClock::new(1_000_000));
        write(&fs, "a.md", b"a").await;
        fs.fail_path(crate::cache::DEFAULT_CACHE_PATH);

        let mut s = started(&fs, &remote, &clock).await;
        tick(&mut s, &clock).await;
        assert!(fs.contents(crate::cache::DEFAULT_CACHE_PATH).is_none());

        fs.clear_failures();
        let summary = tick(&mut s, &clock).await;
        assert_eq!(summary.applied(), 0);
        assert!(fs.contents(crate::cache::DEFAULT_CACHE_PATH).is_some());
    }
}
