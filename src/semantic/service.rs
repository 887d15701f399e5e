//! Index session: the single owner of the vector store.
//!
//! Provides a high-level interface over the semantic engine:
//! - Lazily syncs the index with the item tree on first use
//! - Serializes every build and update behind one lock, so concurrent callers
//!   wait for the same build instead of starting their own
//! - Builds updates on a copy and swaps it in only after it was persisted

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use crate::config::{CollectionConfig, Config};
use crate::items::{Item, ItemSource, SourceError};
use crate::semantic::centroids::{self, DispatchOutcome, FolderCentroid, SuggestionReport};
use crate::semantic::cluster::{cluster_captures, discover_captures, ClusterReport};
use crate::semantic::embeddings::{embed_all, Embedder, EmbeddingError};
use crate::semantic::hybrid::{rank, SearchHit};
use crate::semantic::index::{IndexError, VectorStore};
use crate::semantic::pending::{ChangeBatch, Clock, PendingChanges};
use crate::semantic::preprocess::{content_hash, semantic_text};
use crate::semantic::signature::{plan_sync, signature, SyncAction};
use crate::semantic::storage::{IndexSnapshot, SnapshotError, SnapshotRepository};
use crate::storage::SnapshotStore;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum SemanticError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Storage error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Item source error: {0}")]
    Source(#[from] SourceError),

    #[error("Unknown item: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome of a sync or a flush.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub action: &'static str,
    /// Items sent to the embedding service
    pub embedded: usize,
    pub removed: usize,
    /// Items whose metadata changed without a new embedding
    pub refreshed: usize,
    /// Items left out because their embedding was a zero vector
    pub skipped: usize,
    pub indexed: usize,
}

impl SyncReport {
    fn new(action: &'static str) -> Self {
        Self {
            action,
            embedded: 0,
            removed: 0,
            refreshed: 0,
            skipped: 0,
            indexed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub initialized: bool,
    pub indexed: usize,
    pub signature: Option<String>,
    pub pending_created: usize,
    pub pending_moved: usize,
    pub pending_removed: usize,
}

/// An item waiting for its embedding.
struct EmbedJob {
    item: Item,
    text: String,
    hash: u64,
}

impl EmbedJob {
    fn new(item: Item, collection: &CollectionConfig) -> Self {
        let text = semantic_text(&item, collection);
        let hash = content_hash(&text);
        Self { item, text, hash }
    }
}

pub struct IndexSession {
    collection: CollectionConfig,
    debounce: Duration,
    default_top_k: usize,
    embedder: Arc<dyn Embedder>,
    source: Arc<dyn ItemSource>,
    snapshots: SnapshotRepository,
    clock: Arc<dyn Clock>,
    /// Uninitialized until the first sync.
    state: Mutex<Option<IndexSnapshot>>,
    pending: Mutex<PendingChanges>,
}

impl IndexSession {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        source: Arc<dyn ItemSource>,
        store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            collection: config.collection.clone(),
            debounce: Duration::from_millis(config.sync.debounce_ms),
            default_top_k: config.search.default_top_k,
            embedder,
            source,
            snapshots: SnapshotRepository::new(store),
            clock,
            state: Mutex::new(None),
            pending: Mutex::new(PendingChanges::default()),
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, Option<IndexSnapshot>>, SemanticError> {
        self.state
            .lock()
            .map_err(|e| SemanticError::Internal(format!("Lock poisoned: {}", e)))
    }

    fn lock_pending(&self) -> Result<MutexGuard<'_, PendingChanges>, SemanticError> {
        self.pending
            .lock()
            .map_err(|e| SemanticError::Internal(format!("Lock poisoned: {}", e)))
    }

    pub fn is_initialized(&self) -> bool {
        self.state
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Bring the index in line with the item tree and persist it.
    pub fn sync(&self) -> Result<SyncReport, SemanticError> {
        let mut guard = self.lock_state()?;
        self.sync_locked(&mut guard)
    }

    /// Sync once if nothing is loaded yet.
    pub fn ensure_initialized(&self) -> Result<(), SemanticError> {
        let mut guard = self.lock_state()?;
        if guard.is_none() {
            self.sync_locked(&mut guard)?;
        }
        Ok(())
    }

    /// Run `f` against the initialized index while holding the lock.
    fn with_index<R>(
        &self,
        f: impl FnOnce(&IndexSnapshot) -> Result<R, SemanticError>,
    ) -> Result<R, SemanticError> {
        let mut guard = self.lock_state()?;
        if guard.is_none() {
            self.sync_locked(&mut guard)?;
        }
        let state = guard
            .as_ref()
            .ok_or_else(|| SemanticError::Internal("index missing after sync".to_string()))?;
        f(state)
    }

    fn sync_locked(&self, guard: &mut Option<IndexSnapshot>) -> Result<SyncReport, SemanticError> {
        let tree = self.source.list_all()?;

        let loaded = if guard.is_none() {
            self.load_snapshot()
        } else {
            None
        };
        let current = guard.as_ref().or(loaded.as_ref());

        match self.reconcile(current, &tree.items)? {
            Some((next, mut report)) => {
                self.persist(&next)?;
                report.indexed = next.store.len();
                log::info!(
                    "index {}: {} embedded, {} removed, {} refreshed, {} skipped, {} indexed",
                    report.action,
                    report.embedded,
                    report.removed,
                    report.refreshed,
                    report.skipped,
                    report.indexed
                );
                *guard = Some(next);
                Ok(report)
            }
            None => {
                if let Some(loaded) = loaded {
                    *guard = Some(loaded);
                }
                let mut report = SyncReport::new(SyncAction::Hit.label());
                report.indexed = guard.as_ref().map_or(0, |s| s.store.len());
                log::info!("index hit: {} indexed", report.indexed);
                Ok(report)
            }
        }
    }

    fn load_snapshot(&self) -> Option<IndexSnapshot> {
        let model_id = self.embedder.model_id_hash();
        match self.snapshots.load(&model_id, self.embedder.dimensions()) {
            Ok(Some(snapshot)) => {
                log::info!("Loaded {} vectors from storage", snapshot.store.len());
                Some(snapshot)
            }
            Ok(None) => {
                log::info!("No existing index, starting fresh");
                None
            }
            Err(e) => {
                log::warn!("Stored index is unreadable, rebuilding: {}", e);
                None
            }
        }
    }

    fn persist(&self, snapshot: &IndexSnapshot) -> Result<(), SemanticError> {
        self.snapshots.save(snapshot, &self.embedder.model_id_hash())?;
        Ok(())
    }

    /// The next index for `live`, or `None` when `current` already matches it.
    fn reconcile(
        &self,
        current: Option<&IndexSnapshot>,
        live: &[Item],
    ) -> Result<Option<(IndexSnapshot, SyncReport)>, SemanticError> {
        let live_signature = signature(live);
        let action = plan_sync(
            live,
            &live_signature,
            current.map(|s| (s.signature.as_str(), &s.store)),
        );
        log::debug!("sync plan for {} live items: {}", live.len(), action.label());

        let mut report = SyncReport::new(action.label());
        let store = match (action, current) {
            (SyncAction::Hit, _) => return Ok(None),
            (SyncAction::Incremental { added, removed }, Some(current)) => {
                let mut store = current.store.clone();
                for id in &removed {
                    store.remove(id);
                }
                report.removed = removed.len();

                let mut jobs: Vec<EmbedJob> = added
                    .into_iter()
                    .map(|item| EmbedJob::new(item, &self.collection))
                    .collect();

                // retained items: re-embed edited ones, refresh the rest
                for item in live {
                    let Some(entry) = store.get(&item.id) else {
                        continue;
                    };
                    let job = EmbedJob::new(item.clone(), &self.collection);
                    if job.hash == entry.content_hash {
                        if entry.item != *item {
                            report.refreshed += 1;
                        }
                        store.refresh_item(job.item);
                    } else {
                        jobs.push(job);
                    }
                }

                report.embedded = jobs.len();
                report.skipped = self.embed_into(&mut store, jobs)?;
                store
            }
            (_, _) => {
                let mut store = VectorStore::with_capacity(self.embedder.dimensions(), live.len());
                let jobs: Vec<EmbedJob> = live
                    .iter()
                    .map(|item| EmbedJob::new(item.clone(), &self.collection))
                    .collect();

                report.action = SyncAction::FullRebuild.label();
                report.embedded = jobs.len();
                report.skipped = self.embed_into(&mut store, jobs)?;
                store
            }
        };

        Ok(Some((
            IndexSnapshot {
                signature: live_signature,
                store,
            },
            report,
        )))
    }

    /// Embed `jobs` in one batch and store the vectors. Returns how many were skipped.
    fn embed_into(
        &self,
        store: &mut VectorStore,
        jobs: Vec<EmbedJob>,
    ) -> Result<usize, SemanticError> {
        let texts: Vec<String> = jobs.iter().map(|job| job.text.clone()).collect();
        let vectors = embed_all(self.embedder.as_ref(), &texts)?;

        let mut skipped = 0;
        for (job, vector) in jobs.into_iter().zip(vectors) {
            let id = job.item.id.clone();
            match store.insert(job.item, job.hash, vector) {
                Ok(()) => {}
                Err(IndexError::ZeroNormVector) => {
                    log::warn!("Skipping item {}: embedding is a zero vector", id);
                    store.remove(&id);
                    skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(skipped)
    }

    /// Hybrid search over the index.
    pub fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchHit>, SemanticError> {
        let top_k = top_k.unwrap_or(self.default_top_k);

        self.with_index(|state| {
            let query_vector = self.embedder.embed_one(query)?;
            if query_vector.len() != state.store.dimensions() {
                return Err(IndexError::DimensionMismatch {
                    expected: state.store.dimensions(),
                    got: query_vector.len(),
                }
                .into());
            }

            Ok(rank(query, &query_vector, &state.store, top_k))
        })
    }

    pub fn build_centroids(&self) -> Result<Vec<FolderCentroid>, SemanticError> {
        self.with_index(|state| {
            let centroids = centroids::build_centroids(&state.store, &self.collection);
            log::info!("built {} folder centroids", centroids.len());
            Ok(centroids.into_values().collect())
        })
    }

    fn centroid_map(&self, state: &IndexSnapshot) -> BTreeMap<String, FolderCentroid> {
        centroids::build_centroids(&state.store, &self.collection)
    }

    /// Folder suggestions for items in unsorted locations.
    pub fn suggest_categories(&self) -> Result<SuggestionReport, SemanticError> {
        self.with_index(|state| {
            let centroids = self.centroid_map(state);
            if centroids.is_empty() {
                log::info!("no categorized folders to suggest from");
            }
            Ok(centroids::suggest(&state.store, &centroids, &self.collection))
        })
    }

    /// Nearest folder for one item, typically a fresh capture.
    pub fn dispatch_item(&self, item_id: &str) -> Result<DispatchOutcome, SemanticError> {
        self.with_index(|state| {
            let centroids = self.centroid_map(state);
            Ok(centroids::dispatch(&state.store, item_id, &centroids))
        })
    }

    /// Cluster the capture sub-collection of the current item tree.
    pub fn cluster_subcollection(&self) -> Result<ClusterReport, SemanticError> {
        self.with_index(|state| {
            let tree = self.source.list_all()?;
            let captures = discover_captures(&tree, &self.collection);
            let report = cluster_captures(
                &captures,
                &state.store,
                self.embedder.as_ref(),
                &self.collection,
            )?;
            Ok(report)
        })
    }

    /// Forget everything: in-memory index, pending changes and the persisted snapshot.
    pub fn reset(&self) -> Result<(), SemanticError> {
        {
            let mut guard = self.lock_state()?;
            *guard = None;
        }
        self.lock_pending()?.clear();
        self.snapshots.clear()?;
        log::info!("index reset");
        Ok(())
    }

    fn record(&self, f: impl FnOnce(&mut PendingChanges)) -> Result<bool, SemanticError> {
        if !self.is_initialized() {
            return Ok(false);
        }
        f(&mut *self.lock_pending()?);
        Ok(true)
    }

    /// Returns whether the change was recorded; nothing is tracked before the first sync.
    pub fn notify_created(&self, id: &str) -> Result<bool, SemanticError> {
        let now = self.clock.now();
        self.record(|pending| pending.record_created(id, now))
    }

    pub fn notify_moved(&self, id: &str) -> Result<bool, SemanticError> {
        let now = self.clock.now();
        self.record(|pending| pending.record_moved(id, now))
    }

    pub fn notify_removed(&self, id: &str) -> Result<bool, SemanticError> {
        let now = self.clock.now();
        self.record(|pending| pending.record_removed(id, now))
    }

    /// Apply pending changes once the debounce window has passed.
    ///
    /// `Ok(None)` when nothing was due. On failure the batch is dropped and the
    /// index stays as it was.
    pub fn flush_pending(&self) -> Result<Option<SyncReport>, SemanticError> {
        if !self.lock_pending()?.is_due(self.clock.now(), self.debounce) {
            return Ok(None);
        }

        let mut guard = self.lock_state()?;
        let batch = self.lock_pending()?.take();
        // a reset may have drained it in between
        if batch.is_empty() {
            return Ok(None);
        }
        let Some(current) = guard.as_ref() else {
            return Ok(None);
        };

        let next = self
            .apply_batch(current, &batch)
            .and_then(|(next, report)| self.persist(&next).map(|()| (next, report)));

        match next {
            Ok((next, mut report)) => {
                report.indexed = next.store.len();
                log::info!(
                    "flushed {} pending changes: {} embedded, {} removed, {} refreshed",
                    batch.len(),
                    report.embedded,
                    report.removed,
                    report.refreshed
                );
                *guard = Some(next);
                Ok(Some(report))
            }
            Err(e) => {
                log::error!("Dropping {} pending changes: {}", batch.len(), e);
                Err(e)
            }
        }
    }

    fn apply_batch(
        &self,
        current: &IndexSnapshot,
        batch: &ChangeBatch,
    ) -> Result<(IndexSnapshot, SyncReport), SemanticError> {
        let tree = self.source.list_all()?;
        let live: HashMap<&str, &Item> = tree
            .items
            .iter()
            .map(|item| (item.id.as_str(), item))
            .collect();

        let mut store = current.store.clone();
        let mut report = SyncReport::new("flush");

        for id in &batch.removed {
            if !live.contains_key(id.as_str()) && store.remove(id).is_some() {
                report.removed += 1;
            }
        }

        let mut jobs = Vec::new();
        for id in &batch.upserts {
            // moved out of the tree, e.g. into the trash
            let Some(item) = live.get(id.as_str()) else {
                if store.remove(id).is_some() {
                    report.removed += 1;
                }
                continue;
            };
            let job = EmbedJob::new((*item).clone(), &self.collection);
            let unchanged = store
                .get(id)
                .is_some_and(|entry| entry.content_hash == job.hash);
            if unchanged {
                store.refresh_item(job.item);
                report.refreshed += 1;
            } else {
                jobs.push(job);
            }
        }

        report.embedded = jobs.len();
        report.skipped = self.embed_into(&mut store, jobs)?;

        // describes exactly what is stored, so unnotified drift is caught by the next sync
        let items: Vec<Item> = store.sorted_entries().into_iter().map(|e| e.item.clone()).collect();
        Ok((
            IndexSnapshot {
                signature: signature(&items),
                store,
            },
            report,
        ))
    }

    pub fn status(&self) -> Result<Status, SemanticError> {
        let (initialized, indexed, signature) = {
            let guard = self.lock_state()?;
            match guard.as_ref() {
                Some(state) => (true, state.store.len(), Some(state.signature.clone())),
                None => (false, 0, None),
            }
        };
        let pending = self.lock_pending()?;

        Ok(Status {
            initialized,
            indexed,
            signature,
            pending_created: pending.created_count(),
            pending_moved: pending.moved_count(),
            pending_removed: pending.removed_count(),
        })
    }
}
