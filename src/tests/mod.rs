//! Cross-module scenarios over a full `IndexSession`, plus the fakes they share.


use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::items::{Folder, Item, ItemSource, ItemTree, SourceError, PATH_SEPARATOR};
use crate::semantic::{Clock, Embedder, EmbeddingError, IndexSession};
use crate::storage::SnapshotStore;

pub const DIMS: usize = 3;

/// Snapshot store kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn keys(&self) -> BTreeSet<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

impl SnapshotStore for MemoryStore {
    fn get(&self, key: &str) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> std::io::Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> std::io::Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

struct Script {
    rules: Vec<(String, Vec<f32>)>,
    failing: AtomicBool,
    calls: AtomicUsize,
    embedded: Mutex<Vec<String>>,
}

/// Embeds text by keyword: the first rule whose keyword occurs in the lowercased
/// text wins, anything else maps to `[0, 0, 1]`. Clones share their script.
#[derive(Clone)]
pub struct ScriptedEmbedder {
    script: Arc<Script>,
}

impl ScriptedEmbedder {
    pub fn new(rules: &[(&str, [f32; DIMS])]) -> Self {
        Self {
            script: Arc::new(Script {
                rules: rules
                    .iter()
                    .map(|(keyword, vector)| (keyword.to_lowercase(), vector.to_vec()))
                    .collect(),
                failing: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                embedded: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn fail(&self, failing: bool) {
        self.script.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of texts embedded so far.
    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    /// Texts embedded so far, in call order.
    pub fn embedded(&self) -> Vec<String> {
        self.script.embedded.lock().unwrap().clone()
    }

    pub fn reset_counters(&self) {
        self.script.calls.store(0, Ordering::SeqCst);
        self.script.embedded.lock().unwrap().clear();
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        self.script
            .rules
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword.as_str()))
            .map(|(_, vector)| vector.clone())
            .unwrap_or_else(|| vec![0.0, 0.0, 1.0])
    }
}

impl Embedder for ScriptedEmbedder {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_batch(&[text.to_string()])?.remove(0))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.script.failing.load(Ordering::SeqCst) {
            return Err(EmbeddingError::EmbeddingFailed("scripted outage".to_string()));
        }

        self.script.calls.fetch_add(texts.len(), Ordering::SeqCst);
        self.script
            .embedded
            .lock()
            .unwrap()
            .extend(texts.iter().cloned());
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }
}

/// Item source returning whatever tree was set last.
#[derive(Default)]
pub struct FixedSource {
    tree: Mutex<ItemTree>,
}

impl FixedSource {
    pub fn set(&self, tree: ItemTree) {
        *self.tree.lock().unwrap() = tree;
    }

    pub fn update(&self, f: impl FnOnce(&mut ItemTree)) {
        f(&mut self.tree.lock().unwrap());
    }
}

impl ItemSource for FixedSource {
    fn list_all(&self) -> Result<ItemTree, SourceError> {
        Ok(self.tree.lock().unwrap().clone())
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}

pub fn item(id: &str, title: &str, url: &str, folder_path: &str) -> Item {
    Item {
        id: id.to_string(),
        title: title.to_string(),
        url: url.to_string(),
        folder_path: folder_path.to_string(),
        parent_id: None,
        added_at: None,
    }
}

/// Items given as `(id, title, url, folder path)`; every folder on those paths is listed.
pub fn tree(items: &[(&str, &str, &str, &str)]) -> ItemTree {
    let items: Vec<Item> = items
        .iter()
        .map(|(id, title, url, path)| item(id, title, url, path))
        .collect();

    let mut paths = BTreeSet::new();
    for item in &items {
        let segments: Vec<&str> = item
            .folder_path
            .split(PATH_SEPARATOR)
            .filter(|s| !s.is_empty())
            .collect();
        for depth in 1..=segments.len() {
            paths.insert(segments[..depth].join(PATH_SEPARATOR));
        }
    }

    ItemTree {
        items,
        folders: paths.into_iter().map(folder).collect(),
    }
}

pub fn folder(path: String) -> Folder {
    let title = path.rsplit(PATH_SEPARATOR).next().unwrap_or_default().to_string();
    Folder {
        id: path.clone(),
        title,
        path,
    }
}

/// A session over in-memory fakes, with handles to all of them.
pub struct Harness {
    pub session: Arc<IndexSession>,
    pub embedder: ScriptedEmbedder,
    pub source: Arc<FixedSource>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(tree: ItemTree, embedder: ScriptedEmbedder) -> Self {
        let source = Arc::new(FixedSource::default());
        source.set(tree);
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(ManualClock::new());

        let session = Arc::new(IndexSession::new(
            &Config::default(),
            Arc::new(embedder.clone()),
            source.clone(),
            store.clone(),
            clock.clone(),
        ));

        Self {
            session,
            embedder,
            source,
            store,
            clock,
        }
    }

    /// A fresh session over the same store and source, as after a restart.
    pub fn restart(&self) -> IndexSession {
        IndexSession::new(
            &Config::default(),
            Arc::new(self.embedder.clone()),
            self.source.clone(),
            self.store.clone(),
            self.clock.clone(),
        )
    }
}

pub fn session_with(tree: ItemTree, embedder: ScriptedEmbedder) -> Arc<IndexSession> {
    Harness::new(tree, embedder).session
}
