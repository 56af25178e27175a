//! Symbol table — identifiers, their kinds, and asynchronous sound
//! resolution.
//!
//! The table is the one piece of state shared between the synchronous
//! analysis path and the out-of-band resolution worker, so the store lives
//! behind a mutex and the worker only ever writes through it. Playback
//! reads resolved values lazily at step-emission time, so resolution
//! latency never blocks the tick loop.

pub mod resolver;
pub mod sample;

pub use resolver::{
    ChannelObserver, DirSource, FetchError, NullObserver, NullSource, SampleSource,
    StatusObserver,
};
pub use sample::{SampleData, SampleError};

use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::lang::analyzer::AnalyzerContext;
use crate::lang::token::ParamMap;
use resolver::{ResolveJob, Worker};

/// What an identifier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Function,
    Sound,
}

/// Resolution state of a sound identifier. `Unresolved` is the initial
/// state; `Unavailable` is terminal and non-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    Unresolved,
    Searching,
    Downloading,
    Available,
    Unavailable,
}

/// A resolved or assigned value.
#[derive(Debug, Clone)]
pub enum SymbolValue {
    /// Numeric variable value (plain number or hz).
    Number(f64),
    /// Decoded sample for an available sound.
    Sample(Arc<SampleData>),
}

/// One tracked identifier.
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    pub identifier: String,
    pub kind: SymbolKind,
    pub status: ResolveStatus,
    pub value: Option<SymbolValue>,
}

impl SymbolRecord {
    fn new(identifier: &str, kind: SymbolKind) -> Self {
        Self {
            identifier: identifier.to_string(),
            kind,
            status: ResolveStatus::Unresolved,
            value: None,
        }
    }
}

/// The lookup key sent to the resolution collaborator: the literal name
/// plus any query parameters.
#[derive(Debug, Clone)]
pub struct SoundQuery {
    pub name: String,
    pub params: ParamMap,
}

/// A field-wise upsert applied by [`SymbolTable::merge`]. Unset fields
/// leave the record untouched (last write wins per field).
#[derive(Debug, Clone, Default)]
pub struct SymbolPatch {
    pub identifier: String,
    pub kind: Option<SymbolKind>,
    pub status: Option<ResolveStatus>,
    pub value: Option<SymbolValue>,
    pub query: Option<SoundQuery>,
}

impl SymbolPatch {
    pub fn variable(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            kind: Some(SymbolKind::Variable),
            ..Default::default()
        }
    }

    pub fn function(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            kind: Some(SymbolKind::Function),
            ..Default::default()
        }
    }

    pub fn sound(identifier: &str, query: SoundQuery) -> Self {
        Self {
            identifier: identifier.to_string(),
            kind: Some(SymbolKind::Sound),
            query: Some(query),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: SymbolValue) -> Self {
        self.value = Some(value);
        self
    }
}

pub(crate) struct SymbolStore {
    pub(crate) records: HashMap<String, SymbolRecord>,
    /// Identifiers referenced per block, for dangling-identifier pruning.
    active: HashMap<usize, HashSet<String>>,
    /// Sound identifiers with a debounce job queued but not yet fired.
    pub(crate) pending: HashSet<String>,
}

impl SymbolStore {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            active: HashMap::new(),
            pending: HashSet::new(),
        }
    }

    /// Remove every record absent from the union of all blocks' active
    /// sets. Returns what was pruned.
    fn collect_garbage(&mut self) -> Vec<String> {
        let union: HashSet<&String> = self.active.values().flatten().collect();
        let removed: Vec<String> = self
            .records
            .keys()
            .filter(|k| !union.contains(*k))
            .cloned()
            .collect();
        for key in &removed {
            self.records.remove(key);
            self.pending.remove(key);
        }
        removed
    }
}

/// Owning handle to the symbol store and its resolution worker.
pub struct SymbolTable {
    store: Arc<Mutex<SymbolStore>>,
    jobs: mpsc::Sender<ResolveJob>,
    debounce: Duration,
    _worker: Worker,
}

impl SymbolTable {
    pub fn new(
        source: Arc<dyn SampleSource>,
        observer: Arc<dyn StatusObserver>,
        debounce: Duration,
    ) -> Self {
        let store = Arc::new(Mutex::new(SymbolStore::new()));
        let (jobs, rx) = mpsc::channel();
        let worker = Worker::spawn(store.clone(), rx, source, observer);
        Self {
            store,
            jobs,
            debounce,
            _worker: worker,
        }
    }

    /// A read handle for the scheduler and analyzer.
    pub fn view(&self) -> SymbolView {
        SymbolView {
            store: self.store.clone(),
        }
    }

    /// Field-wise upsert. A brand-new sound identifier schedules exactly
    /// one debounced resolution attempt; repeated merges of the same
    /// still-unresolved identifier inside the window coalesce into it.
    pub fn merge(&self, patch: SymbolPatch) {
        let job = {
            let mut guard = self.store.lock().expect("symbol store poisoned");
            let store = &mut *guard;
            let record = store
                .records
                .entry(patch.identifier.clone())
                .or_insert_with(|| {
                    SymbolRecord::new(&patch.identifier, patch.kind.unwrap_or(SymbolKind::Sound))
                });
            if let Some(kind) = patch.kind {
                record.kind = kind;
            }
            if let Some(status) = patch.status {
                record.status = status;
            }
            if let Some(value) = patch.value {
                record.value = Some(value);
            }

            let wants_resolution = record.kind == SymbolKind::Sound
                && record.status == ResolveStatus::Unresolved
                && !store.pending.contains(&patch.identifier);
            if wants_resolution {
                store.pending.insert(patch.identifier.clone());
                let query = patch.query.unwrap_or_else(|| SoundQuery {
                    name: patch.identifier.clone(),
                    params: ParamMap::new(),
                });
                Some(ResolveJob {
                    key: patch.identifier.clone(),
                    query,
                    fire_at: Instant::now() + self.debounce,
                })
            } else {
                None
            }
        };

        if let Some(job) = job {
            // The worker only disappears on shutdown; a failed send is moot.
            let _ = self.jobs.send(job);
        }
    }

    pub fn get(&self, identifier: &str) -> Option<SymbolRecord> {
        self.store
            .lock()
            .expect("symbol store poisoned")
            .records
            .get(identifier)
            .cloned()
    }

    pub fn remove(&self, identifier: &str) {
        let mut store = self.store.lock().expect("symbol store poisoned");
        store.records.remove(identifier);
        store.pending.remove(identifier);
    }

    /// Replace `block`'s active-identifier set and prune every identifier
    /// no block references anymore. Must run after each re-analysis.
    pub fn update_active_identifiers(
        &self,
        block: usize,
        referenced: HashSet<String>,
    ) -> Vec<String> {
        let mut store = self.store.lock().expect("symbol store poisoned");
        store.active.insert(block, referenced);
        store.collect_garbage()
    }

    /// Drop a block entirely, pruning identifiers it alone kept alive.
    pub fn remove_block(&self, block: usize) -> Vec<String> {
        let mut store = self.store.lock().expect("symbol store poisoned");
        store.active.remove(&block);
        store.collect_garbage()
    }

}

/// Read-only handle onto the store, cheap to clone across components.
#[derive(Clone)]
pub struct SymbolView {
    store: Arc<Mutex<SymbolStore>>,
}

impl SymbolView {
    pub fn get(&self, identifier: &str) -> Option<SymbolRecord> {
        self.store
            .lock()
            .expect("symbol store poisoned")
            .records
            .get(identifier)
            .cloned()
    }
}

impl AnalyzerContext for SymbolView {
    fn is_variable(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|r| r.kind == SymbolKind::Variable)
    }
}
