//! Debounced, cancellable sound resolution.
//!
//! Resolution runs on a dedicated worker thread fed by a channel of jobs.
//! A job carries a fire-at instant (the debounce deadline); the worker
//! sleeps until then, re-checks that the identifier still exists, and only
//! then talks to the sample source. The store lock is never held across a
//! fetch, and removal of the identifier at any point before commit makes
//! the result discarded rather than applied.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::sample::SampleData;
use super::{ResolveStatus, SoundQuery, SymbolKind, SymbolStore, SymbolValue};

/// Why a fetch produced no sample.
#[derive(Debug)]
pub enum FetchError {
    /// The source has nothing matching the query.
    NotFound,
    /// The source found a candidate but could not deliver it.
    Failed(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::NotFound => write!(f, "no matching sample"),
            FetchError::Failed(msg) => write!(f, "fetch failed: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Where samples come from. Implementations may block; they are only ever
/// called from the resolution worker.
pub trait SampleSource: Send + Sync {
    fn fetch(&self, query: &SoundQuery) -> Result<SampleData, FetchError>;
}

/// A source with no samples at all. Every sound ends up `Unavailable`,
/// which the player renders as silence.
pub struct NullSource;

impl SampleSource for NullSource {
    fn fetch(&self, _query: &SoundQuery) -> Result<SampleData, FetchError> {
        Err(FetchError::NotFound)
    }
}

/// Serves `{name}.wav` files out of a local directory. Query parameters
/// other than the name are ignored; the filesystem has no notion of them.
pub struct DirSource {
    dir: PathBuf,
}

impl DirSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl SampleSource for DirSource {
    fn fetch(&self, query: &SoundQuery) -> Result<SampleData, FetchError> {
        let path = self.dir.join(format!("{}.wav", query.name));
        if !path.is_file() {
            return Err(FetchError::NotFound);
        }
        SampleData::from_wav_file(&path).map_err(|e| FetchError::Failed(e.to_string()))
    }
}

/// Receives status transitions as resolution progresses. Called from the
/// worker thread, never while the store lock is held.
pub trait StatusObserver: Send + Sync {
    fn status_changed(&self, identifier: &str, status: ResolveStatus);
}

/// Discards every notification.
pub struct NullObserver;

impl StatusObserver for NullObserver {
    fn status_changed(&self, _identifier: &str, _status: ResolveStatus) {}
}

/// Forwards notifications over a channel, e.g. to a display loop.
pub struct ChannelObserver {
    tx: Mutex<Sender<(String, ResolveStatus)>>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<(String, ResolveStatus)>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl StatusObserver for ChannelObserver {
    fn status_changed(&self, identifier: &str, status: ResolveStatus) {
        let tx = self.tx.lock().expect("observer channel poisoned");
        let _ = tx.send((identifier.to_string(), status));
    }
}

/// One scheduled resolution attempt.
pub(crate) struct ResolveJob {
    pub(crate) key: String,
    pub(crate) query: SoundQuery,
    pub(crate) fire_at: Instant,
}

/// The resolution thread. Joined on drop.
pub(crate) struct Worker {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(
        store: Arc<Mutex<SymbolStore>>,
        jobs: Receiver<ResolveJob>,
        source: Arc<dyn SampleSource>,
        observer: Arc<dyn StatusObserver>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || {
            run_worker(store, jobs, source, observer, stop_flag);
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

const POLL: Duration = Duration::from_millis(25);

fn run_worker(
    store: Arc<Mutex<SymbolStore>>,
    jobs: Receiver<ResolveJob>,
    source: Arc<dyn SampleSource>,
    observer: Arc<dyn StatusObserver>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        let job = match jobs.recv_timeout(POLL) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // Wait out the debounce window, still responsive to shutdown.
        while Instant::now() < job.fire_at {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(POLL.min(job.fire_at.saturating_duration_since(Instant::now())));
        }

        resolve_one(&store, &*source, &*observer, job);
    }
}

fn resolve_one(
    store: &Mutex<SymbolStore>,
    source: &dyn SampleSource,
    observer: &dyn StatusObserver,
    job: ResolveJob,
) {
    // Fire-time check: the identifier may have been pruned while we waited.
    {
        let mut guard = store.lock().expect("symbol store poisoned");
        guard.pending.remove(&job.key);
        match guard.records.get_mut(&job.key) {
            Some(rec) if rec.kind == SymbolKind::Sound => {
                rec.status = ResolveStatus::Searching;
            }
            _ => return,
        }
    }
    observer.status_changed(&job.key, ResolveStatus::Searching);

    // The fetch may block for a while; no lock held here.
    let fetched = source.fetch(&job.query);

    if fetched.is_ok() {
        observer.status_changed(&job.key, ResolveStatus::Downloading);
    }

    // Commit-time check: a removal that raced the fetch wins.
    let committed = {
        let mut guard = store.lock().expect("symbol store poisoned");
        match guard.records.get_mut(&job.key) {
            Some(rec) => match fetched {
                Ok(data) => {
                    rec.status = ResolveStatus::Available;
                    rec.value = Some(SymbolValue::Sample(Arc::new(data)));
                    Some(ResolveStatus::Available)
                }
                Err(_) => {
                    rec.status = ResolveStatus::Unavailable;
                    Some(ResolveStatus::Unavailable)
                }
            },
            None => None,
        }
    };

    if let Some(status) = committed {
        observer.status_changed(&job.key, status);
    }
}
