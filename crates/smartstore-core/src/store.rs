//! SmartStore: a key-value store that persists itself
//!
//! `Store` combines an ordered in-memory map with a snapshot file. Every key
//! access marks the key dirty and arms the debounce timer; when the timer
//! fires, the flush engine rewrites the whole snapshot if anything actually
//! changed.
//!
//! **Read path**: in-memory map under a mutex, guarded by the lifecycle
//! **Write path**: map update, mark dirty, arm timer
//! **Background**: timer thread triggers a flush through the same coalescing
//! slot as explicit `flush()` calls
//!
//! Open, flush and close come in async and sync flavours. Async operations
//! run as spawned tokio tasks behind shared handles, so concurrent callers
//! join one operation instead of starting another.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::config::StoreOptions;
use crate::dirty::DirtyTracker;
use crate::error::{StoreError, StoreResult};
use crate::fileio::{DiskFiles, FileApi};
use crate::flush::{self, FlushPlan, SerializedCache};
use crate::lifecycle::{current_runtime, spawn_shared, InFlight, LifecycleState, SharedOp};
use crate::scheduler::FlushScheduler;
use crate::value::Value;

/// A persistent key-value store backed by a single file.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    /// Immutable after construction
    options: StoreOptions,
    files: Arc<dyn FileApi>,
    state: Mutex<StoreState>,
    scheduler: FlushScheduler,
    /// Runtime background flushes are spawned on, captured at open
    runtime: Mutex<Option<Handle>>,
}

#[derive(Default)]
struct StoreState {
    lifecycle: LifecycleState,
    data: IndexMap<String, Value>,
    dirty: DirtyTracker,
    cache: SerializedCache,
    inflight: InFlight,
}

/// What a lifecycle call does after inspecting the state.
enum Step {
    Done,
    Join(SharedOp),
    /// Wait for another operation to settle, then look again
    After(SharedOp),
    Yield,
}

impl Store {
    /// Create a closed store over the local filesystem.
    ///
    /// Fails with a configuration error before any I/O if the options are
    /// invalid (e.g. no path).
    pub fn new(options: impl Into<StoreOptions>) -> StoreResult<Self> {
        Self::with_file_api(options, Arc::new(DiskFiles))
    }

    /// Create a closed store over a custom file API.
    pub fn with_file_api(
        options: impl Into<StoreOptions>,
        files: Arc<dyn FileApi>,
    ) -> StoreResult<Self> {
        let options = options.into();
        options.validate()?;
        let scheduler = FlushScheduler::new(options.auto_flush_delay);
        Ok(Self {
            inner: Arc::new(StoreInner {
                options,
                files,
                state: Mutex::new(StoreState::default()),
                scheduler,
                runtime: Mutex::new(None),
            }),
        })
    }

    /// Create a store and open it.
    pub async fn load(options: impl Into<StoreOptions>) -> StoreResult<Self> {
        let store = Self::new(options)?;
        store.open().await?;
        Ok(store)
    }

    /// Create a store and open it synchronously.
    pub fn load_sync(options: impl Into<StoreOptions>) -> StoreResult<Self> {
        let store = Self::new(options)?;
        store.open_sync()?;
        Ok(store)
    }

    /// Open the store, loading the file if it exists.
    ///
    /// Idempotent once open; concurrent calls join the same read. Must be
    /// awaited inside a tokio runtime, otherwise fails with a misuse error.
    pub async fn open(&self) -> StoreResult<()> {
        let runtime = current_runtime("open")?;
        loop {
            let step = {
                let mut state = self.inner.state.lock();
                let lifecycle = state.lifecycle;
                match lifecycle {
                    LifecycleState::Open => Step::Done,
                    LifecycleState::Opening => {
                        state.inflight.opening.clone().map_or(Step::Yield, Step::Join)
                    }
                    LifecycleState::Closing => {
                        state.inflight.closing.clone().map_or(Step::Yield, Step::After)
                    }
                    LifecycleState::Closed => {
                        Step::Join(self.inner.begin_open(&runtime, &mut state))
                    }
                }
            };
            match step {
                Step::Done => return Ok(()),
                Step::Join(op) => return op.await,
                Step::After(op) => {
                    let _ = op.await;
                }
                Step::Yield => tokio::task::yield_now().await,
            }
        }
    }

    /// Open the store synchronously, blocking on the file read.
    pub fn open_sync(&self) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        match state.lifecycle {
            LifecycleState::Open => return Ok(()),
            LifecycleState::Opening => {
                // The async load is in progress.
                return Err(StoreError::misuse(
                    "Store is already opening asynchronously (call either open or open_sync, not both)",
                ));
            }
            LifecycleState::Closing => {
                return Err(StoreError::misuse(
                    "Store is closing asynchronously (call either sync or async methods, not both)",
                ));
            }
            LifecycleState::Closed => {}
        }

        *self.inner.runtime.lock() = Handle::try_current().ok();
        let loaded = self.inner.read_sync();
        self.inner.install(&mut state, loaded)
    }

    /// Write pending changes now.
    ///
    /// Resolves once everything changed up to this call is on disk.
    /// Requires a tokio runtime like [`Store::open`].
    pub async fn flush(&self) -> StoreResult<()> {
        let runtime = current_runtime("flush")?;
        self.inner.flush(&runtime).await
    }

    /// Write pending changes now, blocking on the write.
    ///
    /// Fails with a misuse error while an async flush is in flight.
    pub fn flush_sync(&self) -> StoreResult<()> {
        self.inner.flush_sync()
    }

    /// Flush and close. Waits for an in-flight open first.
    ///
    /// If the flush fails the store stays open. Requires a tokio runtime
    /// like [`Store::open`].
    pub async fn close(&self) -> StoreResult<()> {
        let runtime = current_runtime("close")?;
        loop {
            let step = {
                let mut state = self.inner.state.lock();
                let lifecycle = state.lifecycle;
                match lifecycle {
                    LifecycleState::Closed => Step::Done,
                    LifecycleState::Opening => {
                        state.inflight.opening.clone().map_or(Step::Yield, Step::After)
                    }
                    LifecycleState::Closing => {
                        state.inflight.closing.clone().map_or(Step::Yield, Step::Join)
                    }
                    LifecycleState::Open => {
                        Step::Join(self.inner.begin_close(&runtime, &mut state))
                    }
                }
            };
            match step {
                Step::Done => return Ok(()),
                Step::Join(op) => return op.await,
                Step::After(op) => op.await?,
                Step::Yield => tokio::task::yield_now().await,
            }
        }
    }

    /// Flush and close synchronously.
    ///
    /// The store stays locked from planning the flush until it is closed,
    /// so no change from another handle can slip in between.
    pub fn close_sync(&self) -> StoreResult<()> {
        let result = {
            let mut state = self.inner.state.lock();
            match state.lifecycle {
                LifecycleState::Closing => {
                    return Err(StoreError::misuse(
                        "Store is already closing asynchronously (call either close or close_sync, not both)",
                    ));
                }
                LifecycleState::Opening => {
                    return Err(StoreError::misuse(
                        "Store is currently being opened asynchronously (call either sync or async methods, not both)",
                    ));
                }
                LifecycleState::Closed => return Ok(()),
                LifecycleState::Open => {}
            }

            let result = self.inner.flush_locked(&mut state);
            if result.is_ok() {
                state.lifecycle.advance(LifecycleState::Closed);
            }
            result
        };

        self.inner.after_close(&result);
        result
    }

    /// Value stored under `key`.
    ///
    /// Counts as a key access: the key is marked dirty and the timer armed,
    /// since the caller may go on to change what it read.
    pub fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        if flush::is_reserved(key) {
            return Ok(None);
        }
        self.access(key, |data| data.get(key).cloned())
    }

    /// Store `value` under `key`, returning the previous value.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> StoreResult<Option<Value>> {
        if flush::is_reserved(key) {
            return Err(StoreError::ReservedProperty { name: key.to_string() });
        }
        let value = value.into();
        self.access(key, move |data| data.insert(key.to_string(), value))
    }

    /// Remove `key`, returning its value.
    pub fn delete(&self, key: &str) -> StoreResult<Option<Value>> {
        if flush::is_reserved(key) {
            return Err(StoreError::ReservedProperty { name: key.to_string() });
        }
        self.access(key, |data| data.shift_remove(key))
    }

    pub fn contains_key(&self, key: &str) -> StoreResult<bool> {
        if flush::is_reserved(key) {
            return Ok(false);
        }
        self.access(key, |data| data.contains_key(key))
    }

    /// Keys in first-insertion order. Loaded keys keep file order; a key
    /// deleted and set again moves to the end.
    pub fn keys(&self) -> Vec<String> {
        self.inner.state.lock().data.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().data.is_empty()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state.lock().lifecycle
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.inner.options.path
    }

    /// Keys touched since the last flush started.
    pub fn dirty_count(&self) -> usize {
        self.inner.state.lock().dirty.dirty_count()
    }

    /// Snapshot writes started since the store was created.
    pub fn write_count(&self) -> u64 {
        self.inner.state.lock().dirty.total_writes()
    }

    /// Flush attempts since the store was created, no-ops included.
    pub fn flush_cycles(&self) -> u64 {
        self.inner.state.lock().dirty.total_cycles()
    }

    fn access<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut IndexMap<String, Value>) -> R,
    ) -> StoreResult<R> {
        let mut state = self.inner.state.lock();
        if !state.lifecycle.accepts_key_access() {
            return Err(StoreError::NotOpen { key: key.to_string() });
        }
        state.dirty.mark_dirty(key);
        self.inner.scheduler.touch(Instant::now());
        Ok(f(&mut state.data))
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Store")
            .field("path", &self.inner.options.path)
            .field("state", &state.lifecycle)
            .field("keys", &state.data.len())
            .field("dirty", &state.dirty.dirty_count())
            .finish()
    }
}

impl StoreInner {
    fn log(&self, message: &str) {
        tracing::debug!(path = %self.options.path.display(), "{}", message);
        self.options.emit(message);
    }

    fn log_error(&self, err: &StoreError) {
        tracing::warn!(path = %self.options.path.display(), error = %err, "store operation failed");
        self.options.emit(&format!("ERROR: {}", err));
    }

    // ---------------------------------------------------------------------
    // Open
    // ---------------------------------------------------------------------

    fn begin_open(self: &Arc<Self>, runtime: &Handle, state: &mut StoreState) -> SharedOp {
        state.lifecycle.advance(LifecycleState::Opening);
        *self.runtime.lock() = Some(runtime.clone());

        let inner = Arc::clone(self);
        let op = spawn_shared(runtime, "open", async move {
            let loaded = inner.read_async().await;
            let mut state = inner.state.lock();
            state.inflight.opening = None;
            inner.install(&mut state, loaded)
        });
        state.inflight.opening = Some(op.clone());
        op
    }

    async fn read_async(&self) -> StoreResult<IndexMap<String, Value>> {
        let path = &self.options.path;
        match self.files.read(path).await {
            Ok(bytes) => flush::decode_snapshot(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // First run: make sure the location is writable at all
                self.files
                    .write(path, Vec::new())
                    .await
                    .map_err(|e| StoreError::io(path, e))?;
                self.log(&format!("No store file found at {}. Starting fresh", path.display()));
                Ok(IndexMap::new())
            }
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn read_sync(&self) -> StoreResult<IndexMap<String, Value>> {
        let path = &self.options.path;
        match self.files.read_sync(path) {
            Ok(bytes) => flush::decode_snapshot(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.files
                    .write_sync(path, &[])
                    .map_err(|e| StoreError::io(path, e))?;
                self.log(&format!("No store file found at {}. Starting fresh", path.display()));
                Ok(IndexMap::new())
            }
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Settle an open: install loaded contents and go `open`, or fall back
    /// to `closed` with nothing loaded.
    fn install(
        self: &Arc<Self>,
        state: &mut StoreState,
        loaded: StoreResult<IndexMap<String, Value>>,
    ) -> StoreResult<()> {
        let started = loaded.and_then(|data| self.start_scheduler().map(|()| data));
        match started {
            Ok(data) => {
                flush::prime_cache(&data, &mut state.cache);
                state.dirty.clear();
                state.data = data;
                state.lifecycle.advance(LifecycleState::Open);
                self.log(&format!("Store opened with {} keys", state.data.len()));
                Ok(())
            }
            Err(e) => {
                if state.lifecycle == LifecycleState::Opening {
                    state.lifecycle.advance(LifecycleState::Closed);
                }
                self.log_error(&e);
                Err(e)
            }
        }
    }

    fn start_scheduler(self: &Arc<Self>) -> StoreResult<()> {
        let weak = Arc::downgrade(self);
        self.scheduler.start(move || match weak.upgrade() {
            Some(inner) => {
                inner.background_flush();
                true
            }
            None => false,
        })
    }

    // ---------------------------------------------------------------------
    // Flush
    // ---------------------------------------------------------------------

    /// Timer-triggered flush; nobody is waiting, so failures are only logged.
    fn background_flush(self: &Arc<Self>) {
        let runtime = self.runtime.lock().clone();
        match runtime {
            Some(handle) => {
                let inner = Arc::clone(self);
                handle.clone().spawn(async move {
                    if let Err(e) = inner.flush(&handle).await {
                        inner.report_background_failure(&e);
                    }
                });
            }
            None => {
                if let Err(e) = self.flush_sync() {
                    self.report_background_failure(&e);
                }
            }
        }
    }

    fn report_background_failure(&self, err: &StoreError) {
        tracing::warn!(
            path = %self.options.path.display(),
            error = %err,
            "background flush failed"
        );
        self.options.emit("SmartStore background flush has failed!");
        self.options.emit(&err.to_string());
    }

    /// Drain the dirty set and decide whether to write.
    fn plan(&self, state: &mut StoreState) -> Option<FlushPlan> {
        self.scheduler.cancel();
        let StoreState { data, dirty, cache, .. } = state;
        let plan = flush::plan_flush(data, dirty, cache);
        match &plan {
            Some(plan) => self.log(&format!(
                "Found dirty keys: {}. Initiating write",
                plan.changed.join(",")
            )),
            None => self.log("Flush completed, no changes"),
        }
        plan
    }

    async fn flush(self: &Arc<Self>, runtime: &Handle) -> StoreResult<()> {
        let op = {
            let mut state = self.state.lock();
            match self.plan(&mut state) {
                Some(plan) => self.begin_write(runtime, &mut state, plan),
                None => match state.inflight.flush() {
                    Some(op) => op,
                    None => return Ok(()),
                },
            }
        };
        op.await
    }

    /// Spawn the write of `plan`, chained after any write already in flight
    /// so two writes never overlap.
    fn begin_write(
        self: &Arc<Self>,
        runtime: &Handle,
        state: &mut StoreState,
        plan: FlushPlan,
    ) -> SharedOp {
        let id = state.inflight.next_flush_id();
        let previous = state.inflight.flush();

        let inner = Arc::clone(self);
        let op = spawn_shared(runtime, "flush", async move {
            if let Some(previous) = previous {
                // Our snapshot supersedes it, so its outcome is not ours
                let _ = previous.await;
            }
            let FlushPlan { changed, document } = plan;
            let len = document.len();
            let path = &inner.options.path;
            let result = inner
                .files
                .write(path, document.into_bytes())
                .await
                .map_err(|e| StoreError::io(path, e));

            let mut state = inner.state.lock();
            state.inflight.finish_flush(id);
            inner.settle_write(&mut state, &changed, len, "async", &result);
            result
        });
        state.inflight.replace_flush(id, op.clone());
        op
    }

    fn flush_sync(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    /// Sync flush with the lock already held by the caller, who keeps it for
    /// the whole write so no async flush can start mid-write.
    fn flush_locked(&self, state: &mut StoreState) -> StoreResult<()> {
        if state.inflight.is_flushing() {
            return Err(StoreError::misuse(
                "Store is already flushing asynchronously (call either flush or flush_sync, not both)",
            ));
        }

        let Some(plan) = self.plan(state) else {
            return Ok(());
        };

        let path = &self.options.path;
        let result = self
            .files
            .write_sync(path, plan.document.as_bytes())
            .map_err(|e| StoreError::io(path, e));
        self.settle_write(state, &plan.changed, plan.document.len(), "sync", &result);
        result
    }

    fn settle_write(
        &self,
        state: &mut StoreState,
        changed: &[String],
        len: usize,
        mode: &str,
        result: &StoreResult<()>,
    ) {
        match result {
            Ok(()) => self.log(&format!(
                "{} bytes written to {} ({})",
                len,
                self.options.path.display(),
                mode
            )),
            Err(e) => {
                let StoreState { data, dirty, cache, .. } = state;
                flush::rollback_failed(changed, data, dirty, cache);
                self.log_error(e);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Close
    // ---------------------------------------------------------------------

    fn begin_close(self: &Arc<Self>, runtime: &Handle, state: &mut StoreState) -> SharedOp {
        state.lifecycle.advance(LifecycleState::Closing);

        let inner = Arc::clone(self);
        let handle = runtime.clone();
        let op = spawn_shared(runtime, "close", async move {
            let result = inner.flush(&handle).await;
            inner.finish_close(result.clone());
            result
        });
        state.inflight.closing = Some(op.clone());
        op
    }

    /// Settle a close: `closed` on a successful flush, otherwise back to `open`.
    fn finish_close(&self, result: StoreResult<()>) {
        {
            let mut state = self.state.lock();
            state.inflight.closing = None;
            if result.is_ok() {
                state.lifecycle.advance(LifecycleState::Closed);
            } else if state.lifecycle == LifecycleState::Closing {
                state.lifecycle.advance(LifecycleState::Open);
            }
        }
        self.after_close(&result);
    }

    /// Stop the timer once closed, or report why closing failed.
    fn after_close(&self, result: &StoreResult<()>) {
        match result {
            Ok(()) => {
                // Outside the state lock: the timer thread may be flushing
                self.scheduler.stop();
                self.log("Store closed");
            }
            Err(e) => self.log_error(e),
        }
    }
}
