//! Flush Scheduler: bounded-delay debounce for background flushes
//!
//! Every key touch arms (or re-arms) a timer for `min` delay. A burst of
//! touches keeps pushing the timer back, but only while the burst is younger
//! than `max - min`; after that the armed timer is left alone, so a
//! continuous stream of writes still flushes no later than `max` after its
//! first touch.
//!
//! The timer lives on a dedicated background thread that sleeps on a
//! condvar until the armed deadline and then calls back into the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::config::FlushDelay;
use crate::error::{StoreError, StoreResult};

/// Pure debounce state machine, driven by explicit instants.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay: FlushDelay,
    /// First touch of the current burst
    burst_started: Option<Instant>,
    /// When the armed timer fires
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: FlushDelay) -> Self {
        Self {
            delay,
            burst_started: None,
            deadline: None,
        }
    }

    /// Register a touch at `now`. Returns true if the timer was (re-)armed.
    pub fn touch(&mut self, now: Instant) -> bool {
        if let Some(started) = self.burst_started {
            if now.saturating_duration_since(started) >= self.delay.extension_budget() {
                // No more delays
                return false;
            }
        }
        self.burst_started.get_or_insert(now);
        self.deadline = Some(now + self.delay.min);
        true
    }

    /// Disarm the timer and end the current burst.
    pub fn cancel(&mut self) {
        self.burst_started = None;
        self.deadline = None;
    }

    /// If the timer is due at `now`, disarm it and return true.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }
}

struct Shared {
    timer: Mutex<Debounce>,
    wake: Condvar,
}

struct Worker {
    shutdown: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

/// Handle to the background timer thread of one store.
pub struct FlushScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl FlushScheduler {
    pub fn new(delay: FlushDelay) -> Self {
        Self {
            shared: Arc::new(Shared {
                timer: Mutex::new(Debounce::new(delay)),
                wake: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start the timer thread. `on_fire` runs each time the timer expires;
    /// returning false ends the thread. Starting twice is a no-op.
    pub fn start<F>(&self, on_fire: F) -> StoreResult<()>
    where
        F: Fn() -> bool + Send + 'static,
    {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let shared = Arc::clone(&self.shared);

        let thread = thread::Builder::new()
            .name("smartstore-flush".to_string())
            .spawn(move || timer_loop(shared, shutdown_clone, on_fire))
            .map_err(|e| StoreError::Io {
                path: None,
                kind: e.kind(),
                message: format!("Failed to spawn flush scheduler thread: {}", e),
            })?;

        *worker = Some(Worker { shutdown, thread });
        Ok(())
    }

    /// Report a key touch at `now`.
    pub fn touch(&self, now: Instant) {
        let mut timer = self.shared.timer.lock();
        if timer.touch(now) {
            self.shared.wake.notify_one();
        }
    }

    /// Disarm a pending, not-yet-fired timer.
    pub fn cancel(&self) {
        self.shared.timer.lock().cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.shared.timer.lock().deadline()
    }

    /// Check if the timer thread is still running.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map_or(false, |w| !w.thread.is_finished())
    }

    /// Disarm the timer, stop the thread and wait for it to finish.
    ///
    /// Must not be called while holding a lock that `on_fire` takes.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            self.cancel();
            return;
        };

        worker.shutdown.store(true, Ordering::Release);
        {
            let mut timer = self.shared.timer.lock();
            timer.cancel();
            self.shared.wake.notify_all();
        }

        // The last store handle can be dropped on the timer thread itself.
        if worker.thread.thread().id() != thread::current().id() {
            let _ = worker.thread.join();
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Main timer loop, run on the scheduler thread.
fn timer_loop<F>(shared: Arc<Shared>, shutdown: Arc<AtomicBool>, on_fire: F)
where
    F: Fn() -> bool,
{
    loop {
        {
            let mut timer = shared.timer.lock();
            loop {
                if shutdown.load(Ordering::Acquire) {
                    return;
                }
                if timer.take_due(Instant::now()) {
                    break;
                }
                match timer.deadline() {
                    Some(deadline) => {
                        shared.wake.wait_until(&mut timer, deadline);
                    }
                    None => shared.wake.wait(&mut timer),
                }
            }
        }

        if !on_fire() {
            return;
        }
    }
}
