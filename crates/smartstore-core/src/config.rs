//! Configuration for a SmartStore
//!
//! A store is configured with the path of its backing file, an optional
//! logger sink and the auto-flush debounce window. Anything that converts
//! into a path converts into a full configuration with defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

/// Logger function receiving lifecycle milestones and error details.
///
/// Called while the store is locked; it must not call back into the store.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Bounds of the auto-flush debounce window.
///
/// Writes are coalesced until `min` passes without a new touch, but a
/// continuous burst is never deferred past `max` after its first touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushDelay {
    /// Quiet period after the last touch before a background flush fires
    pub min: Duration,
    /// Upper bound on latency from the first touch of a burst
    pub max: Duration,
}

impl FlushDelay {
    /// Build a window from millisecond bounds.
    pub fn from_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    /// How long a burst may keep extending the timer.
    pub fn extension_budget(&self) -> Duration {
        self.max.saturating_sub(self.min)
    }
}

impl Default for FlushDelay {
    fn default() -> Self {
        Self::from_millis(50, 500)
    }
}

/// SmartStore configuration record
#[derive(Clone, Default)]
pub struct StoreOptions {
    /// Path of the backing file. Mandatory.
    pub path: PathBuf,
    /// Optional logger sink, a no-op when absent
    pub log: Option<LogSink>,
    /// Auto-flush debounce window
    pub auto_flush_delay: FlushDelay,
}

impl StoreOptions {
    /// Options for the given path with default logger and delays.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Install a logger sink.
    pub fn with_logger<F>(mut self, log: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.log = Some(Arc::new(log));
        self
    }

    /// Override the auto-flush debounce window.
    pub fn with_auto_flush_delay(mut self, min: Duration, max: Duration) -> Self {
        self.auto_flush_delay = FlushDelay { min, max };
        self
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> StoreResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(StoreError::Configuration {
                option: "path",
                reason: "missing mandatory option".into(),
            });
        }
        let delay = self.auto_flush_delay;
        if delay.min > delay.max {
            return Err(StoreError::Configuration {
                option: "auto_flush_delay",
                reason: format!(
                    "min delay {}ms exceeds max delay {}ms",
                    delay.min.as_millis(),
                    delay.max.as_millis()
                ),
            });
        }
        Ok(())
    }

    /// Send a message to the logger sink, if any.
    pub(crate) fn emit(&self, message: &str) {
        if let Some(log) = &self.log {
            log(message);
        }
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("path", &self.path)
            .field("log", &self.log.as_ref().map(|_| "<sink>"))
            .field("auto_flush_delay", &self.auto_flush_delay)
            .finish()
    }
}

impl From<&str> for StoreOptions {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for StoreOptions {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for StoreOptions {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<&Path> for StoreOptions {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}
