//! Progress reporting sink.

use log::{debug, info};
use std::sync::Mutex;

/// Receives progress for long-running steps. Nothing a sink does feeds back
/// into the install.
#[cfg_attr(test, mockall::automock)]
pub trait ProgressSink: Send + Sync {
    /// A step with an optional known total size in bytes begins
    fn start(&self, label: &str, total: Option<u64>);
    /// `done` bytes of the current step are complete
    fn update(&self, done: u64);
    fn finish(&self);
}

/// Discards all progress.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn start(&self, _label: &str, _total: Option<u64>) {}
    fn update(&self, _done: u64) {}
    fn finish(&self) {}
}

/// Reports progress through the log facade, at most once per 10%.
#[derive(Debug, Default)]
pub struct LogProgress {
    state: Mutex<LogProgressState>,
}

#[derive(Debug, Default)]
struct LogProgressState {
    label: String,
    total: Option<u64>,
    last_decile: u64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for LogProgress {
    fn start(&self, label: &str, total: Option<u64>) {
        if let Ok(mut state) = self.state.lock() {
            state.label = label.to_string();
            state.total = total;
            state.last_decile = 0;
        }
        info!("{}...", label);
    }

    fn update(&self, done: u64) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match state.total {
            Some(total) if total > 0 => {
                let decile = done.saturating_mul(10) / total;
                if decile > state.last_decile {
                    state.last_decile = decile;
                    info!("{}: {}%", state.label, decile.min(10) * 10);
                }
            }
            _ => debug!("{}: {} bytes", state.label, done),
        }
    }

    fn finish(&self) {
        if let Ok(state) = self.state.lock() {
            info!("{}: done", state.label);
        }
    }
}
