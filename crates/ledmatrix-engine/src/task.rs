//! Non-blocking background work for scenes and providers.
//!
//! A scene that needs slow content (a download, a file, an API poll) starts a
//! [`BackgroundTask`] and polls it from `render()`; the render thread never waits on it.
//! The worker hands its single result over a bounded channel, so a worker that finishes after
//! the task was abandoned just finds nobody listening.

use std::thread;

use crossbeam_channel::{bounded, Receiver, TryRecvError};

const TAG: &str = "TASK";

/// What a poll observed.
#[derive(Debug, PartialEq)]
pub enum TaskState<T> {
    /// Nothing was started, or the last result was already taken.
    Idle,
    Pending,
    Ready(T),
    Failed(String),
}

pub struct BackgroundTask<T> {
    name: String,
    rx: Option<Receiver<Result<T, String>>>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rx: None,
        }
    }

    /// Start `work` on a named worker thread, abandoning whatever was running before.
    pub fn spawn<F>(&mut self, work: F) -> std::io::Result<()>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.abandon();
        let (tx, rx) = bounded(1);
        thread::Builder::new().name(self.name.clone()).spawn(move || {
            let out = work().map_err(|e| format!("{e:#}"));
            // The receiver is gone when the task was abandoned.
            let _ = tx.send(out);
        })?;
        self.rx = Some(rx);
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.rx.is_some()
    }

    /// Check for a result without blocking. `Ready` and `Failed` are reported once; the task is
    /// `Idle` afterwards.
    pub fn poll(&mut self) -> TaskState<T> {
        let Some(rx) = &self.rx else {
            return TaskState::Idle;
        };
        let state = match rx.try_recv() {
            Err(TryRecvError::Empty) => return TaskState::Pending,
            Ok(Ok(value)) => TaskState::Ready(value),
            Ok(Err(message)) => {
                log::warn!(target: TAG, "'{}' failed: {message}", self.name);
                TaskState::Failed(message)
            }
            Err(TryRecvError::Disconnected) => {
                log::warn!(target: TAG, "'{}' stopped without a result", self.name);
                TaskState::Failed("worker stopped without a result".to_string())
            }
        };
        self.rx = None;
        state
    }

    /// Forget the running work. Its result is discarded when it arrives.
    pub fn abandon(&mut self) {
        if self.rx.take().is_some() {
            log::debug!(target: TAG, "abandoned '{}'", self.name);
        }
    }
}
