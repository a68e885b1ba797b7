//! Threads started on behalf of a node.

use crate::error::{NdsError, Result};
use std::thread::JoinHandle;

/// A named thread created through the backend.
#[derive(Debug)]
pub struct ThreadHandle {
    name: String,
    handle: JoinHandle<()>,
}

impl ThreadHandle {
    pub(crate) fn new(name: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier of the underlying thread.
    pub fn thread_id(&self) -> std::thread::ThreadId {
        self.handle.thread().id()
    }

    /// True once the work has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the work to return. A panic becomes [`NdsError::Thread`].
    pub fn join(self) -> Result<()> {
        let name = self.name;
        self.handle.join().map_err(|panic| NdsError::Thread {
            message: panic_message(panic.as_ref()),
            name,
        })
    }
}

/// Spawns `work` on an OS thread called `name`.
pub(crate) fn spawn_named(name: &str, work: Box<dyn FnOnce() + Send>) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(work)
        .map_err(|err| NdsError::Thread {
            name: name.to_string(),
            message: err.to_string(),
        })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "thread panicked".to_string()
    }
}
