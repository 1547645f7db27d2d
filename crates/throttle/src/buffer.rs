use std::sync::{Mutex, MutexGuard, PoisonError};

/// Shared accumulator for unflushed lines.
///
/// One writer (the input reader) appends, one consumer (the scheduler) takes;
/// a single mutex serializes both. Nothing blocking runs while the lock is held.
#[derive(Debug, Default)]
pub struct LineBuffer {
    inner: Mutex<String>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one line, re-attaching the delimiter the line read stripped.
    pub fn append(&self, line: &str) {
        let mut buf = self.lock();
        buf.push_str(line);
        buf.push('\n');
    }

    /// Returns everything accumulated since the last take and clears the buffer.
    pub fn take_and_reset(&self) -> String {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, String> {
        // A poisoned lock only means a panic elsewhere; the text is intact.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
