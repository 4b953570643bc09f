use std::sync::{Arc, Mutex, MutexGuard};

/// Ordered, append-only capture of one process's output lines.
///
/// Reader threads hold clones and only ever `push`. The caller analyses
/// a `snapshot` copy and clears the buffer between runs.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, line: String) {
        self.lock().push(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Snapshot and clear in one step.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock())
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
