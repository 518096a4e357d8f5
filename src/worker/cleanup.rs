//! Scoped release of per-job resources.

type Release = Box<dyn FnOnce() + Send>;

/// Stack of acquired resources. Entries are released in reverse
/// acquisition order exactly once: by [`CleanupStack::release_all`] or, on
/// any other exit path (early return, panic unwind, task cancellation), when
/// the stack is dropped.
#[derive(Default)]
pub struct CleanupStack {
    entries: Vec<(&'static str, Release)>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a release action for a resource just acquired.
    pub fn push<F>(&mut self, label: &'static str, release: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.entries.push((label, Box::new(release)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release everything, most recent first.
    pub fn release_all(&mut self) {
        while let Some((label, release)) = self.entries.pop() {
            tracing::debug!(resource = label, "Releasing");
            release();
        }
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for CleanupStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<&str> = self.entries.iter().map(|(label, _)| *label).collect();
        f.debug_struct("CleanupStack").field("entries", &labels).finish()
    }
}
