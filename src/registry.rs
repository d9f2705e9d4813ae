use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

struct Entry {
    id: u64,
    cancel: CancellationToken,
}

/// Handed to the streamer that won registration for a pod.
///
/// Releasing the lease only removes the registry entry it created, never a
/// later entry for a pod re-created under the same name.
#[derive(Debug, Clone)]
pub struct StreamLease {
    name: String,
    id: u64,
    cancel: CancellationToken,
}

impl StreamLease {
    /// Child of the process-wide shutdown token; cancelled on shutdown or,
    /// with `stop_on_delete`, when the pod goes away.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Tracks which pods currently have a log streamer running.
pub struct StreamRegistry {
    shutdown: CancellationToken,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    entries: HashMap<String, Entry>,
}

impl StreamRegistry {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Registers `name` if absent. This is the only way to decide whether a
    /// streamer should be spawned.
    pub fn try_register(&self, name: &str) -> Option<StreamLease> {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(name) {
            return None;
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let cancel = self.shutdown.child_token();
        inner.entries.insert(
            name.to_string(),
            Entry {
                id,
                cancel: cancel.clone(),
            },
        );
        Some(StreamLease {
            name: name.to_string(),
            id,
            cancel,
        })
    }

    /// Removes the entry for `name` if there is one. Does not stop the streamer.
    pub fn unregister(&self, name: &str) -> bool {
        self.inner.lock().entries.remove(name).is_some()
    }

    /// Removes the entry created by `lease`, if it is still the current one.
    pub fn release(&self, lease: &StreamLease) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get(&lease.name) {
            Some(entry) if entry.id == lease.id => {
                inner.entries.remove(&lease.name);
                true
            }
            _ => false,
        }
    }

    /// Removes the entry for `name` and cancels its streamer.
    pub fn cancel(&self, name: &str) -> bool {
        let removed = self.inner.lock().entries.remove(name);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.lock().entries.contains_key(name)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().entries.keys().cloned().collect();
        names.sort();
        names
    }
}
