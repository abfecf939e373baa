use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::object::DataObjectHandle;

/// Keyed storage of data objects shared between jobs.
pub trait DataStore: Send + Sync {
    fn exists(&self, name: &str) -> bool;

    fn retrieve(&self, name: &str) -> Option<DataObjectHandle>;

    /// Stores `handle` under `name`, replacing any previous entry.
    fn store(&self, name: &str, handle: DataObjectHandle);

    fn remove(&self, name: &str) -> Option<DataObjectHandle>;

    /// Stored names in sorted order.
    fn names(&self) -> Vec<String>;

    /// Like [`retrieve`](Self::retrieve), but falls back to the members of
    /// stored collections, matched by the member's own name.
    fn resolve(&self, name: &str) -> Option<DataObjectHandle> {
        self.retrieve(name).or_else(|| {
            self.names()
                .into_iter()
                .filter_map(|stored| self.retrieve(&stored))
                .filter(DataObjectHandle::is_collection)
                .flat_map(|collection| collection.flatten())
                .find(|object| object.name() == name)
        })
    }
}

/// Process-local [`DataStore`].
#[derive(Default)]
pub struct InMemoryDataStore {
    objects: RwLock<BTreeMap<String, DataObjectHandle>>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataStore for InMemoryDataStore {
    fn exists(&self, name: &str) -> bool {
        self.objects.read().contains_key(name)
    }

    fn retrieve(&self, name: &str) -> Option<DataObjectHandle> {
        self.objects.read().get(name).cloned()
    }

    fn store(&self, name: &str, handle: DataObjectHandle) {
        self.objects.write().insert(name.to_string(), handle);
    }

    fn remove(&self, name: &str) -> Option<DataObjectHandle> {
        self.objects.write().remove(name)
    }

    fn names(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }
}
