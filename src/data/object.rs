use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::{Mutex, RwLock};

use crate::history::HistoryRecord;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

enum Content {
    Single(RwLock<serde_json::Value>),
    Collection(RwLock<Vec<DataObjectHandle>>),
}

struct DataObject {
    id: u64,
    name: RwLock<String>,
    content: Content,
    history: Mutex<Vec<HistoryRecord>>,
}

/// Shared reference to a named, mutable data object.
///
/// Cloning a handle shares the object. Holding a handle grants no right to
/// mutate it: a job must hold a write ticket from the
/// [`LockManager`](super::LockManager) before calling any of the mutating
/// methods here. Identity (and the lock ordering) is the object's id, not its
/// name.
#[derive(Clone)]
pub struct DataObjectHandle(Arc<DataObject>);

impl DataObjectHandle {
    /// A single object holding an opaque payload.
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::with_content(name.into(), Content::Single(RwLock::new(payload)))
    }

    /// A collection enumerating member objects.
    pub fn collection(name: impl Into<String>, members: Vec<DataObjectHandle>) -> Self {
        Self::with_content(name.into(), Content::Collection(RwLock::new(members)))
    }

    fn with_content(name: String, content: Content) -> Self {
        Self(Arc::new(DataObject {
            id: NEXT_ID.fetch_add(1, AtomicOrdering::Relaxed),
            name: RwLock::new(name),
            content,
            history: Mutex::new(Vec::new()),
        }))
    }

    /// Process-unique id; the total order lock acquisition sorts by.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> String {
        self.0.name.read().clone()
    }

    pub fn rename(&self, name: impl Into<String>) {
        *self.0.name.write() = name.into();
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.0.content, Content::Collection(_))
    }

    /// Number of members, or `None` for a single object.
    pub fn member_count(&self) -> Option<usize> {
        match &self.0.content {
            Content::Collection(members) => Some(members.read().len()),
            Content::Single(_) => None,
        }
    }

    /// Members in order; empty for a single object.
    pub fn members(&self) -> Vec<DataObjectHandle> {
        match &self.0.content {
            Content::Collection(members) => members.read().clone(),
            Content::Single(_) => Vec::new(),
        }
    }

    pub fn member(&self, index: usize) -> Option<DataObjectHandle> {
        match &self.0.content {
            Content::Collection(members) => members.read().get(index).cloned(),
            Content::Single(_) => None,
        }
    }

    /// Appends a member. Returns false for a single object, or when `member`
    /// is this collection or already contains it.
    pub fn push_member(&self, member: DataObjectHandle) -> bool {
        match &self.0.content {
            Content::Collection(members) => {
                if member.contains(self) {
                    return false;
                }
                members.write().push(member);
                true
            }
            Content::Single(_) => false,
        }
    }

    /// Copy of the payload, or `None` for a collection.
    pub fn payload(&self) -> Option<serde_json::Value> {
        match &self.0.content {
            Content::Single(payload) => Some(payload.read().clone()),
            Content::Collection(_) => None,
        }
    }

    /// Replaces the payload. Returns false for a collection.
    pub fn set_payload(&self, value: serde_json::Value) -> bool {
        match &self.0.content {
            Content::Single(payload) => {
                *payload.write() = value;
                true
            }
            Content::Collection(_) => false,
        }
    }

    /// Provenance records, oldest first.
    pub fn history(&self) -> Vec<HistoryRecord> {
        self.0.history.lock().clone()
    }

    pub fn add_history(&self, record: HistoryRecord) {
        self.0.history.lock().push(record);
    }

    /// Appends `source`'s provenance to this object's, for derived objects.
    pub fn copy_history_from(&self, source: &DataObjectHandle) {
        if self == source {
            return;
        }
        let records = source.history();
        self.0.history.lock().extend(records);
    }

    /// True if `other` is this object or appears anywhere below it.
    pub fn contains(&self, other: &DataObjectHandle) -> bool {
        self.flatten().iter().any(|h| h == other)
    }

    /// This object followed by its members, depth first. An object reachable
    /// along several paths is listed once.
    pub fn flatten(&self) -> Vec<DataObjectHandle> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.flatten_into(&mut seen, &mut out);
        out
    }

    fn flatten_into(&self, seen: &mut HashSet<u64>, out: &mut Vec<DataObjectHandle>) {
        if !seen.insert(self.0.id) {
            return;
        }
        out.push(self.clone());
        for member in self.members() {
            member.flatten_into(seen, out);
        }
    }
}

impl PartialEq for DataObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for DataObjectHandle {}

impl Hash for DataObjectHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl PartialOrd for DataObjectHandle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DataObjectHandle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

impl fmt::Debug for DataObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataObjectHandle")
            .field("name", &self.name())
            .field("id", &self.0.id)
            .field("collection", &self.is_collection())
            .finish()
    }
}
