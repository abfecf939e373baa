//! Advisory read/write locking over shared data objects.
//!
//! Acquisition never blocks: a ticket that collides with an outstanding one
//! fails the whole request with [`ResourceBusyError`] and anything already
//! taken for that request is given back. Tickets are taken in a fixed global
//! order (object id) so two jobs needing the same objects cannot interleave
//! into a deadlock once callers retry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::object::DataObjectHandle;
use crate::error::ResourceBusyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    Read,
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "read"),
            LockMode::Write => write!(f, "write"),
        }
    }
}

/// A request for one lock on one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTicket {
    pub object: DataObjectHandle,
    pub mode: LockMode,
}

impl LockTicket {
    pub fn read(object: &DataObjectHandle) -> Self {
        Self {
            object: object.clone(),
            mode: LockMode::Read,
        }
    }

    pub fn write(object: &DataObjectHandle) -> Self {
        Self {
            object: object.clone(),
            mode: LockMode::Write,
        }
    }
}

/// Current holders of one object's lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockState {
    pub readers: usize,
    pub writer: bool,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.readers == 0 && !self.writer
    }
}

#[derive(Debug, Default)]
pub struct LockManager {
    slots: Mutex<HashMap<u64, LockState>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorts tickets by object id and folds duplicates; a write ticket
    /// subsumes a read ticket on the same object.
    pub fn normalize(tickets: &[LockTicket]) -> Vec<LockTicket> {
        let mut sorted: Vec<LockTicket> = tickets.to_vec();
        sorted.sort_by(|a, b| a.object.cmp(&b.object).then(b.mode.cmp(&a.mode)));
        sorted.dedup_by(|later, kept| later.object == kept.object);
        sorted
    }

    /// Takes every ticket or none of them.
    pub fn acquire(
        self: &Arc<Self>,
        tickets: &[LockTicket],
    ) -> Result<LockSet, ResourceBusyError> {
        let ordered = Self::normalize(tickets);
        let mut slots = self.slots.lock();
        let mut taken: Vec<LockTicket> = Vec::with_capacity(ordered.len());

        for ticket in ordered {
            let slot = slots.entry(ticket.object.id()).or_default();
            let granted = match ticket.mode {
                LockMode::Read if !slot.writer => {
                    slot.readers += 1;
                    true
                }
                LockMode::Write if slot.is_free() => {
                    slot.writer = true;
                    true
                }
                _ => false,
            };
            if !granted {
                if slot.is_free() {
                    slots.remove(&ticket.object.id());
                }
                for held in taken.iter().rev() {
                    Self::give_back(&mut slots, held);
                }
                debug!(object = %ticket.object.name(), mode = %ticket.mode, "lock contended");
                return Err(ResourceBusyError {
                    object: ticket.object.name(),
                    mode: ticket.mode,
                });
            }
            taken.push(ticket);
        }

        Ok(LockSet {
            manager: Arc::clone(self),
            tickets: taken,
        })
    }

    /// Releases a set now rather than at end of scope.
    pub fn release(&self, mut set: LockSet) {
        let tickets = std::mem::take(&mut set.tickets);
        self.release_tickets(&tickets);
    }

    fn release_tickets(&self, tickets: &[LockTicket]) {
        let mut slots = self.slots.lock();
        for ticket in tickets.iter().rev() {
            Self::give_back(&mut slots, ticket);
        }
    }

    fn give_back(slots: &mut HashMap<u64, LockState>, ticket: &LockTicket) {
        let id = ticket.object.id();
        if let Some(slot) = slots.get_mut(&id) {
            match ticket.mode {
                LockMode::Read => slot.readers = slot.readers.saturating_sub(1),
                LockMode::Write => slot.writer = false,
            }
            if slot.is_free() {
                slots.remove(&id);
            }
        }
    }

    pub fn state(&self, object: &DataObjectHandle) -> LockState {
        self.slots
            .lock()
            .get(&object.id())
            .copied()
            .unwrap_or_default()
    }

    /// Total outstanding tickets across all objects.
    pub fn outstanding(&self) -> usize {
        self.slots
            .lock()
            .values()
            .map(|s| s.readers + usize::from(s.writer))
            .sum()
    }
}

/// Tickets held by one acquisition. Released in reverse acquisition order when
/// dropped.
#[must_use = "locks are released as soon as the LockSet is dropped"]
#[derive(Debug)]
pub struct LockSet {
    manager: Arc<LockManager>,
    tickets: Vec<LockTicket>,
}

impl LockSet {
    pub fn tickets(&self) -> &[LockTicket] {
        &self.tickets
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        if !self.tickets.is_empty() {
            let tickets = std::mem::take(&mut self.tickets);
            self.manager.release_tickets(&tickets);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(name: &str) -> DataObjectHandle {
        DataObjectHandle::new(name, json!(null))
    }

    #[test]
    fn write_excludes_everything() {
        let locks = Arc::new(LockManager::new());
        let x = object("x");

        let first = locks.acquire(&[LockTicket::write(&x)]).unwrap();
        let err = locks.acquire(&[LockTicket::write(&x)]).unwrap_err();
        assert_eq!(err.mode, LockMode::Write);
        assert!(locks.acquire(&[LockTicket::read(&x)]).is_err());

        drop(first);
        assert!(locks.acquire(&[LockTicket::write(&x)]).is_ok());
    }

    #[test]
    fn readers_share() {
        let locks = Arc::new(LockManager::new());
        let x = object("x");
        let a = locks.acquire(&[LockTicket::read(&x)]).unwrap();
        let b = locks.acquire(&[LockTicket::read(&x)]).unwrap();
        assert_eq!(locks.state(&x), LockState { readers: 2, writer: false });
        assert!(locks.acquire(&[LockTicket::write(&x)]).is_err());
        drop(a);
        drop(b);
        assert_eq!(locks.outstanding(), 0);
    }

    #[test]
    fn write_subsumes_read_on_same_object() {
        let x = object("x");
        let y = object("y");
        let tickets = [
            LockTicket::read(&x),
            LockTicket::read(&y),
            LockTicket::write(&x),
            LockTicket::read(&y),
        ];
        let normalized = LockManager::normalize(&tickets);
        assert_eq!(normalized.len(), 2);
        let for_x = normalized.iter().find(|t| t.object == x).unwrap();
        assert_eq!(for_x.mode, LockMode::Write);
        assert!(normalized.windows(2).all(|w| w[0].object < w[1].object));

        let locks = Arc::new(LockManager::new());
        let set = locks.acquire(&tickets).unwrap();
        assert_eq!(set.tickets().len(), 2);
        assert_eq!(locks.state(&x), LockState { readers: 0, writer: true });
    }

    #[test]
    fn failed_acquire_rolls_back_partial_tickets() {
        let locks = Arc::new(LockManager::new());
        let x = object("x");
        let y = object("y");
        let _held = locks.acquire(&[LockTicket::write(&y)]).unwrap();

        assert!(locks
            .acquire(&[LockTicket::write(&x), LockTicket::read(&y)])
            .is_err());
        assert_eq!(locks.state(&x), LockState::default());
        assert_eq!(locks.outstanding(), 1);
    }

    #[test]
    fn explicit_release() {
        let locks = Arc::new(LockManager::new());
        let x = object("x");
        let set = locks.acquire(&[LockTicket::write(&x)]).unwrap();
        locks.release(set);
        assert_eq!(locks.outstanding(), 0);
    }
}
