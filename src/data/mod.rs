//! Shared data objects, the store that names them, and the locks that govern
//! who may mutate them.

mod lock;
mod object;
mod store;

pub use lock::{LockManager, LockMode, LockSet, LockState, LockTicket};
pub use object::DataObjectHandle;
pub use store::{DataStore, InMemoryDataStore};
