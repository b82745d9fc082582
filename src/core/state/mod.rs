// State management and cursor tracking

pub mod cursor;
pub mod manager;
pub mod storage;

pub use cursor::{Cursors, SyncState};
pub use manager::StateManager;
pub use storage::{FileStateStorage, MemoryStateStorage, StateStorage};
