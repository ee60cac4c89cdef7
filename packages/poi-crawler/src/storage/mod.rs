//! Checkpoint stores.

pub mod file;
pub mod memory;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
