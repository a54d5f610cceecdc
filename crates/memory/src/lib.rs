pub mod shared;
pub mod store;
pub mod types;

pub use shared::SharedMemory;
pub use store::{MemoryError, MemoryStore};
pub use types::MemoryRecord;
