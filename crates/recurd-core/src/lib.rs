pub mod models;
pub mod posting;
pub mod schedule;
pub mod storage;

pub use models::*;
pub use posting::PostingError;
pub use schedule::ScheduleError;
pub use storage::{StorageBackend, StorageError, TransactionId};
