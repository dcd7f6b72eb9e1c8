pub mod appwrite;
pub mod manager;
#[cfg(test)]
pub mod memory;

pub use appwrite::AppwriteStore;
pub use manager::{DeleteOutcome, RecordPage, RecordStore};
