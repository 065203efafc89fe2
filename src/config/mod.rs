//! Configuration management for timeflip
//!
//! - **settings**: the user-facing settings model and site activation rules
//! - **store**: persisted stores (JSON file, in-memory) with change notifications

pub mod settings;
pub mod store;

// Re-export commonly used types
pub use settings::{Settings, StorageChange, normalize_hostname};
pub use store::{ConfigStore, JsonFileStore, MemoryStore};
