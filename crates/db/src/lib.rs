pub mod repositories;

pub use repositories::{InMemoryMemoryStore, MarkdownMemoryStore, MEMORY_LOG_TITLE};
