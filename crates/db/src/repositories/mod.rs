//! `MemoryStore` implementations.
//!
//! Both stores serialise writers per scope, so the duplicate check and the
//! append happen under one lock and concurrent commits of the same fact leave
//! a single entry.

pub mod markdown;
pub mod memory;

pub use markdown::{MarkdownMemoryStore, MEMORY_LOG_TITLE};
pub use memory::InMemoryMemoryStore;
