//! Persistence and memory recall for Nexus.
//!
//! [`SqliteStore`] is the production store; [`InMemoryStore`] backs tests;
//! [`MemoryManager`] layers optional embedding-based recall over SQLite.

pub mod in_memory;
pub mod manager;
pub mod sqlite;
pub mod vector;

pub use in_memory::InMemoryStore;
pub use manager::MemoryManager;
pub use sqlite::{SqliteStore, hash_token};
pub use vector::{cosine_similarity, rank_by_similarity};
