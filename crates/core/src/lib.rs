//! # Nexus Core
//!
//! Domain types, collaborator traits, and error definitions for Nexus AI,
//! the Home Assistant companion service. This crate performs **no I/O** — it
//! defines the model that every other crate implements against.
//!
//! ## Collaborators
//!
//! The prompt-to-action pipeline talks to three external services, each
//! defined here as a trait:
//! - [`Provider`] — hosted chat-completion / embeddings API
//! - [`DeviceApi`] — Home Assistant state and service calls
//! - [`MemoryStore`] — persisted key/value memories
//!
//! Implementations live in `nexus-providers`, `nexus-homeassistant` and
//! `nexus-memory`; tests swap in mocks.

pub mod device;
pub mod error;
pub mod memory;
pub mod message;
pub mod provider;
pub mod records;

// Re-export key types at crate root for ergonomics
pub use device::{DeviceApi, DeviceState};
pub use error::{DeviceError, Error, MemoryError, ProviderError, Result};
pub use memory::{MemoryItem, MemoryStore};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse};
pub use records::StoredRecord;
