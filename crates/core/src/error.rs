//! Error types for the Nexus domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator has its own error enum.

use thiserror::Error;

/// The top-level error type for all Nexus operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Completion service ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Home Assistant ---
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    // --- Storage ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Collaborator errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Provider returned no completion")]
    EmptyResponse,

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    #[error("Home Assistant not configured: {0}")]
    NotConfigured(String),

    #[error("Home Assistant returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response from Home Assistant: {0}")]
    InvalidResponse(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("WebSocket authentication failed: {0}")]
    AuthFailed(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Schema setup failed: {0}")]
    SchemaFailed(String),
}
