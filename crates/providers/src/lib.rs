//! LLM Provider implementations for Nexus.
//!
//! All providers implement the `nexus_core::Provider` trait. Nexus talks to
//! a single OpenAI-compatible endpoint for completions and embeddings.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
