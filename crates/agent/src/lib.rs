//! The Nexus prompt-to-action pipeline.
//!
//! A query flows through:
//!
//! 1. **Context** — relevant entity states rendered as text ([`context`])
//! 2. **Prompt** — instructions, context, recalled memories, query ([`prompt`])
//! 3. **Completion** — one call to the configured [`nexus_core::Provider`]
//! 4. **Extraction** — `[ACTION:domain.service:{...}]` tokens parsed ([`directive`])
//! 5. **Dispatch** — each command sent to Home Assistant in order ([`dispatch`])
//! 6. **Sanitize** — tokens replaced by confirmations
//! 7. **Record** — the exchange saved as a memory
//!
//! [`NexusAgent`] wires the stages together. [`suggest`] turns detected
//! usage patterns into suggested automations.

pub mod context;
pub mod directive;
pub mod dispatch;
pub mod pipeline;
pub mod prompt;
pub mod suggest;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{ContextEntry, assemble};
pub use directive::{Directive, DirectiveError, ParsedCommand, extract, sanitize, scan};
pub use dispatch::{CommandResult, dispatch};
pub use pipeline::{AgentReply, AgentSettings, NexusAgent, PipelineStage};
pub use suggest::{PatternKind, reload_automations, suggest_automations};
