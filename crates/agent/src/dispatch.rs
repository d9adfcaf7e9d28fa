//! Command dispatch to Home Assistant.

use crate::directive::ParsedCommand;
use nexus_core::device::DeviceApi;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Outcome of one dispatched command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: ParsedCommand,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run `commands` one at a time, in order.
///
/// Each call is awaited before the next starts. A failed call is recorded in
/// its result and never stops the rest.
pub async fn dispatch(commands: &[ParsedCommand], devices: &dyn DeviceApi) -> Vec<CommandResult> {
    let mut results = Vec::with_capacity(commands.len());

    for command in commands {
        let outcome = devices
            .call_service(&command.domain, &command.service, &command.data)
            .await;

        let result = match outcome {
            Ok(_) => {
                info!(domain = %command.domain, service = %command.service, "Executed action");
                CommandResult {
                    command: command.clone(),
                    success: true,
                    error: None,
                }
            }
            Err(e) => {
                warn!(domain = %command.domain, service = %command.service, error = %e, "Action failed");
                CommandResult {
                    command: command.clone(),
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        };
        results.push(result);
    }

    results
}
