//! Mock collaborators for pipeline tests.

use async_trait::async_trait;
use nexus_core::device::{DeviceApi, DeviceState};
use nexus_core::error::{DeviceError, ProviderError};
use nexus_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use std::collections::HashSet;
use std::sync::Mutex;

/// A provider that returns scripted replies in order and records requests.
///
/// Once the script runs out every call fails with `EmptyResponse`.
pub struct ScriptedProvider {
    replies: Mutex<Vec<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<String, ProviderError>>) -> Self {
        let mut replies = replies;
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers once with `text`.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    /// A provider whose first call fails with `error`.
    pub fn failing(error: ProviderError) -> Self {
        Self::new(vec![Err(error)])
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let next = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop())
            .unwrap_or(Err(ProviderError::EmptyResponse))?;

        Ok(ProviderResponse {
            content: next,
            model,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        })
    }
}

/// A device API serving fixed states and recording service calls.
///
/// `call_service` fails with HTTP 500 for call indices given to
/// [`RecordingDevices::failing_on`].
pub struct RecordingDevices {
    states: Vec<DeviceState>,
    states_error: bool,
    failing: HashSet<usize>,
    calls: Mutex<Vec<(String, serde_json::Map<String, serde_json::Value>)>>,
}

impl RecordingDevices {
    pub fn new(states: Vec<DeviceState>) -> Self {
        Self {
            states,
            states_error: false,
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make the `index`-th service call (0-based) fail.
    pub fn failing_on(mut self, index: usize) -> Self {
        self.failing.insert(index);
        self
    }

    /// Make `get_states` fail.
    pub fn unreachable(mut self) -> Self {
        self.states_error = true;
        self
    }

    /// `(domain.service, data)` for every call, in order.
    pub fn calls(&self) -> Vec<(String, serde_json::Map<String, serde_json::Value>)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DeviceApi for RecordingDevices {
    async fn get_states(&self) -> Result<Vec<DeviceState>, DeviceError> {
        if self.states_error {
            return Err(DeviceError::Network("connection refused".into()));
        }
        Ok(self.states.clone())
    }

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, DeviceError> {
        let index = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|e| DeviceError::InvalidResponse(e.to_string()))?;
            calls.push((format!("{domain}.{service}"), data.clone()));
            calls.len() - 1
        };

        if self.failing.contains(&index) {
            return Err(DeviceError::Status {
                status: 500,
                message: "Internal Server Error".into(),
            });
        }
        Ok(serde_json::json!([]))
    }
}
