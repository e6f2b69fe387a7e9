//! Stub mapping and response definition model.

use crate::matching::RequestPattern;
use crate::response::{DelayDistribution, Fault};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_PRIORITY: i32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a stub with id {0} is already registered")]
    DuplicateId(Uuid),
    #[error("no stub with id {0}")]
    NotFound(Uuid),
    #[error("invalid stub {id}: {reason}")]
    Invalid { id: Uuid, reason: String },
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StubMapping {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub request: RequestPattern,
    #[serde(default)]
    pub response: ResponseDefinition,
    /// Lower values take precedence.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_scenario_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_scenario_state: Option<String>,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Assigned by the registry; breaks priority ties (newest first).
    #[serde(skip)]
    pub insertion_index: u64,
}

impl StubMapping {
    pub fn new(request: RequestPattern, response: ResponseDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: None,
            request,
            response,
            priority: DEFAULT_PRIORITY,
            scenario_name: None,
            required_scenario_state: None,
            new_scenario_state: None,
            persistent: false,
            metadata: None,
            insertion_index: 0,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn in_scenario(mut self, name: &str) -> Self {
        self.scenario_name = Some(name.to_string());
        self
    }

    pub fn when_scenario_state_is(mut self, state: &str) -> Self {
        self.required_scenario_state = Some(state.to_string());
        self
    }

    pub fn will_set_state_to(mut self, state: &str) -> Self {
        self.new_scenario_state = Some(state.to_string());
        self
    }

    pub fn is_in_scenario(&self) -> bool {
        self.scenario_name.is_some()
    }

    /// The scenario and state that must hold for this stub to be eligible.
    pub fn scenario_requirement(&self) -> Option<(&str, &str)> {
        Some((
            self.scenario_name.as_deref()?,
            self.required_scenario_state.as_deref()?,
        ))
    }

    /// The scenario transition this stub performs once served.
    pub fn scenario_transition(&self) -> Option<(&str, &str)> {
        Some((
            self.scenario_name.as_deref()?,
            self.new_scenario_state.as_deref()?,
        ))
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::Invalid {
            id: self.id,
            reason: reason.to_string(),
        };
        if self.scenario_name.is_none()
            && (self.required_scenario_state.is_some() || self.new_scenario_state.is_some())
        {
            return Err(invalid(
                "requiredScenarioState/newScenarioState require a scenarioName",
            ));
        }
        if matches!(&self.scenario_name, Some(name) if name.trim().is_empty()) {
            return Err(invalid("scenarioName must not be empty"));
        }
        let body_sources = [
            self.response.body.is_some(),
            self.response.base64_body.is_some(),
            self.response.json_body.is_some(),
            self.response.body_file_name.is_some(),
        ];
        if body_sources.iter().filter(|set| **set).count() > 1 {
            return Err(invalid(
                "only one of body, base64Body, jsonBody, bodyFileName may be set",
            ));
        }
        if !(100..=999).contains(&self.response.status) {
            return Err(invalid("status must be a three digit HTTP status code"));
        }
        if let Some(dribble) = &self.response.chunked_dribble_delay {
            if dribble.number_of_chunks == 0 {
                return Err(invalid("chunkedDribbleDelay.numberOfChunks must be positive"));
            }
        }
        Ok(())
    }
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedDribbleDelay {
    pub number_of_chunks: u32,
    /// Milliseconds spread across all chunks.
    pub total_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDefinition {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_body: Option<serde_json::Value>,
    /// Path relative to the configured files root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_delay_milliseconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_distribution: Option<DelayDistribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunked_dribble_delay: Option<ChunkedDribbleDelay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<Fault>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_proxy_request_headers: BTreeMap<String, String>,
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self::with_status(200)
    }
}

impl ResponseDefinition {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            status_message: None,
            headers: BTreeMap::new(),
            body: None,
            base64_body: None,
            json_body: None,
            body_file_name: None,
            fixed_delay_milliseconds: None,
            delay_distribution: None,
            chunked_dribble_delay: None,
            fault: None,
            proxy_base_url: None,
            additional_proxy_request_headers: BTreeMap::new(),
        }
    }

    pub fn ok_text(body: &str) -> Self {
        Self::with_status(200).body(body)
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn fixed_delay(mut self, millis: u64) -> Self {
        self.fixed_delay_milliseconds = Some(millis);
        self
    }

    pub fn fault(fault: Fault) -> Self {
        let mut response = Self::with_status(200);
        response.fault = Some(fault);
        response
    }

    pub fn proxied_from(base_url: &str) -> Self {
        let mut response = Self::with_status(200);
        response.proxy_base_url = Some(base_url.to_string());
        response
    }

    /// Total delay before the first byte: fixed delay plus a sampled one.
    pub fn initial_delay_millis(&self) -> u64 {
        self.fixed_delay_milliseconds.unwrap_or(0)
            + self
                .delay_distribution
                .as_ref()
                .map(DelayDistribution::sample_millis)
                .unwrap_or(0)
    }
}
