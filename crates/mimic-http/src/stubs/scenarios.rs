//! Named state machines that gate stub eligibility.
//!
//! Each scenario sits behind its own mutex so transitions are atomic per name
//! while different scenarios never contend. The outer map lock is only held to
//! find or insert an entry.

use super::types::StubMapping;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub const STARTED: &str = "Started";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScenarioError {
    #[error("scenario '{0}' does not exist")]
    NotFound(String),
    #[error("scenario '{scenario}' has no state '{state}'")]
    UnknownState { scenario: String, state: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    pub state: String,
    pub possible_states: BTreeSet<String>,
    pub mappings: BTreeSet<Uuid>,
    /// States each mapping requires or moves to.
    #[serde(skip)]
    mapping_states: BTreeMap<Uuid, Vec<String>>,
}

impl Scenario {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: STARTED.to_string(),
            possible_states: BTreeSet::from([STARTED.to_string()]),
            mappings: BTreeSet::new(),
            mapping_states: BTreeMap::new(),
        }
    }

    fn refresh_possible_states(&mut self) {
        self.possible_states = std::iter::once(STARTED.to_string())
            .chain(self.mapping_states.values().flatten().cloned())
            .collect();
    }
}

#[derive(Debug, Default)]
pub struct ScenarioTable {
    scenarios: RwLock<HashMap<String, Arc<Mutex<Scenario>>>>,
}

impl ScenarioTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, name: &str) -> Option<Arc<Mutex<Scenario>>> {
        self.scenarios.read().get(name).cloned()
    }

    /// Register the scenario a stub belongs to, creating it in `Started` if new.
    pub(crate) fn on_stub_added(&self, stub: &StubMapping) {
        let Some(name) = stub.scenario_name.as_deref() else {
            return;
        };
        let entry = {
            let mut scenarios = self.scenarios.write();
            scenarios
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Scenario::new(name))))
                .clone()
        };
        let states = [&stub.required_scenario_state, &stub.new_scenario_state]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        let mut scenario = entry.lock();
        scenario.mappings.insert(stub.id);
        scenario.mapping_states.insert(stub.id, states);
        scenario.refresh_possible_states();
    }

    /// Detach a stub and forget states only it mentioned. Empty scenarios
    /// stay until the next `reset_all`.
    pub(crate) fn on_stub_removed(&self, stub: &StubMapping) {
        if let Some(entry) = stub.scenario_name.as_deref().and_then(|n| self.entry(n)) {
            let mut scenario = entry.lock();
            scenario.mappings.remove(&stub.id);
            scenario.mapping_states.remove(&stub.id);
            scenario.refresh_possible_states();
        }
    }

    pub fn current_state(&self, name: &str) -> Option<String> {
        self.entry(name).map(|e| e.lock().state.clone())
    }

    /// Move `name` to `new_state` if its current state is `expected`
    /// (or unconditionally when `expected` is `None`). Returns whether it moved.
    pub fn compare_and_set(&self, name: &str, expected: Option<&str>, new_state: &str) -> bool {
        let Some(entry) = self.entry(name) else {
            return false;
        };
        let mut scenario = entry.lock();
        if expected.is_some_and(|e| e != scenario.state) {
            return false;
        }
        scenario.state = new_state.to_string();
        true
    }

    /// Apply the transition declared by a stub that was just served.
    pub fn on_stub_served(&self, stub: &StubMapping) -> bool {
        match stub.scenario_transition() {
            Some((name, new_state)) => {
                self.compare_and_set(name, stub.required_scenario_state.as_deref(), new_state)
            }
            None => false,
        }
    }

    pub fn set_state(&self, name: &str, state: &str) -> Result<(), ScenarioError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| ScenarioError::NotFound(name.to_string()))?;
        let mut scenario = entry.lock();
        if !scenario.possible_states.contains(state) {
            return Err(ScenarioError::UnknownState {
                scenario: name.to_string(),
                state: state.to_string(),
            });
        }
        scenario.state = state.to_string();
        Ok(())
    }

    pub fn reset(&self, name: &str) -> Result<(), ScenarioError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| ScenarioError::NotFound(name.to_string()))?;
        entry.lock().state = STARTED.to_string();
        Ok(())
    }

    /// Restore every scenario to `Started` and drop entries no stub refers to.
    pub fn reset_all(&self) {
        let mut scenarios = self.scenarios.write();
        scenarios.retain(|_, entry| {
            let mut scenario = entry.lock();
            scenario.state = STARTED.to_string();
            !scenario.mappings.is_empty()
        });
    }

    pub fn clear(&self) {
        self.scenarios.write().clear();
    }

    pub fn get(&self, name: &str) -> Option<Scenario> {
        self.entry(name).map(|e| e.lock().clone())
    }

    pub fn get_all(&self) -> Vec<Scenario> {
        let mut all: Vec<Scenario> = self
            .scenarios
            .read()
            .values()
            .map(|e| e.lock().clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}
