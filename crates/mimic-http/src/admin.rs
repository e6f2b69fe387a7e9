//! Control-plane operations over a running server.
//!
//! Each method maps directly onto the registry, scenario table, journal, or
//! recorder. Transport (HTTP routing, serialization) is left to the embedder.

use crate::http::LoggedRequest;
use crate::journal::{RequestJournal, ServeEvent};
use crate::matching::{NearMiss, NearMissAnalyzer, RequestPattern};
use crate::recording::{Recorder, RecordingError};
use crate::stubs::{RegistryError, Scenario, ScenarioError, StubMapping, StubRegistry};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Recording(#[from] RecordingError),
}

#[derive(Clone)]
pub struct Admin {
    registry: Arc<StubRegistry>,
    journal: Arc<RequestJournal>,
    recorder: Arc<Recorder>,
    analyzer: NearMissAnalyzer,
}

impl Admin {
    pub fn new(
        registry: Arc<StubRegistry>,
        journal: Arc<RequestJournal>,
        recorder: Arc<Recorder>,
        analyzer: NearMissAnalyzer,
    ) -> Self {
        Self {
            registry,
            journal,
            recorder,
            analyzer,
        }
    }

    // Stubs

    pub fn add_stub(&self, stub: StubMapping) -> Result<Arc<StubMapping>, AdminError> {
        Ok(self.registry.add(stub)?)
    }

    pub fn replace_stub(&self, stub: StubMapping) -> Result<Arc<StubMapping>, AdminError> {
        Ok(self.registry.replace(stub)?)
    }

    pub fn remove_stub(&self, id: Uuid) -> Result<Arc<StubMapping>, AdminError> {
        Ok(self.registry.remove(id)?)
    }

    pub fn get_stub(&self, id: Uuid) -> Option<Arc<StubMapping>> {
        self.registry.get(id)
    }

    /// Stubs in match order.
    pub fn list_stubs(&self) -> Vec<Arc<StubMapping>> {
        self.registry.get_all()
    }

    pub fn clear_stubs(&self) {
        self.registry.clear();
    }

    // Scenarios

    pub fn reset_scenarios(&self) {
        self.registry.scenarios().reset_all();
    }

    pub fn reset_scenario(&self, name: &str) -> Result<(), AdminError> {
        Ok(self.registry.scenarios().reset(name)?)
    }

    pub fn set_scenario_state(&self, name: &str, state: &str) -> Result<(), AdminError> {
        Ok(self.registry.scenarios().set_state(name, state)?)
    }

    pub fn list_scenarios(&self) -> Vec<Scenario> {
        self.registry.scenarios().get_all()
    }

    // Journal

    /// Newest first.
    pub fn serve_events(&self) -> Vec<ServeEvent> {
        self.journal.all()
    }

    pub fn find_requests(&self, pattern: &RequestPattern) -> Vec<LoggedRequest> {
        self.journal.find_matching(pattern)
    }

    pub fn count_requests(&self, pattern: &RequestPattern) -> usize {
        self.journal.count_matching(pattern)
    }

    pub fn remove_requests(&self, pattern: &RequestPattern) -> Vec<ServeEvent> {
        self.journal.remove_matching(pattern)
    }

    pub fn unmatched_requests(&self) -> Vec<LoggedRequest> {
        self.journal.unmatched()
    }

    pub fn reset_journal(&self) {
        self.journal.reset();
    }

    pub fn unmatched_near_misses(&self) -> Vec<(LoggedRequest, Vec<NearMiss>)> {
        self.journal
            .near_misses_for_unmatched(&self.registry, self.analyzer)
    }

    // Recording

    pub fn start_recording(&self, target_base_url: &str) -> Result<(), AdminError> {
        Ok(self.recorder.start(target_base_url)?)
    }

    /// Stop recording and register the captured stubs.
    pub fn stop_recording(&self) -> Result<Vec<Arc<StubMapping>>, AdminError> {
        let captured = self.recorder.stop()?;
        let mut added = Vec::with_capacity(captured.len());
        for stub in captured {
            let id = stub.id;
            match self.registry.add(stub) {
                Ok(stub) => added.push(stub),
                Err(e) => warn!("Discarding recorded stub {id}: {e}"),
            }
        }
        info!("Registered {} recorded stubs", added.len());
        Ok(added)
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Clear stubs and scenarios, and empty the journal.
    pub fn reset_all(&self) {
        self.registry.clear();
        self.journal.reset();
        info!("Reset stubs, scenarios and journal");
    }
}
