//! Stub mappings, the registry that orders them, and scenario state.

mod registry;
mod scenarios;
mod types;

#[cfg(test)]
mod tests;

pub use registry::{StubRegistry, StubSnapshot};
pub use scenarios::{Scenario, ScenarioError, ScenarioTable, STARTED};
pub use types::{ChunkedDribbleDelay, RegistryError, ResponseDefinition, StubMapping, DEFAULT_PRIORITY};
