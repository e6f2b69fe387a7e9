//! Ordered, concurrently readable stub collection.
//!
//! Readers take an `Arc` snapshot of the sorted list and never observe a
//! partially applied mutation. Writers are serialized on `write_lock`, build a
//! new list, and swap it in.

use super::scenarios::ScenarioTable;
use super::types::{RegistryError, StubMapping};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub type StubSnapshot = Arc<Vec<Arc<StubMapping>>>;

pub struct StubRegistry {
    stubs: RwLock<StubSnapshot>,
    write_lock: Mutex<()>,
    next_insertion: AtomicU64,
    scenarios: Arc<ScenarioTable>,
}

impl StubRegistry {
    pub fn new(scenarios: Arc<ScenarioTable>) -> Self {
        Self {
            stubs: RwLock::new(Arc::new(Vec::new())),
            write_lock: Mutex::new(()),
            next_insertion: AtomicU64::new(1),
            scenarios,
        }
    }

    pub fn scenarios(&self) -> &Arc<ScenarioTable> {
        &self.scenarios
    }

    /// Stubs in match order: priority ascending, then newest first.
    pub fn snapshot(&self) -> StubSnapshot {
        self.stubs.read().clone()
    }

    pub fn get_all(&self) -> Vec<Arc<StubMapping>> {
        self.snapshot().iter().cloned().collect()
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<StubMapping>> {
        self.snapshot().iter().find(|s| s.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&self, mut stub: StubMapping) -> Result<Arc<StubMapping>, RegistryError> {
        stub.validate()?;
        let _guard = self.write_lock.lock();
        let current = self.snapshot();
        if current.iter().any(|s| s.id == stub.id) {
            return Err(RegistryError::DuplicateId(stub.id));
        }
        stub.insertion_index = self.next_insertion.fetch_add(1, Ordering::Relaxed);
        let stub = Arc::new(stub);
        self.scenarios.on_stub_added(&stub);

        let mut next: Vec<_> = current.iter().cloned().collect();
        next.push(stub.clone());
        self.publish(next);
        debug!("Added stub {} (priority {})", stub.id, stub.priority);
        Ok(stub)
    }

    /// Swap the stub with the same id, keeping its position among equal priorities.
    pub fn replace(&self, mut stub: StubMapping) -> Result<Arc<StubMapping>, RegistryError> {
        stub.validate()?;
        let _guard = self.write_lock.lock();
        let current = self.snapshot();
        let old = current
            .iter()
            .find(|s| s.id == stub.id)
            .cloned()
            .ok_or(RegistryError::NotFound(stub.id))?;
        stub.insertion_index = old.insertion_index;
        let stub = Arc::new(stub);
        self.scenarios.on_stub_removed(&old);
        self.scenarios.on_stub_added(&stub);

        let next = current
            .iter()
            .map(|s| if s.id == stub.id { stub.clone() } else { s.clone() })
            .collect();
        self.publish(next);
        debug!("Replaced stub {}", stub.id);
        Ok(stub)
    }

    pub fn remove(&self, id: Uuid) -> Result<Arc<StubMapping>, RegistryError> {
        let _guard = self.write_lock.lock();
        let current = self.snapshot();
        let removed = current
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))?;
        self.scenarios.on_stub_removed(&removed);
        let next = current.iter().filter(|s| s.id != id).cloned().collect();
        self.publish(next);
        debug!("Removed stub {id}");
        Ok(removed)
    }

    /// Remove every stub and forget all scenarios.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        *self.stubs.write() = Arc::new(Vec::new());
        self.scenarios.clear();
        debug!("Cleared all stubs");
    }

    fn publish(&self, mut stubs: Vec<Arc<StubMapping>>) {
        stubs.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.insertion_index.cmp(&a.insertion_index))
        });
        *self.stubs.write() = Arc::new(stubs);
    }
}
