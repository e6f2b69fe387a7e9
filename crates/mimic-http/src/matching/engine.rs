use super::match_result::{string_distance, MatchResult, SubEvent};
use super::near_miss::{NearMiss, NearMissAnalyzer};
use crate::http::LoggedRequest;
use crate::stubs::{ScenarioTable, StubMapping, StubRegistry, STARTED};
use std::sync::Arc;
use tracing::debug;

/// Score one stub against a request, including its scenario gate.
pub fn stub_match(
    stub: &StubMapping,
    request: &LoggedRequest,
    scenarios: &ScenarioTable,
) -> MatchResult {
    let mut results = stub.request.evaluate(request);
    if let Some((name, required)) = stub.scenario_requirement() {
        let current = scenarios
            .current_state(name)
            .unwrap_or_else(|| STARTED.to_string());
        results.push(if current == required {
            MatchResult::exact()
        } else {
            MatchResult::mismatch(string_distance(required, &current))
        });
    }
    MatchResult::aggregate(results)
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub stub: Option<Arc<StubMapping>>,
    /// 0.0 for a match, otherwise the distance of the closest near miss.
    pub distance: f64,
    pub sub_events: Vec<SubEvent>,
    pub near_misses: Vec<NearMiss>,
}

impl Resolution {
    pub fn is_matched(&self) -> bool {
        self.stub.is_some()
    }
}

#[derive(Clone)]
pub struct MatchEngine {
    registry: Arc<StubRegistry>,
    near_misses: NearMissAnalyzer,
}

impl MatchEngine {
    pub fn new(registry: Arc<StubRegistry>, near_miss_limit: usize) -> Self {
        Self {
            registry,
            near_misses: NearMissAnalyzer::new(near_miss_limit),
        }
    }

    pub fn registry(&self) -> &Arc<StubRegistry> {
        &self.registry
    }

    pub fn analyzer(&self) -> NearMissAnalyzer {
        self.near_misses
    }

    /// First eligible stub in registry order, or the ranked near misses.
    pub fn resolve(&self, request: &LoggedRequest) -> Resolution {
        let snapshot = self.registry.snapshot();
        let scenarios = self.registry.scenarios();
        let mut sub_events = Vec::new();
        let mut scored = Vec::with_capacity(snapshot.len());

        for stub in snapshot.iter() {
            let result = stub_match(stub, request, scenarios);
            sub_events.extend(result.sub_events.iter().cloned());
            if result.is_exact() {
                debug!("{} {} matched stub {}", request.method, request.url, stub.id);
                return Resolution {
                    stub: Some(stub.clone()),
                    distance: 0.0,
                    sub_events,
                    near_misses: Vec::new(),
                };
            }
            scored.push((stub.clone(), result));
        }

        let near_misses = self.near_misses.rank(scored);
        debug!(
            "{} {} matched no stub ({} candidates)",
            request.method,
            request.url,
            snapshot.len()
        );
        Resolution {
            stub: None,
            distance: near_misses.first().map(|n| n.distance).unwrap_or(1.0),
            sub_events,
            near_misses,
        }
    }
}
