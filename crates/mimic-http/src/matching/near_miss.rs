//! Ranking of non-matching stubs for "why didn't this match" diagnostics.

use super::engine::stub_match;
use super::match_result::MatchResult;
use crate::http::LoggedRequest;
use crate::stubs::{ScenarioTable, StubMapping};
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearMiss {
    pub stub_mapping: Arc<StubMapping>,
    pub distance: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct NearMissAnalyzer {
    limit: usize,
}

impl NearMissAnalyzer {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    /// Score every stub against `request` and return the closest ones.
    pub fn analyze(
        &self,
        stubs: &[Arc<StubMapping>],
        request: &LoggedRequest,
        scenarios: &ScenarioTable,
    ) -> Vec<NearMiss> {
        let scored = stubs
            .iter()
            .map(|stub| (stub.clone(), stub_match(stub, request, scenarios)))
            .collect();
        self.rank(scored)
    }

    /// Order already-scored stubs by ascending distance, stable on input order.
    pub fn rank(&self, scored: Vec<(Arc<StubMapping>, MatchResult)>) -> Vec<NearMiss> {
        let mut misses: Vec<NearMiss> = scored
            .into_iter()
            .map(|(stub_mapping, result)| NearMiss {
                stub_mapping,
                distance: result.distance,
            })
            .collect();
        misses.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        misses.truncate(self.limit);
        misses
    }
}

/// Plain-text body for an unmatched request.
pub fn render_report(request: &LoggedRequest, near_misses: &[NearMiss]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Request was not matched");
    let _ = writeln!(out, "=======================");
    let _ = writeln!(out);
    let _ = writeln!(out, "  {} {}", request.method, request.absolute_url);
    let _ = writeln!(out);
    if near_misses.is_empty() {
        let _ = writeln!(out, "No stubs are registered.");
        return out;
    }
    let _ = writeln!(out, "Closest stubs:");
    for (rank, miss) in near_misses.iter().enumerate() {
        let stub = &miss.stub_mapping;
        let _ = write!(
            out,
            "  {}. [distance {:.3}] {} {}",
            rank + 1,
            miss.distance,
            stub.request.method,
            stub.request.url.describe()
        );
        if let Some(name) = &stub.name {
            let _ = write!(out, " \"{name}\"");
        }
        if let Some((scenario, state)) = stub.scenario_requirement() {
            let _ = write!(out, " (scenario '{scenario}' in state '{state}')");
        }
        let _ = writeln!(out, " id={}", stub.id);
    }
    out
}
