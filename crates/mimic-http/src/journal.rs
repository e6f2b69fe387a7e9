//! Bounded record of served exchanges.
//!
//! Events are appended when a request is read and completed with the response
//! once it has been written. Insert and eviction happen under one lock, so an
//! evicted event is simply gone: finalizing or reading it reports "not found".

use crate::http::{HttpHeaders, HttpResponse, LoggedRequest};
use crate::matching::{NearMiss, NearMissAnalyzer, RequestPattern, SubEvent};
use crate::response::Fault;
use crate::stubs::{StubMapping, StubRegistry};
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    #[serde(rename = "bodyAsBase64", serialize_with = "serialize_base64")]
    pub body: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<Fault>,
}

fn serialize_base64<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(body))
}

impl LoggedResponse {
    pub fn from_response(response: &HttpResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            fault: None,
        }
    }

    pub fn from_fault(fault: Fault) -> Self {
        Self {
            status: 0,
            headers: HttpHeaders::new(),
            body: Bytes::new(),
            fault: Some(fault),
        }
    }

    pub fn body_as_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServeEvent {
    pub id: Uuid,
    pub request: LoggedRequest,
    pub stub_mapping: Option<Arc<StubMapping>>,
    pub was_matched: bool,
    pub response: Option<LoggedResponse>,
    pub sub_events: Vec<SubEvent>,
    pub received_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ServeEvent {
    pub fn received(request: LoggedRequest) -> Self {
        Self {
            id: request.id,
            received_at: request.logged_date,
            request,
            stub_mapping: None,
            was_matched: false,
            response: None,
            sub_events: Vec::new(),
            completed_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

pub struct RequestJournal {
    events: Mutex<VecDeque<ServeEvent>>,
    max_entries: Option<usize>,
    enabled: bool,
}

impl RequestJournal {
    pub fn new(max_entries: Option<usize>, enabled: bool) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            max_entries,
            enabled,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None, true)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn begin(&self, event: ServeEvent) {
        if !self.enabled {
            return;
        }
        let mut events = self.events.lock();
        events.push_back(event);
        if let Some(max) = self.max_entries {
            while events.len() > max {
                events.pop_front();
            }
        }
    }

    /// Attach the match outcome to an event still in the journal.
    pub fn record_resolution(
        &self,
        id: Uuid,
        stub: Option<Arc<StubMapping>>,
        sub_events: Vec<SubEvent>,
    ) -> bool {
        self.update(id, |event| {
            event.was_matched = stub.is_some();
            event.stub_mapping = stub;
            event.sub_events.extend(sub_events);
        })
    }

    /// Complete an event. Returns false if it was evicted in the meantime.
    pub fn finalize(&self, id: Uuid, response: LoggedResponse) -> bool {
        self.update(id, |event| {
            event.response = Some(response);
            event.completed_at = Some(Utc::now());
        })
    }

    fn update(&self, id: Uuid, apply: impl FnOnce(&mut ServeEvent)) -> bool {
        let mut events = self.events.lock();
        match events.iter_mut().rev().find(|e| e.id == id) {
            Some(event) => {
                apply(event);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<ServeEvent> {
        self.events.lock().iter().find(|e| e.id == id).cloned()
    }

    /// Every event, newest first.
    pub fn all(&self) -> Vec<ServeEvent> {
        self.events.lock().iter().rev().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn find_matching(&self, pattern: &RequestPattern) -> Vec<LoggedRequest> {
        self.events
            .lock()
            .iter()
            .filter(|e| pattern.match_request(&e.request).is_exact())
            .map(|e| e.request.clone())
            .collect()
    }

    pub fn count_matching(&self, pattern: &RequestPattern) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| pattern.match_request(&e.request).is_exact())
            .count()
    }

    pub fn remove_matching(&self, pattern: &RequestPattern) -> Vec<ServeEvent> {
        let mut events = self.events.lock();
        let (removed, kept): (VecDeque<_>, VecDeque<_>) = events
            .drain(..)
            .partition(|e| pattern.match_request(&e.request).is_exact());
        *events = kept;
        removed.into_iter().collect()
    }

    pub fn unmatched(&self) -> Vec<LoggedRequest> {
        self.events
            .lock()
            .iter()
            .filter(|e| !e.was_matched)
            .map(|e| e.request.clone())
            .collect()
    }

    /// Near misses against the current registry for every unmatched request.
    pub fn near_misses_for_unmatched(
        &self,
        registry: &StubRegistry,
        analyzer: NearMissAnalyzer,
    ) -> Vec<(LoggedRequest, Vec<NearMiss>)> {
        let snapshot = registry.snapshot();
        self.unmatched()
            .into_iter()
            .map(|request| {
                let misses = analyzer.analyze(&snapshot, &request, registry.scenarios());
                (request, misses)
            })
            .collect()
    }

    pub fn reset(&self) {
        self.events.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stubs::{ResponseDefinition, ScenarioTable};
    use std::thread;

    fn event(url: &str) -> ServeEvent {
        ServeEvent::received(LoggedRequest::new("GET", url))
    }

    #[test]
    fn test_bounded_journal_evicts_oldest() {
        let journal = RequestJournal::new(Some(2), true);
        let first = event("/1");
        let first_id = first.id;
        journal.begin(first);
        journal.begin(event("/2"));
        journal.begin(event("/3"));

        assert_eq!(journal.count(), 2);
        assert!(journal.get(first_id).is_none());
        assert!(!journal.finalize(first_id, LoggedResponse::from_fault(Fault::EmptyResponse)));
        let urls: Vec<_> = journal.all().into_iter().map(|e| e.request.url).collect();
        assert_eq!(urls, vec!["/3", "/2"]);
    }

    #[test]
    fn test_disabled_journal_records_nothing() {
        let journal = RequestJournal::new(None, false);
        journal.begin(event("/x"));
        assert_eq!(journal.count(), 0);
    }

    #[test]
    fn test_finalize_and_query() {
        let journal = RequestJournal::unbounded();
        let e = event("/widget");
        let id = e.id;
        journal.begin(e);
        journal.begin(event("/other"));
        assert!(journal.finalize(id, LoggedResponse::from_response(&HttpResponse::text(200, "A"))));

        let stored = journal.get(id).unwrap();
        assert!(stored.is_complete());
        assert_eq!(stored.response.unwrap().body_as_string(), "A");

        let pattern = RequestPattern::get("/widget");
        assert_eq!(journal.count_matching(&pattern), 1);
        assert_eq!(journal.find_matching(&pattern)[0].url, "/widget");
        assert_eq!(journal.remove_matching(&pattern).len(), 1);
        assert_eq!(journal.count(), 1);
    }

    #[test]
    fn test_unmatched_near_misses() {
        let registry = StubRegistry::new(Arc::new(ScenarioTable::new()));
        registry
            .add(StubMapping::new(
                RequestPattern::get("/widget"),
                ResponseDefinition::ok_text("x"),
            ))
            .unwrap();
        let journal = RequestJournal::unbounded();
        let matched = event("/widget");
        let matched_id = matched.id;
        journal.begin(matched);
        journal.record_resolution(matched_id, registry.get_all().first().cloned(), Vec::new());
        journal.begin(event("/widgets"));

        let report = journal.near_misses_for_unmatched(&registry, NearMissAnalyzer::new(3));
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].0.url, "/widgets");
        assert_eq!(report[0].1.len(), 1);
        assert!(report[0].1[0].distance > 0.0);
    }

    #[test]
    fn test_concurrent_insert_and_evict_keeps_bound_without_duplicates() {
        let journal = Arc::new(RequestJournal::new(Some(50), true));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let journal = journal.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        let e = event(&format!("/{t}/{i}"));
                        let id = e.id;
                        journal.begin(e);
                        journal.finalize(id, LoggedResponse::from_fault(Fault::EmptyResponse));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let all = journal.all();
        assert_eq!(all.len(), 50);
        let mut ids: Vec<_> = all.iter().map(|e| e.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 50);
    }
}
