use super::*;
use crate::http::LoggedRequest;
use crate::stubs::{ResponseDefinition, ScenarioTable, StubMapping, StubRegistry};
use proptest::prelude::*;
use std::sync::Arc;

fn engine() -> (Arc<StubRegistry>, MatchEngine) {
    let registry = Arc::new(StubRegistry::new(Arc::new(ScenarioTable::new())));
    let engine = MatchEngine::new(registry.clone(), 3);
    (registry, engine)
}

fn stub(pattern: RequestPattern, body: &str) -> StubMapping {
    StubMapping::new(pattern, ResponseDefinition::ok_text(body))
}

fn matched_body(engine: &MatchEngine, request: &LoggedRequest) -> Option<String> {
    engine
        .resolve(request)
        .stub
        .and_then(|s| s.response.body.clone())
}

#[test]
fn test_resolution_is_deterministic() {
    let (registry, engine) = engine();
    registry.add(stub(RequestPattern::get("/a"), "one")).unwrap();
    registry.add(stub(RequestPattern::get("/a"), "two")).unwrap();
    let request = LoggedRequest::new("GET", "/a");
    let first = engine.resolve(&request).stub.unwrap().id;
    for _ in 0..10 {
        assert_eq!(engine.resolve(&request).stub.unwrap().id, first);
    }
}

#[test]
fn test_lower_priority_value_wins_regardless_of_insertion_order() {
    let (registry, engine) = engine();
    registry
        .add(stub(RequestPattern::get("/p"), "preferred").with_priority(1))
        .unwrap();
    registry
        .add(stub(RequestPattern::get("/p"), "fallback").with_priority(9))
        .unwrap();
    assert_eq!(
        matched_body(&engine, &LoggedRequest::new("GET", "/p")).as_deref(),
        Some("preferred")
    );
}

#[test]
fn test_most_recent_wins_among_equal_priority() {
    let (registry, engine) = engine();
    registry
        .add(stub(
            RequestPattern::new("GET", UrlPattern::UrlPathPattern(RegexPattern::new("/.*"))),
            "default",
        ))
        .unwrap();
    registry.add(stub(RequestPattern::get("/special"), "override")).unwrap();
    assert_eq!(
        matched_body(&engine, &LoggedRequest::new("GET", "/special")).as_deref(),
        Some("override")
    );
    assert_eq!(
        matched_body(&engine, &LoggedRequest::new("GET", "/other")).as_deref(),
        Some("default")
    );
}

#[test]
fn test_scenario_gate() {
    let (registry, engine) = engine();
    registry
        .add(
            stub(RequestPattern::get("/s"), "after")
                .in_scenario("flow")
                .when_scenario_state_is("Done"),
        )
        .unwrap();
    let request = LoggedRequest::new("GET", "/s");
    assert!(!engine.resolve(&request).is_matched());
    registry.scenarios().set_state("flow", "Done").unwrap();
    assert_eq!(matched_body(&engine, &request).as_deref(), Some("after"));
}

#[test]
fn test_header_cookie_query_and_body_matchers() {
    let (registry, engine) = engine();
    registry
        .add(stub(
            RequestPattern::post("/orders?express=true")
                .with_header("Content-Type", StringPattern::contains("json"))
                .with_header("X-Trace", MultiValuePattern::or_absent(StringPattern::matching("[a-f0-9]+")))
                .with_query_param("express", StringPattern::equal_to("true"))
                .with_cookie("session", StringPattern::equal_to("s1"))
                .with_body(BodyPattern::Text(StringPattern::contains("\"qty\""))),
            "created",
        ))
        .unwrap();

    let request = LoggedRequest::new("POST", "/orders?express=true")
        .with_header("content-type", "application/json")
        .with_header("Cookie", "session=s1")
        .with_body(r#"{"qty": 2}"#);
    assert_eq!(matched_body(&engine, &request).as_deref(), Some("created"));

    let wrong_trace = request.clone().with_header("X-Trace", "not-hex!");
    assert!(!engine.resolve(&wrong_trace).is_matched());
}

#[test]
fn test_any_method_matches_everything() {
    let (registry, engine) = engine();
    registry
        .add(stub(RequestPattern::new(ANY_METHOD, UrlPattern::UrlPath("/x".into())), "any"))
        .unwrap();
    for method in ["GET", "DELETE", "PATCH"] {
        assert!(engine.resolve(&LoggedRequest::new(method, "/x?q=1")).is_matched());
    }
}

#[test]
fn test_invalid_regex_is_a_diagnostic_not_a_failure() {
    let (registry, engine) = engine();
    registry
        .add(stub(
            RequestPattern::new("GET", UrlPattern::UrlPattern(RegexPattern::new("(broken"))),
            "never",
        ))
        .unwrap();
    registry.add(stub(RequestPattern::get("/ok"), "ok").with_priority(9)).unwrap();

    let resolution = engine.resolve(&LoggedRequest::new("GET", "/ok"));
    assert!(resolution.is_matched());
    assert_eq!(resolution.sub_events.len(), 1);
    assert_eq!(resolution.sub_events[0].kind, SubEventKind::Error);
}

#[test]
fn test_near_misses_rank_closest_first() {
    let (registry, engine) = engine();
    registry.add(stub(RequestPattern::get("/widget"), "w")).unwrap();
    registry.add(stub(RequestPattern::post("/widgets"), "p")).unwrap();
    registry.add(stub(RequestPattern::post("/completely/else"), "x")).unwrap();

    let resolution = engine.resolve(&LoggedRequest::new("GET", "/widgets"));
    assert!(!resolution.is_matched());
    assert_eq!(resolution.near_misses.len(), 3);
    assert_eq!(
        resolution.near_misses[2].stub_mapping.request.url,
        UrlPattern::Url("/completely/else".into())
    );
    assert!(resolution.distance > 0.0);
    assert_eq!(resolution.distance, resolution.near_misses[0].distance);
    let report = render_report(&LoggedRequest::new("GET", "/widgets"), &resolution.near_misses);
    assert!(report.contains("Request was not matched"));
    assert!(report.contains("Closest stubs:"));
}

#[test]
fn test_near_miss_limit() {
    let (registry, _) = engine();
    for i in 0..10 {
        registry.add(stub(RequestPattern::get(&format!("/n/{i}")), "n")).unwrap();
    }
    let engine = MatchEngine::new(registry, 2);
    assert_eq!(engine.resolve(&LoggedRequest::new("GET", "/nope")).near_misses.len(), 2);
}

#[test]
fn test_request_pattern_serde() {
    let pattern: RequestPattern = serde_json::from_value(serde_json::json!({
        "method": "get",
        "urlPathPattern": "/items/[0-9]+",
        "headers": { "Accept": { "contains": "json" } },
        "queryParameters": { "page": { "equalTo": "2", "orAbsent": true } }
    }))
    .unwrap();
    assert_eq!(pattern.method, "GET");
    assert!(pattern
        .match_request(&LoggedRequest::new("GET", "/items/5").with_header("Accept", "application/json"))
        .is_exact());

    let conflicting = serde_json::json!({ "url": "/a", "urlPath": "/a" });
    assert!(serde_json::from_value::<RequestPattern>(conflicting).is_err());

    let round = serde_json::to_value(&pattern).unwrap();
    assert_eq!(round["urlPathPattern"], "/items/[0-9]+");
}

proptest! {
    #[test]
    fn prop_near_misses_sorted_and_never_zero(
        paths in proptest::collection::vec("/[a-z]{1,8}", 1..12),
        requested in "/[A-Z]{1,8}",
    ) {
        let scenarios = ScenarioTable::new();
        let stubs: Vec<Arc<StubMapping>> = paths
            .iter()
            .map(|p| Arc::new(stub(RequestPattern::get(p), "x")))
            .collect();
        let request = LoggedRequest::new("GET", &requested);
        let misses = NearMissAnalyzer::new(usize::MAX).analyze(&stubs, &request, &scenarios);

        prop_assert_eq!(misses.len(), stubs.len());
        for pair in misses.windows(2) {
            prop_assert!(pair[0].distance <= pair[1].distance);
        }
        for miss in &misses {
            prop_assert!(miss.distance > 0.0);
        }
    }
}
