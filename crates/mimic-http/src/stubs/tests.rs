use super::*;
use crate::matching::RequestPattern;
use std::sync::Arc;
use std::thread;

fn registry() -> StubRegistry {
    StubRegistry::new(Arc::new(ScenarioTable::new()))
}

fn widget(body: &str) -> StubMapping {
    StubMapping::new(RequestPattern::get("/widget"), ResponseDefinition::ok_text(body))
}

#[test]
fn test_add_get_remove() {
    let registry = registry();
    let added = registry.add(widget("a")).unwrap();
    assert_eq!(registry.get(added.id).unwrap().response.body.as_deref(), Some("a"));
    assert_eq!(registry.len(), 1);

    registry.remove(added.id).unwrap();
    assert!(registry.get(added.id).is_none());
    assert_eq!(registry.remove(added.id), Err(RegistryError::NotFound(added.id)));
}

#[test]
fn test_duplicate_id_rejected() {
    let registry = registry();
    let stub = widget("a");
    registry.add(stub.clone()).unwrap();
    assert_eq!(registry.add(stub.clone()), Err(RegistryError::DuplicateId(stub.id)));
}

#[test]
fn test_replace_requires_existing_and_keeps_position() {
    let registry = registry();
    let first = registry.add(widget("first")).unwrap();
    let second = registry.add(widget("second")).unwrap();

    let mut edited = (*first).clone();
    edited.response = ResponseDefinition::ok_text("first-edited");
    registry.replace(edited).unwrap();

    let order: Vec<_> = registry.get_all().iter().map(|s| s.id).collect();
    assert_eq!(order, vec![second.id, first.id]);
    assert!(matches!(
        registry.replace(widget("ghost")),
        Err(RegistryError::NotFound(_))
    ));
}

#[test]
fn test_snapshot_order_priority_then_newest() {
    let registry = registry();
    let low = registry.add(widget("low").with_priority(10)).unwrap();
    let old = registry.add(widget("old")).unwrap();
    let new = registry.add(widget("new")).unwrap();
    let top = registry.add(widget("top").with_priority(1)).unwrap();

    let order: Vec<_> = registry.snapshot().iter().map(|s| s.id).collect();
    assert_eq!(order, vec![top.id, new.id, old.id, low.id]);
}

#[test]
fn test_snapshot_unaffected_by_later_writes() {
    let registry = registry();
    registry.add(widget("a")).unwrap();
    let before = registry.snapshot();
    registry.add(widget("b")).unwrap();
    registry.clear();
    assert_eq!(before.len(), 1);
    assert!(registry.is_empty());
}

#[test]
fn test_scenario_fields_require_name() {
    let registry = registry();
    let orphan = widget("x").when_scenario_state_is("Started");
    assert!(matches!(registry.add(orphan), Err(RegistryError::Invalid { .. })));
    let orphan = widget("x").will_set_state_to("Next");
    assert!(matches!(registry.add(orphan), Err(RegistryError::Invalid { .. })));
}

#[test]
fn test_stub_from_json_defaults() {
    let stub: StubMapping = serde_json::from_value(serde_json::json!({
        "request": { "method": "GET", "url": "/x" },
        "response": { "body": "hi", "fault": "EMPTY_RESPONSE" }
    }))
    .unwrap();
    assert_eq!(stub.priority, DEFAULT_PRIORITY);
    assert_eq!(stub.response.status, 200);
    assert_eq!(stub.response.fault, Some(crate::response::Fault::EmptyResponse));
}

#[test]
fn test_concurrent_adds_are_all_visible() {
    let registry = Arc::new(registry());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = registry.clone();
            thread::spawn(move || {
                for j in 0..25 {
                    registry.add(widget(&format!("{i}-{j}"))).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(registry.len(), 200);
}

#[test]
fn test_scenarios_created_on_registration() {
    let registry = registry();
    registry
        .add(widget("a").in_scenario("S").will_set_state_to("Changed"))
        .unwrap();
    let scenario = registry.scenarios().get("S").unwrap();
    assert_eq!(scenario.state, STARTED);
    assert!(scenario.possible_states.contains("Changed"));
}

#[test]
fn test_set_state_on_unknown_scenario_fails() {
    let table = ScenarioTable::new();
    assert_eq!(
        table.set_state("nope", "x"),
        Err(ScenarioError::NotFound("nope".to_string()))
    );
    assert_eq!(table.reset("nope"), Err(ScenarioError::NotFound("nope".to_string())));
}

#[test]
fn test_set_state_to_unknown_state_fails() {
    let registry = registry();
    registry
        .add(widget("a").in_scenario("S").will_set_state_to("Changed"))
        .unwrap();
    assert!(matches!(
        registry.scenarios().set_state("S", "Elsewhere"),
        Err(ScenarioError::UnknownState { .. })
    ));
    registry.scenarios().set_state("S", "Changed").unwrap();
    assert_eq!(registry.scenarios().current_state("S").as_deref(), Some("Changed"));
}

#[test]
fn test_served_stub_transitions_only_from_required_state() {
    let registry = registry();
    let stub = registry
        .add(
            widget("a")
                .in_scenario("S")
                .when_scenario_state_is(STARTED)
                .will_set_state_to("Changed"),
        )
        .unwrap();
    assert!(registry.scenarios().on_stub_served(&stub));
    assert!(!registry.scenarios().on_stub_served(&stub));
    assert_eq!(registry.scenarios().current_state("S").as_deref(), Some("Changed"));
}

#[test]
fn test_reset_all_restores_started_and_sweeps_orphans() {
    let registry = registry();
    let kept = registry
        .add(widget("a").in_scenario("Kept").will_set_state_to("Next"))
        .unwrap();
    let gone = registry
        .add(widget("b").in_scenario("Gone").will_set_state_to("Next"))
        .unwrap();
    registry.scenarios().set_state("Kept", "Next").unwrap();
    registry.remove(gone.id).unwrap();
    assert!(registry.scenarios().get("Gone").is_some());

    registry.scenarios().reset_all();
    assert!(registry.scenarios().get("Gone").is_none());
    assert_eq!(registry.scenarios().current_state("Kept").as_deref(), Some(STARTED));
    assert!(registry.scenarios().get("Kept").unwrap().mappings.contains(&kept.id));
}

#[test]
fn test_concurrent_transitions_are_atomic() {
    let table = Arc::new(ScenarioTable::new());
    let stub = widget("a")
        .in_scenario("Race")
        .when_scenario_state_is(STARTED)
        .will_set_state_to("Won");
    table.on_stub_added(&stub);

    let winners: usize = (0..16)
        .map(|_| {
            let table = table.clone();
            thread::spawn(move || table.compare_and_set("Race", Some(STARTED), "Won"))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| usize::from(h.join().unwrap()))
        .sum();
    assert_eq!(winners, 1);
}

#[test]
fn test_removed_stub_states_are_forgotten() {
    let registry = registry();
    let keeper = registry
        .add(widget("a").in_scenario("S").will_set_state_to("Shared"))
        .unwrap();
    let leaver = registry
        .add(
            widget("b")
                .in_scenario("S")
                .when_scenario_state_is("Shared")
                .will_set_state_to("OnlyHere"),
        )
        .unwrap();
    registry.scenarios().set_state("S", "OnlyHere").unwrap();

    registry.remove(leaver.id).unwrap();
    let scenario = registry.scenarios().get("S").unwrap();
    assert!(scenario.possible_states.contains("Shared"));
    assert!(!scenario.possible_states.contains("OnlyHere"));
    assert!(matches!(
        registry.scenarios().set_state("S", "OnlyHere"),
        Err(ScenarioError::UnknownState { .. })
    ));

    let mut edited = (*keeper).clone();
    edited.new_scenario_state = Some("Renamed".to_string());
    registry.replace(edited).unwrap();
    let scenario = registry.scenarios().get("S").unwrap();
    assert!(!scenario.possible_states.contains("Shared"));
    assert!(scenario.possible_states.contains("Renamed"));
    assert!(scenario.possible_states.contains(STARTED));
}
