use strata_nla_core::{engine::Engine, error::NlaError, stack_document::parse_stack_document_json};
use strata_test_fixtures::stacks;

#[test]
fn fixtures_evaluate_to_their_expectations() {
    let keys = stacks::keys();
    assert!(!keys.is_empty(), "fixture manifest lists no stacks");

    for name in keys {
        let json = stacks::json(&name).expect("fixture should load");
        let doc = parse_stack_document_json(&json)
            .unwrap_or_else(|e| panic!("fixture '{name}' should parse: {e}"));
        let mut engine = Engine::default();
        let loaded = doc
            .load_into(&mut engine)
            .unwrap_or_else(|e| panic!("fixture '{name}' should load: {e}"));

        for exp in stacks::expectations(&name).expect("expectations should parse") {
            let stack = loaded
                .stack(&exp.stack)
                .unwrap_or_else(|| panic!("fixture '{name}' has no stack '{}'", exp.stack));
            let mut store = doc.property_store();
            engine.evaluate(stack, exp.frame, &mut store).unwrap();

            let got = store
                .values(&exp.path)
                .unwrap_or_else(|| panic!("fixture '{name}' declares no '{}'", exp.path));
            assert_eq!(got.len(), exp.values.len());
            for (g, w) in got.iter().zip(exp.values.iter()) {
                assert!(
                    (g - w).abs() <= exp.eps,
                    "{name}/{} @ {}: got {got:?}, want {:?}",
                    exp.stack,
                    exp.frame,
                    exp.values
                );
            }
        }
    }
}

#[test]
fn strip_overlaps_are_rejected_at_load() {
    let json = r#"{
        "clips": [{ "name": "c", "frame_range": [0.0, 10.0], "curves": [] }],
        "stacks": [{ "name": "s", "tracks": [{ "name": "t", "strips": [
            { "kind": "clip", "clip": "c", "start": 0.0 },
            { "kind": "clip", "clip": "c", "start": 5.0 }
        ]}]}]
    }"#;
    let doc = parse_stack_document_json(json).unwrap();
    let err = doc.load_into(&mut Engine::default()).unwrap_err();
    assert!(matches!(err, NlaError::StripOverlap { .. }));
}

#[test]
fn transitions_need_an_end() {
    let json = r#"{
        "stacks": [{ "name": "s", "tracks": [{ "name": "t", "strips": [
            { "kind": "transition", "start": 0.0 }
        ]}]}]
    }"#;
    let doc = parse_stack_document_json(json).unwrap();
    assert!(matches!(
        doc.load_into(&mut Engine::default()),
        Err(NlaError::Document(_))
    ));
}

#[test]
fn tweak_state_survives_loading() {
    let json = stacks::json("replace-add").unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
    value["stacks"][0]["tweak"] = serde_json::json!({
        "track": 0,
        "strip": 0,
        "evaluate_upper_tracks": true,
        "in_place": false
    });
    let doc = parse_stack_document_json(&value.to_string()).unwrap();
    let mut engine = Engine::default();
    let loaded = doc.load_into(&mut engine).unwrap();
    let stack = engine.stack(loaded.stack("layered").unwrap()).unwrap();
    let tweak = stack.tweak.unwrap();
    assert!(tweak.evaluate_upper_tracks);
    assert!(!tweak.in_place);
    assert!(stack.tweaked_strip().is_some());
}
