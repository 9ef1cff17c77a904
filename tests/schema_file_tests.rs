//! Schema file format: save/load round trips on disk and version handling.

use phasor::graph::NodeGraphSchema;

#[test]
fn test_save_and_load_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patch.json");

    let mut schema = NodeGraphSchema::with_all_node_types("My Patch", "synth");
    let sine = schema.new_node(300, -1);
    let speaker = schema.new_node(421, -1);
    schema.set_input_value(sine, 0, 220.0, 1).unwrap();
    schema.set_input_link(speaker, 0, sine, 0).unwrap();
    let symbol = schema.new_node(5, -1);
    schema.set_input_text(symbol, 0, "EURUSD").unwrap();
    assert!(schema.save(&path));
    assert_eq!(schema.file_name(), "patch.json");

    let mut restored = NodeGraphSchema::with_all_node_types("", "");
    assert!(restored.load(&path));
    assert_eq!(restored.name(), "My Patch");
    assert_eq!(restored.type_name(), "synth");
    assert_eq!(restored.graph().num_nodes(), 3);
    assert_eq!(
        restored.node(speaker).unwrap().input(0).unwrap().link(),
        Some((sine, 0))
    );
    assert!((restored.node(sine).unwrap().input(0).unwrap().value() - 220.0).abs() < 1e-5);
    let text_node = restored
        .graph()
        .iter()
        .find(|n| n.type_id() == 5)
        .expect("text node");
    assert_eq!(text_node.input(0).unwrap().text(), "EURUSD");
}

#[test]
fn test_double_roundtrip_is_stable() {
    let mut schema = NodeGraphSchema::with_all_node_types("Stable", "");
    let a = schema.new_node(100, -1);
    let b = schema.new_node(102, -1);
    schema.set_input_value(a, 0, 1.25, 1).unwrap();
    schema.set_input_link(b, 0, a, 0).unwrap();

    let first = schema.to_json();
    let mut restored = NodeGraphSchema::with_all_node_types("", "");
    assert!(restored.load_json(&first));
    let second = restored.to_json();
    assert_eq!(first, second);
}

#[test]
fn test_load_missing_file_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let mut schema = NodeGraphSchema::with_all_node_types("", "");
    assert!(!schema.load(&dir.path().join("nope.json")));
}

#[test]
fn test_string_id_is_stable_per_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patch.json");
    let mut schema = NodeGraphSchema::with_all_node_types("A", "");
    assert!(schema.save(&path));
    let id_first = schema.string_id();

    let mut restored = NodeGraphSchema::with_all_node_types("", "");
    assert!(restored.load(&path));
    assert_eq!(restored.string_id(), id_first);
}
