//! End-to-end node graph tests: wiring, scheduling, ticks and the
//! pass-decoupling cache operator.

use phasor::graph::{GraphError, InputBound, NodeGraphSchema};
use phasor::ops;

/// Type ids from the schema registry.
const TYPE_ADD: i32 = 100;
const TYPE_DEBUG: i32 = 20;
const TYPE_CACHE_X1: i32 = 40;
const TYPE_CONSTANTS_01: i32 = 0;

fn debug_value(schema: &NodeGraphSchema, id: i32) -> f32 {
    schema
        .node(id)
        .unwrap()
        .op::<ops::output::Debug>()
        .unwrap()
        .value()
}

#[test]
fn test_simple_add_network() {
    let mut schema = NodeGraphSchema::with_all_node_types("AddNet", "");
    let node1 = schema.new_node(TYPE_ADD, -1);
    let node2 = schema.new_node(TYPE_ADD, -1);
    let node_final = schema.new_node(TYPE_ADD, -1);
    let probe = schema.new_node(TYPE_DEBUG, -1);

    schema.set_input_value(node1, 0, 1.8, 1).unwrap();
    schema.set_input_value(node1, 1, 2.3, 1).unwrap();
    schema.set_input_value(node2, 0, 5.2, 1).unwrap();
    schema.set_input_value(node2, 1, 3.3, 1).unwrap();
    schema.set_input_link(node_final, 0, node1, 0).unwrap();
    schema.set_input_link(node_final, 1, node2, 0).unwrap();
    schema.set_input_link(probe, 0, node_final, 0).unwrap();

    schema.process_subgraph(1, 1);

    let out = schema.node(node_final).unwrap().output(0).unwrap().value();
    assert!((out - 12.6).abs() < 1e-4, "got {out}");
}

#[test]
fn test_cycle_rejection_leaves_graph_unchanged() {
    let mut schema = NodeGraphSchema::with_all_node_types("Cycles", "");
    let n1 = schema.new_node(TYPE_ADD, -1);
    let n2 = schema.new_node(TYPE_ADD, -1);

    schema.set_input_link(n1, 0, n2, 0).unwrap();
    let err = schema.set_input_link(n2, 0, n1, 0).unwrap_err();
    assert_eq!(err, GraphError::WireIntroducesCycle);

    // The forward wire still stands, the refused one never landed.
    assert_eq!(
        schema.node(n1).unwrap().input(0).unwrap().link(),
        Some((n2, 0))
    );
    assert!(schema.node(n2).unwrap().input(0).unwrap().link().is_none());
}

#[test]
fn test_longer_cycle_is_also_refused() {
    let mut schema = NodeGraphSchema::with_all_node_types("Cycles3", "");
    let a = schema.new_node(TYPE_ADD, -1);
    let b = schema.new_node(TYPE_ADD, -1);
    let c = schema.new_node(TYPE_ADD, -1);
    schema.set_input_link(b, 0, a, 0).unwrap();
    schema.set_input_link(c, 0, b, 0).unwrap();
    assert_eq!(
        schema.set_input_link(a, 0, c, 0),
        Err(GraphError::WireIntroducesCycle)
    );
}

#[test]
fn test_constant_source_modes_clamp() {
    let mut schema = NodeGraphSchema::with_all_node_types("Bounds", "");
    let source = schema.new_node(TYPE_CONSTANTS_01, -1);
    let probe = schema.new_node(TYPE_DEBUG, -1);
    schema.set_input_value(source, 0, 3.5, 1).unwrap();
    schema.set_input_link(probe, 0, source, 0).unwrap();
    schema.set_input_value(probe, 1, 0.0, 1).unwrap(); // no smoothing
    schema.process_subgraph(8, 8);
    // [0,1] mode clamps the 3.5 constant.
    assert!((debug_value(&schema, probe) - 1.0).abs() < 1e-5);
}

#[test]
fn test_input_bound_applies_on_read() {
    let mut schema = NodeGraphSchema::with_all_node_types("BoundApi", "");
    let add = schema.new_node(TYPE_ADD, -1);
    let probe = schema.new_node(TYPE_DEBUG, -1);
    schema.set_input_value(add, 0, 10.0, 1).unwrap();
    schema
        .set_input_bound(add, 0, InputBound::Custom(0.0, 2.0))
        .unwrap();
    schema.set_input_link(probe, 0, add, 0).unwrap();
    schema.set_input_value(probe, 1, 0.0, 1).unwrap();
    schema.process_subgraph(4, 4);
    assert!((debug_value(&schema, probe) - 2.0).abs() < 1e-5);
}

#[test]
fn test_remove_node_reverts_dependents_to_defaults() {
    let mut schema = NodeGraphSchema::with_all_node_types("Detach", "");
    let a = schema.new_node(TYPE_ADD, -1);
    let b = schema.new_node(TYPE_ADD, -1);
    let probe = schema.new_node(TYPE_DEBUG, -1);
    schema.set_input_value(a, 0, 7.0, 1).unwrap();
    schema.set_input_link(b, 0, a, 0).unwrap();
    schema.set_input_link(probe, 0, b, 0).unwrap();
    schema.set_input_value(probe, 1, 0.0, 1).unwrap();

    schema.process_subgraph(1, 1);
    assert!((debug_value(&schema, probe) - 7.0).abs() < 1e-5);

    assert!(schema.remove_node(a));
    schema.process_subgraph(1, 1);
    // Broken wire degrades to the slot default of 0.
    assert!(debug_value(&schema, probe).abs() < 1e-5);
}

#[test]
fn test_tick_propagation_is_monotonic() {
    let mut schema = NodeGraphSchema::with_all_node_types("Ticks", "");
    // Time source accumulates frame time on tick only.
    let time = schema.new_node(4, -1);
    schema.tick(1, 0.5);
    schema.tick(1, 0.5); // ignored, same tick count
    schema.tick(0, 0.5); // ignored, going backwards
    schema.tick(2, 0.25);
    schema.process_subgraph(1, 1);
    let frame_time = schema.node(time).unwrap().output(1).unwrap().value();
    assert!((frame_time - 0.75).abs() < 1e-5, "got {frame_time}");
}

#[test]
fn test_graph_cache_decouples_slow_producer_from_fast_reader() {
    let mut schema = NodeGraphSchema::with_all_node_types("Cache", "");
    let source = schema.new_node(3, -1); // unbounded constants
    let cache = schema.new_node(TYPE_CACHE_X1, -1);
    let probe = schema.new_node(TYPE_DEBUG, -1);
    schema.set_input_value(source, 0, 0.25, 1).unwrap();
    schema.set_input_link(cache, 0, source, 0).unwrap();
    schema.set_input_link(probe, 0, cache, 0).unwrap();
    schema.set_input_value(probe, 1, 0.0, 1).unwrap();

    // Fill a 16-sample cache window in 4-sample passes.
    for _ in 0..4 {
        schema.process_subgraph(4, 16);
    }
    let op = schema
        .node(cache)
        .unwrap()
        .op::<ops::data_io::GraphCache>()
        .unwrap();
    assert_eq!(op.written_samples(), 16);
    assert!(!op.is_filling());
    // The reader wrapped around after draining the window.
    assert_eq!(op.read_samples(), 0);
    assert!((debug_value(&schema, probe) - 0.25).abs() < 1e-5);

    // Replays keep serving the cached window without rewriting.
    schema.process_subgraph(4, 16);
    let op = schema
        .node(cache)
        .unwrap()
        .op::<ops::data_io::GraphCache>()
        .unwrap();
    assert_eq!(op.written_samples(), 16);
    assert_eq!(op.read_samples(), 4);

    // New input data restarts the fill.
    schema.set_input_value(source, 0, 0.5, 1).unwrap();
    schema.process_subgraph(4, 16);
    let op = schema
        .node(cache)
        .unwrap()
        .op::<ops::data_io::GraphCache>()
        .unwrap();
    assert_eq!(op.written_samples(), 4);
}

#[test]
fn test_speaker_renders_audio_through_memory_sink() {
    use phasor::audio::{MemoryAudioSink, SharedAudioSink};
    use std::sync::{Arc, Mutex};

    let sink = Arc::new(Mutex::new(MemoryAudioSink::new(64, 44100)));
    let shared: SharedAudioSink = sink.clone();
    let mut schema = NodeGraphSchema::with_all_node_types("Synth", "");
    schema.set_audio_output(shared);

    let sine = schema.new_node(300, -1);
    let speaker = schema.new_node(421, -1);
    schema.set_input_value(sine, 0, 440.0, 1).unwrap();
    schema.set_input_value(sine, 1, 1.0, 1).unwrap();
    schema.set_input_link(speaker, 0, sine, 0).unwrap();
    schema.set_input_link(speaker, 1, sine, 0).unwrap();
    schema.set_input_value(speaker, 2, 1.0, 1).unwrap();

    for tick in 0..20 {
        schema.tick(tick + 1, 0.01);
        schema.process_subgraph(256, 256);
    }

    let sink = sink.lock().unwrap();
    let frames = sink.committed();
    assert!(!frames.is_empty());
    assert!(frames.iter().any(|v| v.abs() > 0.05), "rendered silence");
}
