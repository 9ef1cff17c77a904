//! The node arena and its pull-based scheduler.
//!
//! Nodes live in a vector indexed by id; links are `(NodeId, channel)` pairs
//! resolved on every pass. Processing is depth-first from the sink nodes with
//! a per-node process flag so each operation runs at most once per pass even
//! through diamonds. Wires that would introduce a cycle are refused at wire
//! time; a cycle met at run time (defensively) cuts at the flag.

use std::collections::HashMap;
use std::fmt;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use tracing::warn;

use crate::graph::input::{InputBound, SharedBuffer};
use crate::graph::node::{Node, NodeId, NodeKind, INVALID_NODE};
use crate::graph::operation::Operation;

/// Errors surfaced by the mutating graph API. The graph is never left
/// partially mutated: either the wire is set or it is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    UnknownTypeId(i32),
    UnknownNode(NodeId),
    InvalidChannel { node: NodeId, channel: usize },
    WireIntroducesCycle,
    TypeMismatch,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::UnknownTypeId(type_id) => write!(f, "unknown node type id {type_id}"),
            GraphError::UnknownNode(id) => write!(f, "unknown node {id}"),
            GraphError::InvalidChannel { node, channel } => {
                write!(f, "node {node} has no channel {channel}")
            }
            GraphError::WireIntroducesCycle => write!(f, "wire would introduce a cycle"),
            GraphError::TypeMismatch => write!(f, "input slot kind does not accept this data"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Arena of nodes plus the scheduling state of one graph.
#[derive(Default)]
pub struct NodeGraph {
    nodes: Vec<Option<Node>>,
    /// Monotonic stamp bumped on every external mutation; drives the
    /// out-of-date propagation consumed by caching operators.
    mutation_counter: u64,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, assigning the next free id.
    pub fn insert(&mut self, type_id: i32, kind: NodeKind, operation: Box<dyn Operation>) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Some(Node::new(id, type_id, kind, operation)));
        id
    }

    /// Insert a node under an explicit id (used when loading a saved graph).
    /// Fails with `INVALID_NODE` when the id is already taken.
    pub fn insert_with_id(
        &mut self,
        id: NodeId,
        type_id: i32,
        kind: NodeKind,
        operation: Box<dyn Operation>,
    ) -> NodeId {
        if id < 0 {
            return self.insert(type_id, kind, operation);
        }
        let idx = id as usize;
        if idx >= self.nodes.len() {
            self.nodes.resize_with(idx + 1, || None);
        }
        if self.nodes[idx].is_some() {
            return INVALID_NODE;
        }
        self.nodes[idx] = Some(Node::new(id, type_id, kind, operation));
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        if id < 0 {
            return None;
        }
        self.nodes.get(id as usize).and_then(|slot| slot.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if id < 0 {
            return None;
        }
        self.nodes.get_mut(id as usize).and_then(|slot| slot.as_mut())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    /// Nodes in insertion (= id) order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter_map(|slot| slot.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut().filter_map(|slot| slot.as_mut())
    }

    /// Nodes tagged as external inputs.
    pub fn input_nodes(&self) -> impl Iterator<Item = &Node> {
        self.iter().filter(|n| n.kind() == NodeKind::ExternalInput)
    }

    /// The sinks traversal starts from.
    pub fn sink_nodes(&self) -> impl Iterator<Item = &Node> {
        self.iter().filter(|n| n.kind().is_sink())
    }

    /// Remove a node, detaching every link that points at it. Detached slots
    /// revert to their layout default constants.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        if !self.contains(id) {
            return false;
        }
        let stamp = self.bump();
        for node in self.nodes.iter_mut().filter_map(|slot| slot.as_mut()) {
            let mut detached = false;
            for slot in node.inputs.iter_mut() {
                if slot.links_to(id) {
                    slot.revert_to_default();
                    detached = true;
                }
            }
            if detached {
                node.changed_at = stamp;
            }
        }
        self.nodes[id as usize] = None;
        true
    }

    /// Wire `dst`'s input channel to `src`'s output channel. Refused when the
    /// wire would close a cycle or either endpoint is out of range.
    pub fn set_input_link(
        &mut self,
        dst: NodeId,
        channel: usize,
        src: NodeId,
        src_channel: u8,
    ) -> Result<(), GraphError> {
        let src_node = self.node(src).ok_or(GraphError::UnknownNode(src))?;
        if src_channel as usize >= src_node.num_outputs() {
            return Err(GraphError::InvalidChannel {
                node: src,
                channel: src_channel as usize,
            });
        }
        let dst_node = self.node(dst).ok_or(GraphError::UnknownNode(dst))?;
        let slot = dst_node
            .input(channel)
            .ok_or(GraphError::InvalidChannel { node: dst, channel })?;
        if slot.flags().text {
            return Err(GraphError::TypeMismatch);
        }
        if self.wire_creates_cycle(src, dst) {
            return Err(GraphError::WireIntroducesCycle);
        }
        let stamp = self.bump();
        let node = self.node_mut(dst).ok_or(GraphError::UnknownNode(dst))?;
        node.inputs[channel].set_link(src, src_channel);
        node.changed_at = stamp;
        Ok(())
    }

    /// Replace an input slot with a constant (or array, for array-flagged
    /// slots) of `min_size` copies of `value`.
    pub fn set_input_value(
        &mut self,
        id: NodeId,
        channel: usize,
        value: f32,
        min_size: usize,
    ) -> Result<(), GraphError> {
        let stamp = self.bump();
        let node = self.node_mut(id).ok_or(GraphError::UnknownNode(id))?;
        let slot = node
            .inputs
            .get_mut(channel)
            .ok_or(GraphError::InvalidChannel { node: id, channel })?;
        if slot.flags().text {
            return Err(GraphError::TypeMismatch);
        }
        slot.set_constant(value, min_size);
        node.changed_at = stamp;
        Ok(())
    }

    /// Replace an input slot's data with explicit per-element values,
    /// keeping the slot's constant/array kind. Used when loading saved
    /// graphs.
    pub fn set_input_values(
        &mut self,
        id: NodeId,
        channel: usize,
        values: &[f32],
    ) -> Result<(), GraphError> {
        let stamp = self.bump();
        let node = self.node_mut(id).ok_or(GraphError::UnknownNode(id))?;
        let slot = node
            .inputs
            .get_mut(channel)
            .ok_or(GraphError::InvalidChannel { node: id, channel })?;
        if slot.flags().text {
            return Err(GraphError::TypeMismatch);
        }
        slot.set_values(values);
        node.changed_at = stamp;
        Ok(())
    }

    /// Replace an input slot with a dynamically sized float array.
    pub fn set_input_array(
        &mut self,
        id: NodeId,
        channel: usize,
        values: &[f32],
    ) -> Result<(), GraphError> {
        let stamp = self.bump();
        let node = self.node_mut(id).ok_or(GraphError::UnknownNode(id))?;
        let slot = node
            .inputs
            .get_mut(channel)
            .ok_or(GraphError::InvalidChannel { node: id, channel })?;
        if slot.flags().text {
            return Err(GraphError::TypeMismatch);
        }
        slot.set_array(values);
        node.changed_at = stamp;
        Ok(())
    }

    pub fn set_input_text(
        &mut self,
        id: NodeId,
        channel: usize,
        text: &str,
    ) -> Result<(), GraphError> {
        let stamp = self.bump();
        let node = self.node_mut(id).ok_or(GraphError::UnknownNode(id))?;
        let slot = node
            .inputs
            .get_mut(channel)
            .ok_or(GraphError::InvalidChannel { node: id, channel })?;
        if !slot.set_text(text) {
            return Err(GraphError::TypeMismatch);
        }
        node.changed_at = stamp;
        Ok(())
    }

    pub fn set_input_bound(
        &mut self,
        id: NodeId,
        channel: usize,
        bound: InputBound,
    ) -> Result<(), GraphError> {
        let node = self.node_mut(id).ok_or(GraphError::UnknownNode(id))?;
        let slot = node
            .inputs
            .get_mut(channel)
            .ok_or(GraphError::InvalidChannel { node: id, channel })?;
        slot.set_bound(bound);
        Ok(())
    }

    /// Attach an externally owned float buffer. The graph reads it only.
    pub fn set_input_external(
        &mut self,
        id: NodeId,
        channel: usize,
        buffer: SharedBuffer,
    ) -> Result<(), GraphError> {
        let stamp = self.bump();
        let node = self.node_mut(id).ok_or(GraphError::UnknownNode(id))?;
        let slot = node
            .inputs
            .get_mut(channel)
            .ok_or(GraphError::InvalidChannel { node: id, channel })?;
        if slot.flags().text {
            return Err(GraphError::TypeMismatch);
        }
        slot.set_external(buffer);
        node.changed_at = stamp;
        Ok(())
    }

    /// Remove every link on `id` that pulls from `src`.
    pub fn detach_input(&mut self, id: NodeId, src: NodeId) {
        let stamp = self.bump();
        if let Some(node) = self.node_mut(id) {
            let mut detached = false;
            for slot in node.inputs.iter_mut() {
                if slot.links_to(src) {
                    slot.revert_to_default();
                    detached = true;
                }
            }
            if detached {
                node.changed_at = stamp;
            }
        }
    }

    /// Mark externally visible data on `id` as changed, e.g. after writing
    /// into a shared external buffer.
    pub fn node_has_changed(&mut self, id: NodeId) {
        let stamp = self.bump();
        if let Some(node) = self.node_mut(id) {
            node.changed_at = stamp;
        }
    }

    /// Visit every node at most once per tick in insertion order. Passing a
    /// tick count at or below a node's last tick is a no-op for that node.
    pub fn tick(&mut self, tick_count: i64, delta_secs: f32) {
        for node in self.nodes.iter_mut().filter_map(|slot| slot.as_mut()) {
            if tick_count > node.last_tick {
                node.operation.tick(tick_count, delta_secs);
                node.last_tick = tick_count;
            }
        }
    }

    /// One full pass: clear process flags, then drive every sink depth-first
    /// in insertion order.
    pub fn process_subgraph(&mut self, num_samples: usize, num_cache_samples: usize) {
        self.clear_process_flags();
        let sinks: Vec<NodeId> = self.sink_nodes().map(|n| n.id()).collect();
        for id in sinks {
            self.process_node(id, num_samples, num_cache_samples);
        }
    }

    /// Drive a single node (and transitively its inputs) as its own pass.
    pub fn process_node_subgraph(&mut self, id: NodeId, num_samples: usize, num_cache_samples: usize) {
        self.clear_process_flags();
        self.process_node(id, num_samples, num_cache_samples);
    }

    /// Reset every node's operation state and defaults.
    pub fn reset(&mut self) {
        for node in self.nodes.iter_mut().filter_map(|slot| slot.as_mut()) {
            node.reset();
        }
    }

    fn clear_process_flags(&mut self) {
        for node in self.nodes.iter_mut().filter_map(|slot| slot.as_mut()) {
            node.processed = false;
        }
    }

    fn bump(&mut self) -> u64 {
        self.mutation_counter += 1;
        self.mutation_counter
    }

    fn process_node(&mut self, id: NodeId, num_samples: usize, num_cache_samples: usize) {
        let idx = match self.nodes.get_mut(id as usize) {
            Some(slot) => match slot.as_mut() {
                Some(node) => {
                    if node.processed {
                        return;
                    }
                    node.processed = true;
                    id as usize
                }
                // Tombstone, or a runtime cycle re-entered the node while it
                // was taken out below.
                None => {
                    warn!(node = id, "process cut: node unavailable mid-pass");
                    return;
                }
            },
            None => return,
        };

        // Depth-first into link sources, channel index ascending.
        let sources: Vec<NodeId> = self.nodes[idx]
            .as_ref()
            .map(|node| {
                node.inputs
                    .iter()
                    .filter_map(|slot| slot.link())
                    .map(|(src, _)| src)
                    .collect()
            })
            .unwrap_or_default();
        for src in sources {
            if src != id {
                self.process_node(src, num_samples, num_cache_samples);
            }
        }

        // Take the node out of the arena so staging can borrow its peers.
        let mut node = match self.nodes[idx].take() {
            Some(node) => node,
            None => return,
        };

        let mut newest_change = node.changed_at;
        for slot in node.inputs.iter_mut() {
            slot.begin_stage();
            // Array-sized slots (e.g. polyphonic note channels) stage their
            // declared width even when the pass window is narrower.
            let window_size = num_samples.max(slot.min_size());
            if let Some((src, src_channel)) = slot.link() {
                match self.nodes.get_mut(src as usize).and_then(|s| s.as_mut()) {
                    Some(source) => {
                        let out_of_date = source.changed_at > node.processed_at;
                        if out_of_date {
                            newest_change = newest_change.max(source.changed_at);
                        }
                        match source.outputs.get_mut(src_channel as usize) {
                            Some(out) => {
                                out.ensure_size(window_size);
                                out.mark_polled();
                                let window = out.as_slice();
                                slot.stage_window(window, window_size, out_of_date);
                            }
                            None => slot.stage_window(&[], window_size, out_of_date),
                        }
                    }
                    // Broken wire mid-pass: degrade to silence.
                    None => slot.stage_window(&[], window_size, false),
                }
            } else {
                slot.stage_external(window_size);
            }
            slot.stage_rwa(num_samples);
        }

        let cache_window = num_cache_samples.max(num_samples);
        {
            let op = &mut node.operation;
            op.process(num_samples, cache_window, &node.inputs, &mut node.outputs);
        }
        node.changed_at = newest_change;
        node.processed_at = self.mutation_counter;
        self.nodes[idx] = Some(node);
    }

    /// Would adding `src -> dst` close a cycle over the current links?
    fn wire_creates_cycle(&self, src: NodeId, dst: NodeId) -> bool {
        if src == dst {
            return true;
        }
        let mut graph = DiGraph::<NodeId, ()>::new();
        let mut indices = HashMap::new();
        for node in self.iter() {
            indices.insert(node.id(), graph.add_node(node.id()));
        }
        for node in self.iter() {
            for slot in node.inputs.iter() {
                if let Some((source, _)) = slot.link() {
                    if let (Some(&a), Some(&b)) = (indices.get(&source), indices.get(&node.id())) {
                        graph.add_edge(a, b, ());
                    }
                }
            }
        }
        if let (Some(&a), Some(&b)) = (indices.get(&src), indices.get(&dst)) {
            graph.add_edge(a, b, ());
        }
        is_cyclic_directed(&graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::operation::OpLayout;
    use crate::graph::{InputSlot, Operation, OutputSlot};

    /// Forwards its input and counts how often it ran.
    struct CopyOp {
        layout: OpLayout,
        runs: usize,
    }

    impl CopyOp {
        fn new() -> Self {
            Self {
                layout: OpLayout::new("Copy").input("In", 0.0).output("Out"),
                runs: 0,
            }
        }
    }

    impl Operation for CopyOp {
        fn layout(&self) -> &OpLayout {
            &self.layout
        }

        fn process(
            &mut self,
            num_samples: usize,
            _num_cache_samples: usize,
            inputs: &[InputSlot],
            outputs: &mut [OutputSlot],
        ) {
            self.runs += 1;
            let out = outputs[0].frames_mut(num_samples);
            for (frame, value) in out.iter_mut().zip(inputs[0].stream()) {
                *frame = value;
            }
        }
    }

    fn copy_node(graph: &mut NodeGraph, kind: NodeKind) -> NodeId {
        graph.insert(1, kind, Box::new(CopyOp::new()))
    }

    #[test]
    fn test_link_and_pull() {
        let mut graph = NodeGraph::new();
        let a = copy_node(&mut graph, NodeKind::Default);
        let sink = copy_node(&mut graph, NodeKind::ExternalOutput);
        graph.set_input_value(a, 0, 0.75, 1).unwrap();
        graph.set_input_link(sink, 0, a, 0).unwrap();
        graph.process_subgraph(4, 4);
        assert_eq!(graph.node(sink).unwrap().output(0).unwrap().value(), 0.75);
    }

    #[test]
    fn test_process_flag_runs_each_node_once_in_diamond() {
        let mut graph = NodeGraph::new();
        let a = copy_node(&mut graph, NodeKind::Default);
        let b = copy_node(&mut graph, NodeKind::Default);
        let c = copy_node(&mut graph, NodeKind::Default);
        // Diamond: d pulls b and c, both pull a.
        let d = graph.insert(
            2,
            NodeKind::ExternalOutput,
            Box::new(CopyOp {
                layout: OpLayout::new("Join")
                    .input("In1", 0.0)
                    .input("In2", 0.0)
                    .output("Out"),
                runs: 0,
            }),
        );
        graph.set_input_link(b, 0, a, 0).unwrap();
        graph.set_input_link(c, 0, a, 0).unwrap();
        graph.set_input_link(d, 0, b, 0).unwrap();
        graph.set_input_link(d, 1, c, 0).unwrap();
        graph.process_subgraph(8, 8);
        graph.process_subgraph(8, 8);
        for id in [a, b, c, d] {
            let node = graph.node(id).unwrap();
            assert_eq!(node.op::<CopyOp>().unwrap().runs, 2, "node {id}");
        }
    }

    #[test]
    fn test_cycle_is_refused_and_graph_unchanged() {
        let mut graph = NodeGraph::new();
        let n1 = copy_node(&mut graph, NodeKind::Default);
        let n2 = copy_node(&mut graph, NodeKind::Default);
        graph.set_input_link(n1, 0, n2, 0).unwrap();
        let err = graph.set_input_link(n2, 0, n1, 0).unwrap_err();
        assert_eq!(err, GraphError::WireIntroducesCycle);
        assert!(graph.node(n2).unwrap().input(0).unwrap().link().is_none());
        assert_eq!(graph.node(n1).unwrap().input(0).unwrap().link(), Some((n2, 0)));
    }

    #[test]
    fn test_self_link_is_refused() {
        let mut graph = NodeGraph::new();
        let n = copy_node(&mut graph, NodeKind::Default);
        assert_eq!(
            graph.set_input_link(n, 0, n, 0),
            Err(GraphError::WireIntroducesCycle)
        );
    }

    #[test]
    fn test_invalid_channels_are_refused() {
        let mut graph = NodeGraph::new();
        let a = copy_node(&mut graph, NodeKind::Default);
        let b = copy_node(&mut graph, NodeKind::Default);
        assert!(matches!(
            graph.set_input_link(a, 5, b, 0),
            Err(GraphError::InvalidChannel { .. })
        ));
        assert!(matches!(
            graph.set_input_link(a, 0, b, 3),
            Err(GraphError::InvalidChannel { .. })
        ));
        assert_eq!(
            graph.set_input_value(99, 0, 1.0, 1),
            Err(GraphError::UnknownNode(99))
        );
    }

    #[test]
    fn test_remove_node_reverts_dependent_inputs() {
        let mut graph = NodeGraph::new();
        let a = copy_node(&mut graph, NodeKind::Default);
        let sink = copy_node(&mut graph, NodeKind::ExternalOutput);
        graph.set_input_link(sink, 0, a, 0).unwrap();
        assert!(graph.remove_node(a));
        assert!(!graph.contains(a));
        let slot = graph.node(sink).unwrap().input(0).unwrap();
        assert!(slot.link().is_none());
        // Processing still works, degraded to the slot default.
        graph.process_subgraph(4, 4);
        assert_eq!(graph.node(sink).unwrap().output(0).unwrap().value(), 0.0);
    }

    #[test]
    fn test_tick_is_monotonic_and_visits_once() {
        struct TickOp {
            layout: OpLayout,
            ticks: Vec<i64>,
        }
        impl Operation for TickOp {
            fn layout(&self) -> &OpLayout {
                &self.layout
            }
            fn process(&mut self, _: usize, _: usize, _: &[InputSlot], _: &mut [OutputSlot]) {}
            fn tick(&mut self, tick_count: i64, _delta: f32) {
                self.ticks.push(tick_count);
            }
        }
        let mut graph = NodeGraph::new();
        let id = graph.insert(
            1,
            NodeKind::Default,
            Box::new(TickOp {
                layout: OpLayout::new("Ticker").output("Out"),
                ticks: Vec::new(),
            }),
        );
        graph.tick(1, 0.016);
        graph.tick(1, 0.016);
        graph.tick(0, 0.016);
        graph.tick(2, 0.016);
        let node = graph.node(id).unwrap();
        assert_eq!(node.op::<TickOp>().unwrap().ticks, vec![1, 2]);
        assert_eq!(node.last_tick(), 2);
    }
}
