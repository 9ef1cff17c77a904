//! Graph nodes: id, schema type tag, slot storage and per-pass bookkeeping.

use crate::graph::input::{InputSlot, InputSource};
use crate::graph::operation::Operation;
use crate::graph::output::OutputSlot;

/// Node identifier, unique within a graph. `-1` is the invalid id.
pub type NodeId = i32;

pub const INVALID_NODE: NodeId = -1;

/// Role of a node in the surrounding system. Nodes tagged as external or
/// visual outputs are the sinks the scheduler starts traversal from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeKind {
    #[default]
    Default,
    ExternalInput,
    ExternalOutput,
    ExternalVisualOutput,
}

impl NodeKind {
    pub fn is_sink(&self) -> bool {
        matches!(self, NodeKind::ExternalOutput | NodeKind::ExternalVisualOutput)
    }
}

/// A node in the arena: an operation plus its input and output slots.
pub struct Node {
    id: NodeId,
    type_id: i32,
    kind: NodeKind,
    pub(crate) inputs: Vec<InputSlot>,
    pub(crate) outputs: Vec<OutputSlot>,
    /// Process flag: has the operation run this pass?
    pub(crate) processed: bool,
    pub(crate) last_tick: i64,
    /// Mutation counter stamp of the most recent change affecting this node.
    pub(crate) changed_at: u64,
    /// Mutation counter stamp when the node last processed.
    pub(crate) processed_at: u64,
    pub(crate) operation: Box<dyn Operation>,
}

impl Node {
    /// Build a node from an operation, creating slots from its layout and
    /// letting the operation install any non-trivial defaults.
    pub fn new(id: NodeId, type_id: i32, kind: NodeKind, mut operation: Box<dyn Operation>) -> Self {
        let layout = operation.layout().clone();
        let mut inputs: Vec<InputSlot> = layout
            .inputs
            .iter()
            .map(|def| {
                let source = if def.flags.text {
                    InputSource::Text {
                        text: String::new(),
                        capacity: def.min_size,
                    }
                } else if def.flags.array {
                    InputSource::Array(vec![def.default; def.min_size])
                } else {
                    InputSource::Constant(vec![def.default; def.min_size])
                };
                InputSlot::new(source, def.bound, def.flags, def.policy, def.default, def.min_size)
            })
            .collect();
        let mut outputs: Vec<OutputSlot> = layout
            .outputs
            .iter()
            .map(|def| OutputSlot::new(def.default, def.min_size, def.visible))
            .collect();
        operation.default_data_init(&mut inputs, &mut outputs);
        Self {
            id,
            type_id,
            kind,
            inputs,
            outputs,
            processed: false,
            last_tick: 0,
            changed_at: 0,
            processed_at: 0,
            operation,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn type_id(&self) -> i32 {
        self.type_id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input(&self, channel: usize) -> Option<&InputSlot> {
        self.inputs.get(channel)
    }

    pub fn output(&self, channel: usize) -> Option<&OutputSlot> {
        self.outputs.get(channel)
    }

    pub fn name(&self) -> &str {
        self.operation.name()
    }

    pub fn type_name(&self) -> &str {
        self.operation.type_name()
    }

    pub fn input_name(&self, channel: usize) -> &str {
        self.operation.layout().input_name(channel)
    }

    pub fn output_name(&self, channel: usize) -> &str {
        self.operation.layout().output_name(channel)
    }

    pub fn is_input_constant(&self, channel: usize) -> bool {
        self.input(channel).map(|s| s.flags().constant).unwrap_or(false)
    }

    pub fn is_input_visible(&self, channel: usize) -> bool {
        self.input(channel).map(|s| s.flags().visible).unwrap_or(false)
    }

    pub fn is_input_editable(&self, channel: usize) -> bool {
        self.input(channel).map(|s| s.flags().editable).unwrap_or(false)
    }

    pub fn is_input_text(&self, channel: usize) -> bool {
        self.input(channel).map(|s| s.flags().text).unwrap_or(false)
    }

    pub fn is_input_array(&self, channel: usize) -> bool {
        self.input(channel)
            .map(|s| matches!(s.source(), InputSource::Array(_)))
            .unwrap_or(false)
    }

    pub fn is_output_polled(&self, channel: usize) -> bool {
        self.output(channel).map(|o| o.is_polled()).unwrap_or(false)
    }

    /// Did anything feeding this node change since it last processed?
    pub fn input_has_changed(&self) -> bool {
        self.changed_at > self.processed_at
    }

    pub fn last_tick(&self) -> i64 {
        self.last_tick
    }

    /// Typed view of the owned operation.
    pub fn op<T: Operation>(&self) -> Option<&T> {
        self.operation.as_op::<T>()
    }

    pub fn op_mut<T: Operation>(&mut self) -> Option<&mut T> {
        self.operation.as_op_mut::<T>()
    }

    /// Reset the operation and re-install slot defaults.
    pub fn reset(&mut self) {
        self.operation.reset();
        self.operation
            .default_data_init(&mut self.inputs, &mut self.outputs);
    }
}
