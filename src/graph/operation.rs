//! The operation trait implemented by every node's computation, plus the
//! declarative layout each operation publishes for its inputs and outputs.

use std::any::Any;

use crate::graph::input::{InputBound, InputFlags, IterationPolicy};
use crate::graph::{InputSlot, OutputSlot};

/// Declared input channel: name, default data and read policy.
#[derive(Clone)]
pub struct InputDef {
    pub name: String,
    pub default: f32,
    pub min_size: usize,
    pub bound: InputBound,
    pub flags: InputFlags,
    pub policy: IterationPolicy,
}

/// Declared output channel.
#[derive(Clone)]
pub struct OutputDef {
    pub name: String,
    pub default: f32,
    pub min_size: usize,
    pub visible: bool,
}

/// Input/output table of an operation. Built once in the operation's
/// constructor; the node uses it to create its slots with defaults applied.
#[derive(Clone, Default)]
pub struct OpLayout {
    pub name: String,
    pub type_name: String,
    pub inputs: Vec<InputDef>,
    pub outputs: Vec<OutputDef>,
}

impl OpLayout {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            type_name: name.clone(),
            name,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    /// Add an unbounded scalar input.
    pub fn input(self, name: impl Into<String>, default: f32) -> Self {
        self.input_sized(name, default, 1)
    }

    pub fn input_sized(mut self, name: impl Into<String>, default: f32, min_size: usize) -> Self {
        self.inputs.push(InputDef {
            name: name.into(),
            default,
            min_size: min_size.max(1),
            bound: InputBound::Unbounded,
            flags: InputFlags::default(),
            policy: IterationPolicy::Sampled,
        });
        self
    }

    /// Add a scalar input clamped to `[min, max]` on read.
    pub fn input_bounded(
        mut self,
        name: impl Into<String>,
        default: f32,
        min: f32,
        max: f32,
    ) -> Self {
        self.inputs.push(InputDef {
            name: name.into(),
            default,
            min_size: 1,
            bound: InputBound::from_range(min, max),
            flags: InputFlags::default(),
            policy: IterationPolicy::Sampled,
        });
        self
    }

    /// Add an editable constant channel (kept out of the wiring surface).
    pub fn constant(mut self, name: impl Into<String>, default: f32, min_size: usize) -> Self {
        self.inputs.push(InputDef {
            name: name.into(),
            default,
            min_size: min_size.max(1),
            bound: InputBound::Unbounded,
            flags: InputFlags {
                constant: true,
                ..InputFlags::default()
            },
            policy: IterationPolicy::Sampled,
        });
        self
    }

    /// Add a text input with a fixed byte capacity.
    pub fn text(mut self, name: impl Into<String>, capacity: usize) -> Self {
        self.inputs.push(InputDef {
            name: name.into(),
            default: 0.0,
            min_size: capacity.max(1),
            bound: InputBound::Unbounded,
            flags: InputFlags {
                text: true,
                ..InputFlags::default()
            },
            policy: IterationPolicy::Sampled,
        });
        self
    }

    /// Add a dynamically sized array input.
    pub fn array(mut self, name: impl Into<String>, default: f32, size: usize) -> Self {
        self.inputs.push(InputDef {
            name: name.into(),
            default,
            min_size: size.max(1),
            bound: InputBound::Unbounded,
            flags: InputFlags {
                array: true,
                ..InputFlags::default()
            },
            policy: IterationPolicy::Sampled,
        });
        self
    }

    /// Smooth the most recently added input with a running weighted average.
    pub fn rwa(mut self) -> Self {
        if let Some(last) = self.inputs.last_mut() {
            last.policy = IterationPolicy::SampledRwa;
        }
        self
    }

    /// Hide the most recently added input from editors.
    pub fn hidden(mut self) -> Self {
        if let Some(last) = self.inputs.last_mut() {
            last.flags.visible = false;
            last.flags.editable = false;
        }
        self
    }

    /// Bound the most recently added input to `[min, max]`.
    pub fn bounded(mut self, min: f32, max: f32) -> Self {
        if let Some(last) = self.inputs.last_mut() {
            last.bound = InputBound::from_range(min, max);
        }
        self
    }

    pub fn output(self, name: impl Into<String>) -> Self {
        self.output_sized(name, 0.0, 1)
    }

    pub fn output_sized(mut self, name: impl Into<String>, default: f32, min_size: usize) -> Self {
        self.outputs.push(OutputDef {
            name: name.into(),
            default,
            min_size: min_size.max(1),
            visible: true,
        });
        self
    }

    pub fn output_hidden(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(OutputDef {
            name: name.into(),
            default: 0.0,
            min_size: 1,
            visible: false,
        });
        self
    }

    pub fn input_name(&self, channel: usize) -> &str {
        self.inputs.get(channel).map(|d| d.name.as_str()).unwrap_or("")
    }

    pub fn output_name(&self, channel: usize) -> &str {
        self.outputs.get(channel).map(|d| d.name.as_str()).unwrap_or("")
    }
}

/// The stateful computation owned by a node.
///
/// `process` is assumed infallible: any internal failure must degrade to
/// silence (zeros) rather than unwind, so downstream operators always see a
/// well-formed window.
pub trait Operation: Any + Send {
    /// The operation's declared channel table.
    fn layout(&self) -> &OpLayout;

    /// Display name (often the layout name, but device operations re-title
    /// themselves after their backing device).
    fn name(&self) -> &str {
        &self.layout().name
    }

    fn type_name(&self) -> &str {
        &self.layout().type_name
    }

    /// Install non-trivial defaults into the freshly built slots. The node has
    /// already applied the layout's plain defaults.
    fn default_data_init(&mut self, _inputs: &mut [InputSlot], _outputs: &mut [OutputSlot]) {}

    /// Clear internal state.
    fn reset(&mut self) {}

    /// Produce `num_samples` frames on every output channel.
    /// `num_cache_samples` is the window of the surrounding cache-aware pass
    /// (never smaller than `num_samples` by the time it reaches here).
    fn process(
        &mut self,
        num_samples: usize,
        num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    );

    /// Per-tick work independent of sample pull.
    fn tick(&mut self, _tick_count: i64, _delta_secs: f32) {}
}

impl dyn Operation {
    /// Typed view of the operation, the replacement for the original
    /// type-hash downcast.
    pub fn as_op<T: Operation>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }

    pub fn as_op_mut<T: Operation>(&mut self) -> Option<&mut T> {
        (self as &mut dyn Any).downcast_mut::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_builder_shapes_channels() {
        let layout = OpLayout::new("Mix")
            .input("In1", 0.0)
            .input_bounded("Gain", 0.5, 0.0, 1.0)
            .rwa()
            .text("Symbol", 16)
            .output("Out");
        assert_eq!(layout.inputs.len(), 3);
        assert_eq!(layout.outputs.len(), 1);
        assert_eq!(layout.input_name(1), "Gain");
        assert_eq!(layout.inputs[1].policy, IterationPolicy::SampledRwa);
        assert_eq!(layout.inputs[1].bound, InputBound::ZeroToOne);
        assert!(layout.inputs[2].flags.text);
        assert_eq!(layout.output_name(0), "Out");
        assert_eq!(layout.input_name(9), "");
    }
}
