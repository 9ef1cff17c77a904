//! Source operators: editable constants, time bases and text symbols.

use crate::graph::{InputBound, InputSlot, OpLayout, Operation, OutputSlot};
use crate::util::string_id;

/// Value range modes of the constant source, one per schema type id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantMode {
    ZeroToOne,
    MinusOneToOne,
    ZeroToHundred,
    Unbounded,
}

impl ConstantMode {
    pub fn from_index(mode: i32) -> Self {
        match mode {
            0 => ConstantMode::ZeroToOne,
            1 => ConstantMode::MinusOneToOne,
            2 => ConstantMode::ZeroToHundred,
            _ => ConstantMode::Unbounded,
        }
    }

    fn bound(&self) -> InputBound {
        match self {
            ConstantMode::ZeroToOne => InputBound::ZeroToOne,
            ConstantMode::MinusOneToOne => InputBound::MinusOneToOne,
            ConstantMode::ZeroToHundred => InputBound::ZeroToHundred,
            ConstantMode::Unbounded => InputBound::Unbounded,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ConstantMode::ZeroToOne => "Constant [0,1]",
            ConstantMode::MinusOneToOne => "Constant [-1,1]",
            ConstantMode::ZeroToHundred => "Constant [0,100]",
            ConstantMode::Unbounded => "Constant [-inf,inf]",
        }
    }
}

/// Four editable constant channels copied to four outputs, clamped to the
/// mode's range.
pub struct Constants {
    layout: OpLayout,
    mode: ConstantMode,
}

impl Constants {
    pub const CHANNELS: usize = 4;

    pub fn new(mode: ConstantMode) -> Self {
        let mut layout = OpLayout::new(mode.title());
        for i in 0..Self::CHANNELS {
            layout = layout.constant(format!("Value {i}"), 0.0, 1);
        }
        for i in 0..Self::CHANNELS {
            layout = layout.output(format!("Out {i}"));
        }
        Self { layout, mode }
    }

    pub fn mode(&self) -> ConstantMode {
        self.mode
    }
}

impl Operation for Constants {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn default_data_init(&mut self, inputs: &mut [InputSlot], _outputs: &mut [OutputSlot]) {
        for slot in inputs.iter_mut() {
            slot.set_bound(self.mode.bound());
        }
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        for (slot, out) in inputs.iter().zip(outputs.iter_mut()) {
            let value = slot.value();
            out.frames_mut(num_samples).fill(value);
        }
    }
}

/// Monotonic time bases: audio time advanced per processed sample and frame
/// time advanced per tick.
pub struct Time {
    layout: OpLayout,
    sample_rate: f32,
    audio_time: f32,
    frame_time: f32,
}

impl Time {
    pub fn new(sample_rate: i32) -> Self {
        Self {
            layout: OpLayout::new("Time")
                .output("Audio Time")
                .output("Frame Time"),
            sample_rate: sample_rate.max(1) as f32,
            audio_time: 0.0,
            frame_time: 0.0,
        }
    }
}

impl Operation for Time {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.audio_time = 0.0;
        self.frame_time = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        _inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let dt = 1.0 / self.sample_rate;
        let out = outputs[0].frames_mut(num_samples);
        for frame in out.iter_mut() {
            self.audio_time += dt;
            *frame = self.audio_time;
        }
        outputs[1].frames_mut(num_samples).fill(self.frame_time);
    }

    fn tick(&mut self, _tick_count: i64, delta_secs: f32) {
        self.frame_time += delta_secs;
    }
}

/// A named symbol source. The editable text is read by data operators through
/// the node; the float output carries a stable hash of the text so consumers
/// notice symbol changes through ordinary links.
pub struct Text {
    layout: OpLayout,
}

impl Text {
    pub const CAPACITY: usize = 32;

    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Text")
                .text("Text", Self::CAPACITY)
                .output("String Id"),
        }
    }
}

impl Operation for Text {
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
        let id = string_id(inputs[0].text()) as f32;
        outputs[0].frames_mut(num_samples).fill(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{Node, NodeKind};

    #[test]
    fn test_constants_clamp_to_mode() {
        let mut node = Node::new(0, 0, NodeKind::Default, Box::new(Constants::new(ConstantMode::ZeroToOne)));
        node.inputs[0].set_constant(1.7, 1);
        node.inputs[1].set_constant(-0.5, 1);
        let op = &mut node.operation;
        op.process(1, 1, &node.inputs, &mut node.outputs);
        assert_eq!(node.outputs[0].value(), 1.0);
        assert_eq!(node.outputs[1].value(), 0.0);
    }

    #[test]
    fn test_time_advances_audio_and_frame_clocks() {
        let mut op = Time::new(100);
        let mut outputs = vec![OutputSlot::new(0.0, 1, true), OutputSlot::new(0.0, 1, true)];
        op.process(10, 10, &[], &mut outputs);
        assert!((outputs[0].written()[9] - 0.1).abs() < 1e-5);
        op.tick(1, 0.5);
        op.process(1, 1, &[], &mut outputs);
        assert!((outputs[1].value() - 0.5).abs() < 1e-6);
        op.reset();
        op.process(1, 1, &[], &mut outputs);
        assert!(outputs[0].value() < 0.02);
    }
}
