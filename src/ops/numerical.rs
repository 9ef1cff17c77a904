//! Numerical operators: running integral, derivative and difference filters
//! over the incoming stream. These keep state across passes.

use crate::graph::{InputSlot, OpLayout, Operation, OutputSlot};

/// Accumulates the input: `out[i] = sum(in[0..=i])` carried across passes.
pub struct Integral {
    layout: OpLayout,
    sum: f32,
}

impl Integral {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Integral").input("In", 0.0).output("Sum"),
            sum: 0.0,
        }
    }
}

impl Operation for Integral {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.sum = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let out = outputs[0].frames_mut(num_samples);
        for (frame, value) in out.iter_mut().zip(inputs[0].stream()) {
            self.sum += value;
            *frame = self.sum;
        }
    }
}

/// First-order difference scaled by the time step: `(in[i] - in[i-1]) / dt`
/// with `dt = 1` sample.
pub struct Derivate {
    layout: OpLayout,
    previous: f32,
}

impl Derivate {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Derivate").input("In", 0.0).output("dIn"),
            previous: 0.0,
        }
    }
}

impl Operation for Derivate {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.previous = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let out = outputs[0].frames_mut(num_samples);
        for (frame, value) in out.iter_mut().zip(inputs[0].stream()) {
            *frame = value - self.previous;
            self.previous = value;
        }
    }
}

/// Relative difference between consecutive samples:
/// `(in[i] - in[i-1]) / |in[i-1]|`, 0 when the previous sample is 0.
pub struct DiffNorm {
    layout: OpLayout,
    previous: f32,
}

impl DiffNorm {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Difference Normalized")
                .input("In", 0.0)
                .output("dIn/|In|"),
            previous: 0.0,
        }
    }
}

impl Operation for DiffNorm {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.previous = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let out = outputs[0].frames_mut(num_samples);
        for (frame, value) in out.iter_mut().zip(inputs[0].stream()) {
            *frame = if self.previous == 0.0 {
                0.0
            } else {
                (value - self.previous) / self.previous.abs()
            };
            self.previous = value;
        }
    }
}

/// Plain difference between two streams: `Out = In1 - In2`, kept separate
/// from [`Derivate`] because it compares channels rather than time steps.
pub struct Diff {
    layout: OpLayout,
}

impl Diff {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Difference")
                .input("In1", 0.0)
                .input("In2", 0.0)
                .output("In1-In2"),
        }
    }
}

impl Operation for Diff {
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
        let out = outputs[0].frames_mut(num_samples);
        for (frame, (a, b)) in out.iter_mut().zip(inputs[0].stream().zip(inputs[1].stream())) {
            *frame = a - b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integral_accumulates_across_passes() {
        let mut op = Integral::new();
        let inputs = vec![InputSlot::constant(1.0, 1)];
        let mut outputs = vec![OutputSlot::new(0.0, 1, true)];
        op.process(4, 4, &inputs, &mut outputs);
        assert_eq!(outputs[0].written(), &[1.0, 2.0, 3.0, 4.0]);
        op.process(2, 2, &inputs, &mut outputs);
        assert_eq!(outputs[0].written(), &[5.0, 6.0]);
        op.reset();
        op.process(1, 1, &inputs, &mut outputs);
        assert_eq!(outputs[0].value(), 1.0);
    }

    #[test]
    fn test_derivate_of_constant_is_zero_after_first() {
        let mut op = Derivate::new();
        let inputs = vec![InputSlot::constant(2.0, 1)];
        let mut outputs = vec![OutputSlot::new(0.0, 1, true)];
        op.process(3, 3, &inputs, &mut outputs);
        assert_eq!(outputs[0].written(), &[2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_diff_norm_relative_change() {
        let mut op = DiffNorm::new();
        let inputs = vec![InputSlot::constant(4.0, 1)];
        let mut outputs = vec![OutputSlot::new(0.0, 1, true)];
        op.process(2, 2, &inputs, &mut outputs);
        // First sample has no previous, second is unchanged.
        assert_eq!(outputs[0].written(), &[0.0, 0.0]);
    }
}
