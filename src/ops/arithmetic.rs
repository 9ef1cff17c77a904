//! Arithmetic operators: elementwise math over sample windows.

use crate::graph::{InputSlot, OpLayout, Operation, OutputSlot};

/// `Out = In1 + In2`
pub struct Add {
    layout: OpLayout,
}

impl Add {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Add")
                .input("In1", 0.0)
                .input("In2", 0.0)
                .output("In1+In2"),
        }
    }
}

impl Operation for Add {
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
            *frame = a + b;
        }
    }
}

/// Two outputs: `In1-In2` and `In2-In1`.
pub struct Subtract {
    layout: OpLayout,
}

impl Subtract {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Subtract")
                .input("In1", 0.0)
                .input("In2", 0.0)
                .output("In1-In2")
                .output("In2-In1"),
        }
    }
}

impl Operation for Subtract {
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
        let (first, rest) = outputs.split_at_mut(1);
        let out1 = first[0].frames_mut(num_samples);
        let out2 = rest[0].frames_mut(num_samples);
        for (i, (a, b)) in inputs[0]
            .stream()
            .zip(inputs[1].stream())
            .take(num_samples)
            .enumerate()
        {
            let diff = a - b;
            out1[i] = diff;
            out2[i] = -diff;
        }
    }
}

/// `Out = In1 * In2`
pub struct Multiply {
    layout: OpLayout,
}

impl Multiply {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Multiply")
                .input("In1", 0.0)
                .input("In2", 0.0)
                .output("In1*In2"),
        }
    }
}

impl Operation for Multiply {
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
            *frame = a * b;
        }
    }
}

/// `Out = -In`
pub struct Negate {
    layout: OpLayout,
}

impl Negate {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Negate").input("In", 0.0).output("-In"),
        }
    }
}

impl Operation for Negate {
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
        for (frame, value) in out.iter_mut().zip(inputs[0].stream()) {
            *frame = -value;
        }
    }
}

/// Magnitude split: `abs(In)`, `max(In,0)` and `min(In,0)`.
pub struct Abs {
    layout: OpLayout,
}

impl Abs {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Abs")
                .input("In", 0.0)
                .output("abs(In)")
                .output("max(In,0)")
                .output("min(In,0)"),
        }
    }
}

impl Operation for Abs {
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
        let (first, rest) = outputs.split_at_mut(1);
        let (second, third) = rest.split_at_mut(1);
        let out1 = first[0].frames_mut(num_samples);
        let out2 = second[0].frames_mut(num_samples);
        let out3 = third[0].frames_mut(num_samples);
        for (i, value) in inputs[0].stream().take(num_samples).enumerate() {
            out1[i] = value.abs();
            out2[i] = value.max(0.0);
            out3[i] = value.min(0.0);
        }
    }
}

/// Natural and arbitrary-base logarithm of the input.
pub struct Log {
    layout: OpLayout,
}

impl Log {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Log")
                .input("In", 0.0)
                .input_bounded("Base", std::f32::consts::E, 1.0, 10.0)
                .output("ln(In)")
                .output("ln(In)/ln(Base)"),
        }
    }
}

impl Operation for Log {
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
        let base = inputs[1].value();
        let inv_ln_base = 1.0 / base.ln();
        let (first, rest) = outputs.split_at_mut(1);
        let out1 = first[0].frames_mut(num_samples);
        let out2 = rest[0].frames_mut(num_samples);
        for (i, value) in inputs[0].stream().take(num_samples).enumerate() {
            let ln = value.ln();
            out1[i] = ln;
            out2[i] = ln * inv_ln_base;
        }
    }
}

/// `Out = In1 * In2 * In3`
pub struct Multiply3 {
    layout: OpLayout,
}

impl Multiply3 {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Multiply3")
                .input("In1", 0.0)
                .input("In2", 0.0)
                .input("In3", 0.0)
                .output("In1*In2*In3"),
        }
    }
}

impl Operation for Multiply3 {
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
        let mut a = inputs[0].stream();
        let mut b = inputs[1].stream();
        let mut c = inputs[2].stream();
        for frame in out.iter_mut() {
            *frame = a.next().unwrap_or(0.0) * b.next().unwrap_or(0.0) * c.next().unwrap_or(0.0);
        }
    }
}

/// Fused multiply-add: `Out = In1 * In2 + In3`.
pub struct MultiplyAndAdd {
    layout: OpLayout,
}

impl MultiplyAndAdd {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Multiply & Add")
                .input("In1", 0.0)
                .input("In2", 0.0)
                .input("In3", 0.0)
                .output("In1*In2+In3"),
        }
    }
}

impl Operation for MultiplyAndAdd {
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
        let mut a = inputs[0].stream();
        let mut b = inputs[1].stream();
        let mut c = inputs[2].stream();
        for frame in out.iter_mut() {
            *frame = a.next().unwrap_or(0.0).mul_add(b.next().unwrap_or(0.0), c.next().unwrap_or(0.0));
        }
    }
}

/// Round to the nearest integer value.
pub struct Round {
    layout: OpLayout,
}

impl Round {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Round").input("In", 0.0).output("int(In+0.5)"),
        }
    }
}

impl Operation for Round {
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
        for (frame, value) in out.iter_mut().zip(inputs[0].stream()) {
            *frame = value.round();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InputSlot;

    fn run(op: &mut dyn Operation, inputs: &[InputSlot], channels: usize, n: usize) -> Vec<Vec<f32>> {
        let mut outputs: Vec<OutputSlot> = (0..channels).map(|_| OutputSlot::new(0.0, 1, true)).collect();
        op.process(n, n, inputs, &mut outputs);
        outputs.iter().map(|o| o.written().to_vec()).collect()
    }

    #[test]
    fn test_add() {
        let mut op = Add::new();
        let inputs = vec![InputSlot::constant(1.8, 1), InputSlot::constant(2.3, 1)];
        let out = run(&mut op, &inputs, 1, 2);
        assert!((out[0][0] - 4.1).abs() < 1e-4);
        assert!((out[0][1] - 4.1).abs() < 1e-4);
    }

    #[test]
    fn test_subtract_both_directions() {
        let mut op = Subtract::new();
        let inputs = vec![InputSlot::constant(5.0, 1), InputSlot::constant(2.0, 1)];
        let out = run(&mut op, &inputs, 2, 1);
        assert_eq!(out[0][0], 3.0);
        assert_eq!(out[1][0], -3.0);
    }

    #[test]
    fn test_abs_splits_signs() {
        let mut op = Abs::new();
        let inputs = vec![InputSlot::constant(-2.5, 1)];
        let out = run(&mut op, &inputs, 3, 1);
        assert_eq!(out[0][0], 2.5);
        assert_eq!(out[1][0], 0.0);
        assert_eq!(out[2][0], -2.5);
    }

    #[test]
    fn test_log_base() {
        let mut op = Log::new();
        let mut inputs = vec![InputSlot::constant(8.0, 1), InputSlot::constant(2.0, 1)];
        inputs[1].set_constant(2.0, 1);
        let out = run(&mut op, &inputs, 2, 1);
        assert!((out[0][0] - 8.0_f32.ln()).abs() < 1e-5);
        assert!((out[1][0] - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_multiply_and_add() {
        let mut op = MultiplyAndAdd::new();
        let inputs = vec![
            InputSlot::constant(2.0, 1),
            InputSlot::constant(3.0, 1),
            InputSlot::constant(0.5, 1),
        ];
        let out = run(&mut op, &inputs, 1, 1);
        assert_eq!(out[0][0], 6.5);
    }

    #[test]
    fn test_round() {
        let mut op = Round::new();
        let inputs = vec![InputSlot::constant(1.6, 1)];
        let out = run(&mut op, &inputs, 1, 1);
        assert_eq!(out[0][0], 2.0);
    }
}
