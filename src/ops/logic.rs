//! Logic operators. Inputs are treated as booleans with a 0.5 threshold;
//! outputs are 1.0 / 0.0.

use crate::graph::{InputSlot, OpLayout, Operation, OutputSlot};

const TRUE_LEVEL: f32 = 0.5;

fn truthy(value: f32) -> bool {
    value > TRUE_LEVEL
}

macro_rules! logic_op {
    ($name:ident, $title:literal, $out_name:literal, $combine:expr) => {
        pub struct $name {
            layout: OpLayout,
        }

        impl $name {
            pub fn new() -> Self {
                Self {
                    layout: OpLayout::new($title)
                        .input("In1", 0.0)
                        .input("In2", 0.0)
                        .output($out_name),
                }
            }
        }

        impl Operation for $name {
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
                let combine: fn(bool, bool) -> bool = $combine;
                let out = outputs[0].frames_mut(num_samples);
                for (frame, (a, b)) in
                    out.iter_mut().zip(inputs[0].stream().zip(inputs[1].stream()))
                {
                    *frame = if combine(truthy(a), truthy(b)) { 1.0 } else { 0.0 };
                }
            }
        }
    };
}

logic_op!(And, "And", "In1 & In2", |a, b| a && b);
logic_op!(Or, "Or", "In1 | In2", |a, b| a || b);
logic_op!(Xor, "Xor", "In1 ^ In2", |a, b| a != b);

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(op: &mut dyn Operation, a: f32, b: f32) -> f32 {
        let inputs = vec![InputSlot::constant(a, 1), InputSlot::constant(b, 1)];
        let mut outputs = vec![OutputSlot::new(0.0, 1, true)];
        op.process(1, 1, &inputs, &mut outputs);
        outputs[0].value()
    }

    #[test]
    fn test_truth_tables() {
        let mut and = And::new();
        let mut or = Or::new();
        let mut xor = Xor::new();
        assert_eq!(eval(&mut and, 1.0, 1.0), 1.0);
        assert_eq!(eval(&mut and, 1.0, 0.0), 0.0);
        assert_eq!(eval(&mut or, 0.0, 1.0), 1.0);
        assert_eq!(eval(&mut or, 0.0, 0.0), 0.0);
        assert_eq!(eval(&mut xor, 1.0, 1.0), 0.0);
        assert_eq!(eval(&mut xor, 0.0, 1.0), 1.0);
    }

    #[test]
    fn test_threshold_is_half() {
        let mut or = Or::new();
        assert_eq!(eval(&mut or, 0.4, 0.4), 0.0);
        assert_eq!(eval(&mut or, 0.6, 0.0), 1.0);
    }
}
