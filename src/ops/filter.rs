//! Signal filters: cheap two-state low/high pass, a Chamberlin state
//! variable filter and a gamma-weighted moving average.

use crate::graph::{InputSlot, OpLayout, Operation, OutputSlot};

/// Two-state lowpass driven by normalized cutoff and resonance.
pub struct Lowpass {
    layout: OpLayout,
    state0: f32,
    state1: f32,
}

impl Lowpass {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Lowpass")
                .input_bounded("Cutoff", 0.5, 0.0, 1.0)
                .input_bounded("Resonance", 0.0, 0.0, 1.0)
                .input("In", 0.0)
                .output("Out"),
            state0: 0.0,
            state1: 0.0,
        }
    }
}

impl Operation for Lowpass {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.state0 = 0.0;
        self.state1 = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let out = outputs[0].frames_mut(num_samples);
        let mut cutoff_in = inputs[0].stream();
        let mut resonance_in = inputs[1].stream();
        let mut signal = inputs[2].stream();
        for frame in out.iter_mut() {
            let cutoff = cutoff_in.next().unwrap_or(0.5);
            let resonance = resonance_in.next().unwrap_or(0.0);
            let input = signal.next().unwrap_or(0.0);
            let c = cutoff * cutoff;
            let fb = resonance + resonance / (1.0 - c.min(0.999));
            self.state0 += c * (input - self.state0 + fb * (self.state0 - self.state1));
            self.state1 += c * (self.state0 - self.state1);
            *frame = self.state1;
        }
    }
}

/// Complement of [`Lowpass`]: subtracts the lowpassed signal from the input.
pub struct Highpass {
    layout: OpLayout,
    state0: f32,
    state1: f32,
}

impl Highpass {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Highpass")
                .input_bounded("Cutoff", 0.5, 0.0, 1.0)
                .input_bounded("Resonance", 0.0, 0.0, 1.0)
                .input("In", 0.0)
                .output("Out"),
            state0: 0.0,
            state1: 0.0,
        }
    }
}

impl Operation for Highpass {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.state0 = 0.0;
        self.state1 = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let out = outputs[0].frames_mut(num_samples);
        let mut cutoff_in = inputs[0].stream();
        let mut resonance_in = inputs[1].stream();
        let mut signal = inputs[2].stream();
        for frame in out.iter_mut() {
            let cutoff = cutoff_in.next().unwrap_or(0.5);
            let resonance = resonance_in.next().unwrap_or(0.0);
            let input = signal.next().unwrap_or(0.0);
            let c = cutoff * cutoff;
            let fb = resonance + resonance / (1.0 - c.min(0.999));
            self.state0 += c * (input - self.state0 + fb * (self.state0 - self.state1));
            self.state1 += c * (self.state0 - self.state1);
            *frame = input - self.state1;
        }
    }
}

/// Chamberlin two-pole state variable filter with all four responses on
/// separate outputs.
pub struct Chamberlin {
    layout: OpLayout,
    sample_rate: f32,
    low: f32,
    band: f32,
}

impl Chamberlin {
    pub fn new(sample_rate: i32) -> Self {
        Self {
            layout: OpLayout::new("Chamberlin two-pole (4 mode)")
                .input("In", 0.0)
                .input_bounded("Cutoff", 1000.0, 10.0, 16000.0)
                .rwa()
                .input_bounded("Resonance", 0.5, 0.01, 2.0)
                .output("Low")
                .output("High")
                .output("Band")
                .output("Notch"),
            sample_rate: sample_rate.max(1) as f32,
            low: 0.0,
            band: 0.0,
        }
    }
}

impl Operation for Chamberlin {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.low = 0.0;
        self.band = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let (o_low, rest) = outputs.split_at_mut(1);
        let (o_high, rest) = rest.split_at_mut(1);
        let (o_band, o_notch) = rest.split_at_mut(1);
        let low_out = o_low[0].frames_mut(num_samples);
        let high_out = o_high[0].frames_mut(num_samples);
        let band_out = o_band[0].frames_mut(num_samples);
        let notch_out = o_notch[0].frames_mut(num_samples);

        let mut signal = inputs[0].stream();
        let mut cutoff_in = inputs[1].stream();
        let mut q_in = inputs[2].stream();
        for i in 0..num_samples {
            let input = signal.next().unwrap_or(0.0);
            let cutoff = cutoff_in.next().unwrap_or(1000.0);
            let q = q_in.next().unwrap_or(0.5);
            let f = (2.0 * (std::f32::consts::PI * cutoff / self.sample_rate).sin()).min(1.5);
            self.low += f * self.band;
            let high = input - self.low - q * self.band;
            self.band += f * high;
            low_out[i] = self.low;
            high_out[i] = high;
            band_out[i] = self.band;
            notch_out[i] = high + self.low;
        }
    }
}

/// Gamma-weighted moving average over a patchable kernel width. The balance
/// input skews the kernel toward recent (0) or old (high) samples.
pub struct MovingAverage {
    layout: OpLayout,
    history: Vec<f32>,
    head: usize,
    filled: usize,
}

impl MovingAverage {
    pub const MAX_KERNEL: usize = 5000;

    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Gamma Weighted Moving Average (GWMA)")
                .input_bounded("Sync", 0.0, 0.0, 1.0)
                .input("In", 0.0)
                .input_bounded("Kernel Size", 1.0, 1.0, Self::MAX_KERNEL as f32)
                .input_bounded("Kernel Balance", 0.0, 0.0, 10.0)
                .output("Out"),
            history: Vec::new(),
            head: 0,
            filled: 0,
        }
    }
}

impl Operation for MovingAverage {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.history.clear();
        self.head = 0;
        self.filled = 0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        if inputs[0].value() > 0.5 {
            self.reset();
        }
        let kernel = (inputs[2].value().max(1.0) as usize).min(Self::MAX_KERNEL);
        let balance = inputs[3].value();
        if self.history.len() != kernel {
            self.history.clear();
            self.history.resize(kernel, 0.0);
            self.head = 0;
            self.filled = 0;
        }

        let out = outputs[0].frames_mut(num_samples);
        let mut signal = inputs[1].stream();
        for frame in out.iter_mut() {
            let input = signal.next().unwrap_or(0.0);
            self.history[self.head] = input;
            self.head = (self.head + 1) % kernel;
            self.filled = (self.filled + 1).min(kernel);

            // Weight by age: gamma^age with gamma derived from the balance.
            let gamma = 1.0 / (1.0 + balance / kernel as f32);
            let mut sum = 0.0;
            let mut weight_sum = 0.0;
            let mut weight = 1.0;
            for age in 0..self.filled {
                let idx = (self.head + kernel - 1 - age) % kernel;
                sum += weight * self.history[idx];
                weight_sum += weight;
                weight *= gamma;
            }
            *frame = if weight_sum > 0.0 { sum / weight_sum } else { input };
        }
    }
}
