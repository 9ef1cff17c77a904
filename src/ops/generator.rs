//! Signal generators: sine and saw oscillators with optional frequency
//! modulation. All phases run in [0,1) on f64 accumulators so long sessions
//! do not drift.

use std::f64::consts::TAU;

use crate::audio::FilterRwa;
use crate::graph::{InputSlot, OpLayout, Operation, OutputSlot};

const RESET_LEVEL: f32 = 0.5;

/// Shared phase accumulator.
#[derive(Default)]
struct PhaseOsc {
    phase: f64,
}

impl PhaseOsc {
    fn advance(&mut self, freq: f64, sample_rate: f64) -> f64 {
        self.phase += freq / sample_rate;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
        if self.phase < 0.0 {
            self.phase += 1.0 - self.phase.floor();
        }
        self.phase
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}

/// Plain sine with per-sample phase modulation.
pub struct Sine {
    layout: OpLayout,
    sample_rate: f64,
    osc: PhaseOsc,
    volume: FilterRwa,
}

impl Sine {
    pub fn new(sample_rate: i32) -> Self {
        Self {
            layout: OpLayout::new("Sine")
                .input_bounded("Freq", 0.0, 0.0, 22050.0)
                .input_bounded("Volume", 0.5, 0.0, 5.0)
                .rwa()
                .input("Fmod", 0.0)
                .input("Phase", 0.0)
                .input_bounded("Smooth", 0.5, 0.0, 1.0)
                .input_bounded("Reset", 0.0, 0.0, 1.0)
                .output("Out"),
            sample_rate: sample_rate.max(1) as f64,
            osc: PhaseOsc::default(),
            volume: FilterRwa::with_smooth(0.01),
        }
    }
}

impl Operation for Sine {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.osc.reset();
        self.volume.snap(0.0);
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        if inputs[5].value() > RESET_LEVEL {
            self.osc.reset();
        }
        let freq = inputs[0].value() as f64;
        self.volume.set_target(inputs[1].value());
        self.volume.set_smooth(0.001 + 0.2 * inputs[4].value());

        let out = outputs[0].frames_mut(num_samples);
        let mut fmod = inputs[2].stream();
        let mut pmod = inputs[3].stream();
        for frame in out.iter_mut() {
            let f = freq * (1.0 + fmod.next().unwrap_or(0.0) as f64);
            let phase = self.osc.advance(f, self.sample_rate);
            let wave = (TAU * (phase + pmod.next().unwrap_or(0.0) as f64)).sin();
            *frame = self.volume.next() * wave as f32;
        }
    }
}

/// Sine with a full inner FM operator: modulator frequency, depth, offset
/// and gain are all patchable.
pub struct SineFm {
    layout: OpLayout,
    sample_rate: f64,
    carrier: PhaseOsc,
    modulator: PhaseOsc,
    volume: FilterRwa,
}

impl SineFm {
    pub fn new(sample_rate: i32) -> Self {
        Self {
            layout: OpLayout::new("Sine FM 1")
                .input_bounded("Freq", 0.0, 0.0, 22050.0)
                .input_bounded("Volume", 0.5, 0.0, 5.0)
                .input_bounded("Fmod", 0.0, 0.0, 100.0)
                .input_bounded("FmodFreq", 1.0, 0.0, 100.0)
                .input_bounded("FmodVol", 0.0, 0.0, 100.0)
                .input_bounded("FmodOfs", 0.0, 0.0, 100.0)
                .input_bounded("FmodGain", 1.0, 0.0, 10.0)
                .input_bounded("Smooth", 0.5, 0.0, 1.0)
                .input_bounded("Reset", 0.0, 0.0, 1.0)
                .output("Out"),
            sample_rate: sample_rate.max(1) as f64,
            carrier: PhaseOsc::default(),
            modulator: PhaseOsc::default(),
            volume: FilterRwa::with_smooth(0.01),
        }
    }
}

impl Operation for SineFm {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.carrier.reset();
        self.modulator.reset();
        self.volume.snap(0.0);
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        if inputs[8].value() > RESET_LEVEL {
            self.carrier.reset();
            self.modulator.reset();
        }
        let freq = inputs[0].value() as f64;
        self.volume.set_target(inputs[1].value());
        self.volume.set_smooth(0.001 + 0.2 * inputs[7].value());
        let depth = inputs[2].value() as f64;
        let mod_ratio = inputs[3].value() as f64;
        let mod_vol = inputs[4].value() as f64;
        let mod_ofs = inputs[5].value() as f64;
        let mod_gain = inputs[6].value() as f64;

        let out = outputs[0].frames_mut(num_samples);
        for frame in out.iter_mut() {
            let mod_phase = self.modulator.advance(freq * mod_ratio, self.sample_rate);
            let modulation = mod_ofs + mod_vol * (TAU * mod_phase).sin();
            let f = freq * (1.0 + depth * mod_gain * modulation);
            let phase = self.carrier.advance(f, self.sample_rate);
            *frame = self.volume.next() * (TAU * phase).sin() as f32;
        }
    }
}

/// FM sine with the modulator running at a fixed ratio of the carrier.
pub struct SineFm2 {
    layout: OpLayout,
    sample_rate: f64,
    carrier: PhaseOsc,
    modulator: PhaseOsc,
    volume: FilterRwa,
}

impl SineFm2 {
    pub fn new(sample_rate: i32) -> Self {
        Self {
            layout: OpLayout::new("Sine FM 2")
                .input_bounded("Freq", 0.0, 0.0, 22050.0)
                .input_bounded("Volume", 0.5, 0.0, 5.0)
                .input_bounded("Fmod", 0.0, 0.0, 10.0)
                .input_bounded("FmodVol", 0.5, 0.0, 10.0)
                .input_bounded("Smooth", 0.5, 0.0, 1.0)
                .input_bounded("Reset", 0.0, 0.0, 1.0)
                .output("Out"),
            sample_rate: sample_rate.max(1) as f64,
            carrier: PhaseOsc::default(),
            modulator: PhaseOsc::default(),
            volume: FilterRwa::with_smooth(0.01),
        }
    }
}

impl Operation for SineFm2 {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.carrier.reset();
        self.modulator.reset();
        self.volume.snap(0.0);
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        if inputs[5].value() > RESET_LEVEL {
            self.carrier.reset();
            self.modulator.reset();
        }
        let freq = inputs[0].value() as f64;
        self.volume.set_target(inputs[1].value());
        self.volume.set_smooth(0.001 + 0.2 * inputs[4].value());
        let ratio = inputs[2].value() as f64;
        let depth = inputs[3].value() as f64;

        let out = outputs[0].frames_mut(num_samples);
        for frame in out.iter_mut() {
            let mod_phase = self.modulator.advance(freq * ratio, self.sample_rate);
            let f = freq * (1.0 + depth * (TAU * mod_phase).sin());
            let phase = self.carrier.advance(f, self.sample_rate);
            *frame = self.volume.next() * (TAU * phase).sin() as f32;
        }
    }
}

/// Single-knob FM sine: one input scales both modulator rate and depth.
pub struct SineFm3 {
    layout: OpLayout,
    sample_rate: f64,
    carrier: PhaseOsc,
    modulator: PhaseOsc,
    volume: FilterRwa,
}

impl SineFm3 {
    pub fn new(sample_rate: i32) -> Self {
        Self {
            layout: OpLayout::new("Sine FM 3")
                .input_bounded("Freq", 0.0, 0.0, 22050.0)
                .input_bounded("Volume", 0.5, 0.0, 5.0)
                .input_bounded("Fmod", 0.5, 0.0, 2.0)
                .input_bounded("Smooth", 0.5, 0.0, 1.0)
                .input_bounded("Reset", 0.0, 0.0, 1.0)
                .output("Out"),
            sample_rate: sample_rate.max(1) as f64,
            carrier: PhaseOsc::default(),
            modulator: PhaseOsc::default(),
            volume: FilterRwa::with_smooth(0.01),
        }
    }
}

impl Operation for SineFm3 {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.carrier.reset();
        self.modulator.reset();
        self.volume.snap(0.0);
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        if inputs[4].value() > RESET_LEVEL {
            self.carrier.reset();
            self.modulator.reset();
        }
        let freq = inputs[0].value() as f64;
        self.volume.set_target(inputs[1].value());
        self.volume.set_smooth(0.001 + 0.2 * inputs[3].value());
        let fmod = inputs[2].value() as f64;

        let out = outputs[0].frames_mut(num_samples);
        for frame in out.iter_mut() {
            let mod_phase = self.modulator.advance(freq * fmod, self.sample_rate);
            let f = freq * (1.0 + fmod * (TAU * mod_phase).sin());
            let phase = self.carrier.advance(f, self.sample_rate);
            *frame = self.volume.next() * (TAU * phase).sin() as f32;
        }
    }
}

/// Band-unlimited sawtooth with shape modulation: Fmod tilts the ramp.
pub struct Saw {
    layout: OpLayout,
    sample_rate: f64,
    osc: PhaseOsc,
    volume: FilterRwa,
}

impl Saw {
    pub fn new(sample_rate: i32) -> Self {
        Self {
            layout: OpLayout::new("Saw")
                .input_bounded("Freq", 0.0, 0.0, 22050.0)
                .input_bounded("Volume", 0.5, 0.0, 5.0)
                .input_bounded("Fmod", 0.0, 0.0, 1.0)
                .input("Phase", 0.0)
                .input_bounded("Smooth", 0.5, 0.0, 1.0)
                .input_bounded("Reset", 0.0, 0.0, 1.0)
                .output("Out"),
            sample_rate: sample_rate.max(1) as f64,
            osc: PhaseOsc::default(),
            volume: FilterRwa::with_smooth(0.01),
        }
    }
}

impl Operation for Saw {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.osc.reset();
        self.volume.snap(0.0);
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        if inputs[5].value() > RESET_LEVEL {
            self.osc.reset();
        }
        let freq = inputs[0].value() as f64;
        self.volume.set_target(inputs[1].value());
        self.volume.set_smooth(0.001 + 0.2 * inputs[4].value());
        let shape = inputs[2].value() as f64;

        let out = outputs[0].frames_mut(num_samples);
        let mut pmod = inputs[3].stream();
        for frame in out.iter_mut() {
            let mut phase = self.osc.advance(freq, self.sample_rate);
            phase = (phase + pmod.next().unwrap_or(0.0) as f64).rem_euclid(1.0);
            // Tilt the ramp: shape 0 is a pure saw, shape 1 approaches a
            // triangle.
            let wave = if phase < shape * 0.5 {
                phase / (shape * 0.5).max(1e-6) * 2.0 - 1.0
            } else {
                2.0 * (1.0 - (phase - shape * 0.5) / (1.0 - shape * 0.5).max(1e-6)) - 1.0
            };
            *frame = self.volume.next() * wave as f32;
        }
    }
}

/// Second-generation sine: phase-expansion flavored variant with a high-pass
/// cleanup stage, kept alongside [`Sine`] under its own schema id.
pub struct Sine2 {
    layout: OpLayout,
    sample_rate: f64,
    osc: PhaseOsc,
    volume: FilterRwa,
    hp_state: f32,
}

impl Sine2 {
    pub fn new(sample_rate: i32) -> Self {
        Self {
            layout: OpLayout::new("Sine 2")
                .input_bounded("Reset", 0.0, 0.0, 1.0)
                .input_bounded("Freq", 0.0, 0.0, 22050.0)
                .input_bounded("Volume", 0.5, 0.0, 5.0)
                .rwa()
                .input_bounded("Smooth", 0.5, 0.0, 1.0)
                .input("Fmod", 0.0)
                .input("Phase", 0.0)
                .output("Out"),
            sample_rate: sample_rate.max(1) as f64,
            osc: PhaseOsc::default(),
            volume: FilterRwa::with_smooth(0.01),
            hp_state: 0.0,
        }
    }
}

impl Operation for Sine2 {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.osc.reset();
        self.volume.snap(0.0);
        self.hp_state = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        if inputs[0].value() > RESET_LEVEL {
            self.osc.reset();
        }
        let freq = inputs[1].value() as f64;
        self.volume.set_target(inputs[2].value());
        self.volume.set_smooth(0.001 + 0.2 * inputs[3].value());

        let out = outputs[0].frames_mut(num_samples);
        let mut fmod = inputs[4].stream();
        let mut pmod = inputs[5].stream();
        for frame in out.iter_mut() {
            let f = freq * (1.0 + fmod.next().unwrap_or(0.0) as f64);
            let phase = self.osc.advance(f, self.sample_rate);
            let wave = (TAU * (phase + pmod.next().unwrap_or(0.0) as f64)).sin() as f32;
            let sample = self.volume.next() * wave;
            // One-pole DC block.
            self.hp_state += 0.002 * (sample - self.hp_state);
            *frame = sample - self.hp_state;
        }
    }
}

/// Second-generation saw built from the same base as [`Sine2`].
pub struct Saw2 {
    layout: OpLayout,
    sample_rate: f64,
    osc: PhaseOsc,
    volume: FilterRwa,
    hp_state: f32,
}

impl Saw2 {
    pub fn new(sample_rate: i32) -> Self {
        Self {
            layout: OpLayout::new("Saw 2")
                .input_bounded("Reset", 0.0, 0.0, 1.0)
                .input_bounded("Freq", 0.0, 0.0, 22050.0)
                .input_bounded("Volume", 0.5, 0.0, 5.0)
                .rwa()
                .input_bounded("Smooth", 0.5, 0.0, 1.0)
                .input_bounded("Attenuation", 0.0, 0.0, 1.0)
                .output("Out"),
            sample_rate: sample_rate.max(1) as f64,
            osc: PhaseOsc::default(),
            volume: FilterRwa::with_smooth(0.01),
            hp_state: 0.0,
        }
    }
}

impl Operation for Saw2 {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.osc.reset();
        self.volume.snap(0.0);
        self.hp_state = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        if inputs[0].value() > RESET_LEVEL {
            self.osc.reset();
        }
        let freq = inputs[1].value() as f64;
        self.volume.set_target(inputs[2].value());
        self.volume.set_smooth(0.001 + 0.2 * inputs[3].value());
        let attenuation = inputs[4].value();

        let out = outputs[0].frames_mut(num_samples);
        for frame in out.iter_mut() {
            let phase = self.osc.advance(freq, self.sample_rate) as f32;
            let sample = self.volume.next() * (2.0 * phase - 1.0) * (1.0 - attenuation);
            self.hp_state += 0.002 * (sample - self.hp_state);
            *frame = sample - self.hp_state;
        }
    }
}
