//! Stereo effects: reverbs, limiter, envelope follower, saturator and a
//! trance gate.

use crate::audio::{rwa_factor_from_ms, FilterRwa};
use crate::graph::{InputSlot, OpLayout, Operation, OutputSlot};

/// Meters of acoustic path per frame, the basis for room-size delays.
fn frames_per_room_size(room_size_m: f32, sample_rate: f32) -> usize {
    let meters_per_frame = 334.0 / sample_rate;
    let meters_to_wall_per_frame = meters_per_frame / 2.0;
    ((room_size_m / meters_to_wall_per_frame) as usize).max(1)
}

const MAX_ROOM_SIZE_M: f32 = 334.0;

/// One feedback delay line.
struct Comb {
    buffer: Vec<f32>,
    index: usize,
}

impl Comb {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(1)],
            index: 0,
        }
    }

    fn step(&mut self, input: f32, delay: usize, feedback: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(1, len);
        let read = (self.index + len - delay) % len;
        let delayed = self.buffer[read];
        self.buffer[self.index] = input + delayed * feedback;
        self.index = (self.index + 1) % len;
        delayed
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
    }
}

/// Three stereo-crossed comb delays scaled by room size.
pub struct Reverb1 {
    layout: OpLayout,
    sample_rate: f32,
    combs0: Vec<Comb>,
    combs1: Vec<Comb>,
}

impl Reverb1 {
    pub fn new(sample_rate: i32) -> Self {
        let sample_rate = sample_rate.max(1) as f32;
        let capacity = frames_per_room_size(MAX_ROOM_SIZE_M, sample_rate);
        Self {
            layout: OpLayout::new("Reverb1")
                .input("In 1", 0.0)
                .input("In 2", 0.0)
                .input_bounded("Mix", 0.75, 0.0, 1.0)
                .input_bounded("Attenuation", 0.5, 0.0, 1.0)
                .input_bounded("Room Size", 30.0, 0.2, MAX_ROOM_SIZE_M)
                .input_bounded("Delay 1", 0.5, 0.0, 1.0)
                .input_bounded("Feedback 1", 0.9, 0.0, 1.0)
                .input_bounded("Delay 2", 0.8, 0.0, 1.0)
                .input_bounded("Feedback 2", 0.9, 0.0, 1.0)
                .input_bounded("Delay 3", 0.7, 0.0, 1.0)
                .input_bounded("Feedback 3", 0.9, 0.0, 1.0)
                .output("Out 1")
                .output("Out 2"),
            sample_rate,
            combs0: (0..3).map(|_| Comb::new(capacity)).collect(),
            combs1: (0..3).map(|_| Comb::new(capacity)).collect(),
        }
    }
}

impl Operation for Reverb1 {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        for comb in self.combs0.iter_mut().chain(self.combs1.iter_mut()) {
            comb.clear();
        }
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let mix = inputs[2].value();
        let attenuation = inputs[3].value();
        let room = frames_per_room_size(inputs[4].value(), self.sample_rate);
        let delays = [
            (inputs[5].value(), inputs[6].value()),
            (inputs[7].value(), inputs[8].value()),
            (inputs[9].value(), inputs[10].value()),
        ];

        let (o1, o2) = outputs.split_at_mut(1);
        let out1 = o1[0].frames_mut(num_samples);
        let out2 = o2[0].frames_mut(num_samples);
        let mut in1 = inputs[0].stream();
        let mut in2 = inputs[1].stream();
        for i in 0..num_samples {
            let dry0 = in1.next().unwrap_or(0.0);
            let dry1 = in2.next().unwrap_or(0.0);
            let mut wet0 = 0.0;
            let mut wet1 = 0.0;
            for (c, (delay, feedback)) in delays.iter().enumerate() {
                let frames = ((delay * room as f32) as usize).max(1);
                // Cross-feed the channels slightly for width.
                wet0 += self.combs0[c].step(dry0 + 0.2 * dry1, frames, feedback * attenuation);
                wet1 += self.combs1[c].step(dry1 + 0.2 * dry0, frames + c + 1, feedback * attenuation);
            }
            wet0 /= 3.0;
            wet1 /= 3.0;
            out1[i] = dry0 + mix * (wet0 - dry0);
            out2[i] = dry1 + mix * (wet1 - dry1);
        }
    }
}

/// Reverb on the common effect surface (sync/rate/gain/mix) with smoothed
/// gain and mix.
pub struct Reverb2 {
    layout: OpLayout,
    sample_rate: f32,
    gain: FilterRwa,
    mix: FilterRwa,
    combs0: Vec<Comb>,
    combs1: Vec<Comb>,
}

impl Reverb2 {
    pub fn new(sample_rate: i32) -> Self {
        let sample_rate = sample_rate.max(1) as f32;
        let capacity = frames_per_room_size(MAX_ROOM_SIZE_M, sample_rate);
        Self {
            layout: OpLayout::new("Reverb2")
                .input_bounded("Sync", 0.0, 0.0, 1.0)
                .input_bounded("Rate", 256.0, 1.0, 2048.0)
                .input_bounded("Gain", 0.5, 0.0, 5.0)
                .input_bounded("Mix", 0.5, 0.0, 1.0)
                .input("In 0", 0.0)
                .input("In 1", 0.0)
                .input_bounded("Attenuation", 0.5, 0.0, 1.0)
                .input_bounded("Room Size", 30.0, 0.2, MAX_ROOM_SIZE_M)
                .input_bounded("Delay 1", 0.5, 0.0, 1.0)
                .input_bounded("Feedback 1", 0.9, 0.0, 1.0)
                .input_bounded("Delay 2", 0.8, 0.0, 1.0)
                .input_bounded("Feedback 2", 0.9, 0.0, 1.0)
                .input_bounded("Delay 3", 0.7, 0.0, 1.0)
                .input_bounded("Feedback 3", 0.9, 0.0, 1.0)
                .output("Out 1")
                .output("Out 2"),
            sample_rate,
            gain: FilterRwa::with_smooth(0.01),
            mix: FilterRwa::with_smooth(0.01),
            combs0: (0..3).map(|_| Comb::new(capacity)).collect(),
            combs1: (0..3).map(|_| Comb::new(capacity)).collect(),
        }
    }
}

impl Operation for Reverb2 {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.gain.snap(0.0);
        self.mix.snap(0.0);
        for comb in self.combs0.iter_mut().chain(self.combs1.iter_mut()) {
            comb.clear();
        }
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        self.gain.set_target(inputs[2].value());
        self.mix.set_target(inputs[3].value());
        let attenuation = inputs[6].value();
        let room = frames_per_room_size(inputs[7].value(), self.sample_rate);
        let delays = [
            (inputs[8].value(), inputs[9].value()),
            (inputs[10].value(), inputs[11].value()),
            (inputs[12].value(), inputs[13].value()),
        ];

        let (o1, o2) = outputs.split_at_mut(1);
        let out1 = o1[0].frames_mut(num_samples);
        let out2 = o2[0].frames_mut(num_samples);
        let mut in0 = inputs[4].stream();
        let mut in1 = inputs[5].stream();
        for i in 0..num_samples {
            let gain = self.gain.next();
            let mix = self.mix.next();
            let dry0 = gain * in0.next().unwrap_or(0.0);
            let dry1 = gain * in1.next().unwrap_or(0.0);
            let mut wet0 = 0.0;
            let mut wet1 = 0.0;
            for (c, (delay, feedback)) in delays.iter().enumerate() {
                let frames = ((delay * room as f32) as usize).max(1);
                wet0 += self.combs0[c].step(dry0, frames, feedback * attenuation);
                wet1 += self.combs1[c].step(dry1, frames + c + 1, feedback * attenuation);
            }
            wet0 /= 3.0;
            wet1 /= 3.0;
            out1[i] = dry0 + mix * (wet0 - dry0);
            out2[i] = dry1 + mix * (wet1 - dry1);
        }
    }
}

/// Peak limiter with attack/release envelope and an envelope output.
pub struct Limiter {
    layout: OpLayout,
    sample_rate: f32,
    envelope: f32,
}

impl Limiter {
    pub fn new(sample_rate: i32) -> Self {
        Self {
            layout: OpLayout::new("Limiter")
                .input("In 1", 0.0)
                .input("In 2", 0.0)
                .input_bounded("Attack", 5.0, 1.0, 10000.0)
                .input_bounded("Release", 100.0, 1.0, 10000.0)
                .input_bounded("Preamp", 1.0, 0.0, 10.0)
                .input_bounded("Limit", 0.95, 0.0, 10.0)
                .output("Out 1")
                .output("Out 2")
                .output("Envelope"),
            sample_rate: sample_rate.max(1) as f32,
            envelope: 0.0,
        }
    }
}

impl Operation for Limiter {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let attack = rwa_factor_from_ms(inputs[2].value(), 1e-5, self.sample_rate);
        let release = rwa_factor_from_ms(inputs[3].value(), 1e-5, self.sample_rate);
        let preamp = inputs[4].value();
        let limit = inputs[5].value().max(1e-4);

        let (o1, rest) = outputs.split_at_mut(1);
        let (o2, o3) = rest.split_at_mut(1);
        let out1 = o1[0].frames_mut(num_samples);
        let out2 = o2[0].frames_mut(num_samples);
        let env_out = o3[0].frames_mut(num_samples);
        let mut in1 = inputs[0].stream();
        let mut in2 = inputs[1].stream();
        for i in 0..num_samples {
            let s1 = preamp * in1.next().unwrap_or(0.0);
            let s2 = preamp * in2.next().unwrap_or(0.0);
            let peak = s1.abs().max(s2.abs());
            let factor = if peak > self.envelope { attack } else { release };
            self.envelope += factor * (peak - self.envelope);
            let gain = if self.envelope > limit {
                limit / self.envelope
            } else {
                1.0
            };
            out1[i] = s1 * gain;
            out2[i] = s2 * gain;
            env_out[i] = self.envelope;
        }
    }
}

/// Rectified stereo peak tracker.
pub struct EnvelopeFollower {
    layout: OpLayout,
    sample_rate: f32,
    envelope: f32,
}

impl EnvelopeFollower {
    pub fn new(sample_rate: i32) -> Self {
        Self {
            layout: OpLayout::new("Envelope Follower")
                .input("In 1", 0.0)
                .input("In 2", 0.0)
                .input_bounded("Attack", 5.0, 1.0, 10000.0)
                .input_bounded("Release", 100.0, 1.0, 10000.0)
                .output("Envelope"),
            sample_rate: sample_rate.max(1) as f32,
            envelope: 0.0,
        }
    }
}

impl Operation for EnvelopeFollower {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let attack = rwa_factor_from_ms(inputs[2].value(), 1e-5, self.sample_rate);
        let release = rwa_factor_from_ms(inputs[3].value(), 1e-5, self.sample_rate);
        let out = outputs[0].frames_mut(num_samples);
        let mut in1 = inputs[0].stream();
        let mut in2 = inputs[1].stream();
        for frame in out.iter_mut() {
            let peak = in1
                .next()
                .unwrap_or(0.0)
                .abs()
                .max(in2.next().unwrap_or(0.0).abs());
            let factor = if peak > self.envelope { attack } else { release };
            self.envelope += factor * (peak - self.envelope);
            *frame = self.envelope;
        }
    }
}

/// Soft clipper: preamp into a limit, wet/dry mix, postamp out.
pub struct Saturator {
    layout: OpLayout,
}

impl Saturator {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Saturator")
                .input("In 1", 0.0)
                .input("In 2", 0.0)
                .input_bounded("Wet", 0.5, 0.0, 1.0)
                .input_bounded("Preamp", 1.5, 0.0, 10.0)
                .input_bounded("Limit", 0.6, 0.0, 10.0)
                .input_bounded("Postamp", 1.4, 0.0, 10.0)
                .output("Out 1")
                .output("Out 2"),
        }
    }

    fn shape(value: f32, preamp: f32, limit: f32) -> f32 {
        let driven = value * preamp;
        limit * (driven / limit.max(1e-4)).tanh()
    }
}

impl Operation for Saturator {
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
        let wet = inputs[2].value();
        let preamp = inputs[3].value();
        let limit = inputs[4].value();
        let postamp = inputs[5].value();

        let (o1, o2) = outputs.split_at_mut(1);
        let out1 = o1[0].frames_mut(num_samples);
        let out2 = o2[0].frames_mut(num_samples);
        let mut in1 = inputs[0].stream();
        let mut in2 = inputs[1].stream();
        for i in 0..num_samples {
            let dry1 = in1.next().unwrap_or(0.0);
            let dry2 = in2.next().unwrap_or(0.0);
            let wet1 = Self::shape(dry1, preamp, limit);
            let wet2 = Self::shape(dry2, preamp, limit);
            out1[i] = postamp * (dry1 + wet * (wet1 - dry1));
            out2[i] = postamp * (dry2 + wet * (wet2 - dry2));
        }
    }
}

/// Sixteen-step rhythmic gate locked to a bpm clock.
pub struct TranceGate {
    layout: OpLayout,
    sample_rate: f32,
    gate: f32,
    step_position: f32,
}

/// Step patterns indexed by the Pattern input.
const GATE_PATTERNS: [[u8; 16]; 4] = [
    [1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0],
    [1, 1, 0, 1, 1, 0, 1, 0, 1, 1, 0, 1, 1, 0, 1, 0],
    [1, 0, 0, 1, 0, 0, 1, 0, 1, 0, 0, 1, 0, 0, 1, 0],
    [1, 1, 1, 0, 1, 1, 1, 0, 1, 1, 1, 0, 1, 0, 0, 0],
];

impl TranceGate {
    pub fn new(sample_rate: i32) -> Self {
        Self {
            layout: OpLayout::new("Trance Gate")
                .input("In 1", 0.0)
                .input("In 2", 0.0)
                .input_bounded("Bpm", 60.0, 1.0, 1000.0)
                .input_bounded("Fmod", 1.0, 0.01, 1.0)
                .input_bounded("Attack", 0.001, 0.0, 1.0)
                .input_bounded("Pattern", 0.0, 0.0, 100.0)
                .input_bounded("Sync", 0.0, 0.0, 1.0)
                .output("Out 1")
                .output("Out 2"),
            sample_rate: sample_rate.max(1) as f32,
            gate: 0.0,
            step_position: 0.0,
        }
    }
}

impl Operation for TranceGate {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.gate = 0.0;
        self.step_position = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        if inputs[6].value() > 0.5 {
            self.step_position = 0.0;
        }
        let bpm = inputs[2].value();
        let fmod = inputs[3].value();
        let attack = inputs[4].value().clamp(1e-4, 1.0);
        let pattern_index = (inputs[5].value() as usize) % GATE_PATTERNS.len();
        let pattern = &GATE_PATTERNS[pattern_index];
        // Sixteenth notes: four steps per beat.
        let steps_per_sample = fmod * bpm * 4.0 / (60.0 * self.sample_rate);

        let (o1, o2) = outputs.split_at_mut(1);
        let out1 = o1[0].frames_mut(num_samples);
        let out2 = o2[0].frames_mut(num_samples);
        let mut in1 = inputs[0].stream();
        let mut in2 = inputs[1].stream();
        for i in 0..num_samples {
            let step = (self.step_position as usize) % 16;
            let target = pattern[step] as f32;
            self.gate += attack * (target - self.gate);
            out1[i] = self.gate * in1.next().unwrap_or(0.0);
            out2[i] = self.gate * in2.next().unwrap_or(0.0);
            self.step_position += steps_per_sample;
            if self.step_position >= 16.0 {
                self.step_position -= 16.0;
            }
        }
    }
}
