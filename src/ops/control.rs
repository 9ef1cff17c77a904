//! Control operators: note-driven envelope and arpeggio. Both emit a
//! frequency channel and a volume channel for downstream generators.

use crate::audio::{batch_update, frequency_from_note, FilterRwa, NO_NOTE, POLYPHONY};
use crate::graph::{InputSlot, OpLayout, Operation, OutputSlot};

/// Attack/release envelope triggered by a non-zero frequency input.
///
/// While the frequency input is non-zero the volume rises toward
/// `sqrt(velocity)` over the attack time; when it returns to zero the volume
/// falls to silence over the release time. The frequency output glides toward
/// the target, except from silence where it jumps immediately.
pub struct Envelope {
    layout: OpLayout,
    sample_rate: f32,
    note_on: bool,
    freq_target_prev: f32,
    freq: FilterRwa,
    gain: FilterRwa,
    update_rate: f32,
    samples_until_update: f32,
}

impl Envelope {
    pub fn new(sample_rate: i32) -> Self {
        Self {
            layout: OpLayout::new("Envelope")
                .input_bounded("Sync", 0.0, 0.0, 1.0)
                .input_bounded("Rate", 256.0, 1.0, 2048.0)
                .input_bounded("Velocity", 0.5, 0.0, 1.0)
                .input_bounded("Fade", 0.1, 0.0001, 1.0)
                .input_bounded("Attack", 50.0, 1.0, 10000.0)
                .input_bounded("Release", 50.0, 1.0, 10000.0)
                .input("Freq", 0.0)
                .output("Freq")
                .output("Volume"),
            sample_rate: sample_rate.max(1) as f32,
            note_on: false,
            freq_target_prev: 0.0,
            freq: FilterRwa::new(),
            gain: FilterRwa::new(),
            update_rate: 256.0,
            samples_until_update: 0.0,
        }
    }

    fn update_targets(&mut self, inputs: &[InputSlot]) {
        let velocity = inputs[2].value();
        let fade = inputs[3].value();
        let attack_ms = inputs[4].value();
        let release_ms = inputs[5].value();
        let freq_target = inputs[6].value();

        let note_on = freq_target != 0.0;
        let different_note = self.note_on && note_on && self.freq_target_prev != freq_target;
        if (note_on && !self.note_on) || different_note {
            self.note_on = true;
            self.freq_target_prev = freq_target;
            self.gain.set_duration_ms(attack_ms, 1e-5, self.sample_rate);
            self.gain.set_target(velocity.max(0.0).sqrt());
            if self.gain.value() < 1e-4 {
                // Fresh note from silence: jump, no glide.
                self.freq.snap(freq_target);
            }
            self.freq.set_duration_ms(100.0 * fade, 1e-5, self.sample_rate);
            self.freq.set_target(freq_target);
        } else if !note_on && self.note_on {
            self.note_on = false;
            self.gain.set_duration_ms(release_ms, 1e-5, self.sample_rate);
            self.gain.set_target(0.0);
        }
    }
}

impl Operation for Envelope {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.note_on = false;
        self.freq_target_prev = 0.0;
        self.freq.snap(0.0);
        self.gain.snap(0.0);
        self.samples_until_update = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        if inputs[0].value() > 0.5 {
            self.samples_until_update = 0.0;
        }
        let (o_freq, o_vol) = outputs.split_at_mut(1);
        let freq_out = o_freq[0].frames_mut(num_samples);
        let vol_out = o_vol[0].frames_mut(num_samples);

        let update_rate = self.update_rate;
        let samples_left = self.samples_until_update;
        let left = batch_update(
            self,
            update_rate,
            samples_left,
            0,
            num_samples,
            |op| {
                op.update_targets(inputs);
                op.update_rate = inputs[1].value();
                op.update_rate
            },
            |op, start, end, _updated| {
                for i in start..end {
                    freq_out[i] = op.freq.next();
                    vol_out[i] = op.gain.next();
                }
            },
        );
        self.samples_until_update = left;
    }
}

/// Cycles through held notes at a bpm-derived step rate.
pub struct Arpeggio {
    layout: OpLayout,
    sample_rate: f32,
    notes: Vec<i32>,
    note_index: usize,
    freq: f32,
    freq_target: f32,
    freq_smoothing: f32,
    gain: f32,
    gain_target: f32,
    envelope: FilterRwa,
    samples_until_update: f32,
    update_rate: f32,
}

impl Arpeggio {
    pub fn new(sample_rate: i32) -> Self {
        Self {
            layout: OpLayout::new("Arpeggio")
                .input_bounded("Sync", 0.0, 0.0, 1.0)
                .input_bounded("Bpm", 60.0, 1.0, 1000.0)
                .input_bounded("Velocity", 0.5, 0.0, 1.0)
                .input_bounded("Fade", 0.1, 0.0001, 1.0)
                .input_bounded("Attack", 50.0, 1.0, 10000.0)
                .input_bounded("Release", 50.0, 1.0, 10000.0)
                .array("Note On", NO_NOTE, POLYPHONY)
                .array("Note Off", NO_NOTE, POLYPHONY)
                .output("Freq")
                .output("Volume"),
            sample_rate: sample_rate.max(1) as f32,
            notes: Vec::new(),
            note_index: 0,
            freq: 0.0,
            freq_target: 0.0,
            freq_smoothing: 0.1,
            gain: 0.0,
            gain_target: 0.0,
            envelope: FilterRwa::new(),
            samples_until_update: 0.0,
            update_rate: 256.0,
        }
    }

    /// Apply the polyphonic note-on/note-off channels to the held set.
    fn update_held_notes(&mut self, inputs: &[InputSlot]) {
        let offs = inputs[7].array();
        for value in offs.iter().take(POLYPHONY) {
            if (*value - NO_NOTE).abs() < 0.5 {
                break;
            }
            let note = (*value + 0.5) as i32;
            self.notes.retain(|n| *n != note);
        }
        let ons = inputs[6].array();
        for value in ons.iter().take(POLYPHONY) {
            if (*value - NO_NOTE).abs() < 0.5 {
                break;
            }
            let note = (*value + 0.5) as i32;
            if !self.notes.contains(&note) {
                self.notes.push(note);
            }
        }
    }

    /// Advance to the next held note and retune targets.
    fn step(&mut self, inputs: &[InputSlot]) {
        if self.notes.is_empty() {
            self.gain_target = 0.0;
            return;
        }
        self.note_index %= self.notes.len();
        self.freq_target = frequency_from_note(self.notes[self.note_index] as f32);
        self.note_index += 1;

        let velocity = inputs[2].value();
        let fade = inputs[3].value();
        let attack_ms = inputs[4].value();
        self.gain_target = velocity;
        self.freq_smoothing = fade * fade * 0.5;
        self.envelope.set_duration_ms(attack_ms, 1e-4, self.sample_rate);
        self.envelope.snap(0.0);
        self.envelope.set_target(1.0);
    }
}

impl Operation for Arpeggio {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.notes.clear();
        self.note_index = 0;
        self.freq = 0.0;
        self.freq_target = 0.0;
        self.gain = 0.0;
        self.gain_target = 0.0;
        self.envelope.snap(0.0);
        self.samples_until_update = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        if inputs[0].value() > 0.5 {
            self.samples_until_update = 0.0;
        }
        self.update_held_notes(inputs);
        if self.notes.is_empty() {
            self.gain_target = 0.0;
        }

        let bpm = inputs[1].value().max(1.0);
        // Sixteenth-note steps.
        self.update_rate = self.sample_rate * 60.0 / (4.0 * bpm);

        let (o_freq, o_vol) = outputs.split_at_mut(1);
        let freq_out = o_freq[0].frames_mut(num_samples);
        let vol_out = o_vol[0].frames_mut(num_samples);

        let update_rate = self.update_rate;
        let samples_left = self.samples_until_update;
        let left = batch_update(
            self,
            update_rate,
            samples_left,
            0,
            num_samples,
            |op| {
                op.step(inputs);
                op.update_rate
            },
            |op, start, end, _updated| {
                for i in start..end {
                    let attack = op.envelope.next();
                    let gain = op.gain_target * attack;
                    op.gain += 0.25 * (gain - op.gain);
                    op.freq += op.freq_smoothing * (op.freq_target - op.freq);
                    freq_out[i] = op.freq;
                    vol_out[i] = op.gain;
                }
            },
        );
        self.samples_until_update = left;
    }
}
