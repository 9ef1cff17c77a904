//! Device input operators: keyboard piano, MIDI devices and microphone
//! capture. MIDI and keyboard events arrive through shared queues drained on
//! tick; notes map onto fixed polyphonic output channels.

use crate::audio::{frequency_from_note, FilterRwa, SharedAudioCapture, NO_NOTE, POLYPHONY};
use crate::graph::{InputSlot, OpLayout, Operation, OutputSlot};
use crate::hid::midi::{MidiHub, MidiListener, MidiMessage};
use crate::hid::{KeyState, KeyboardPiano as PianoMapping, NoteChannels, NoteProcessor};
use std::sync::Arc;

/// Keyboard polyphony, matching the eight note-channel outputs.
const KEYBOARD_POLYPHONY: usize = 8;

fn fill_channel(out: &mut OutputSlot, size: usize, values: &[f32]) {
    let frames = out.frames_mut(size);
    for (frame, value) in frames.iter_mut().zip(values.iter()) {
        *frame = *value;
    }
}

/// QWERTY piano: maps key presses to notes on eight polyphonic channels.
pub struct KeyboardPianoOp {
    layout: OpLayout,
    keyboard: Option<PianoMapping>,
    channels: NoteChannels,
    pending_on: [f32; KEYBOARD_POLYPHONY],
    pending_off: [f32; KEYBOARD_POLYPHONY],
    freq: f32,
}

impl KeyboardPianoOp {
    pub fn new(key_state: Option<KeyState>) -> Self {
        Self {
            layout: OpLayout::new("Keyboard")
                .output("Freq")
                .output_sized("Note On", NO_NOTE, KEYBOARD_POLYPHONY)
                .output_sized("Note Off", NO_NOTE, KEYBOARD_POLYPHONY),
            keyboard: key_state.map(PianoMapping::new),
            channels: NoteChannels::new(KEYBOARD_POLYPHONY),
            pending_on: [NO_NOTE; KEYBOARD_POLYPHONY],
            pending_off: [NO_NOTE; KEYBOARD_POLYPHONY],
            freq: 0.0,
        }
    }
}

impl NoteProcessor for KeyboardPianoOp {
    fn note_on(&mut self, note: i32, _velocity: i32) {
        let channel = self.channels.allocate(note);
        self.pending_on[channel] = note as f32;
        self.freq = frequency_from_note(note as f32);
    }

    fn note_off_all(&mut self) {
        let held: Vec<i32> = self.channels.held_notes().collect();
        for note in held {
            self.note_off(note);
        }
    }

    fn note_off(&mut self, note: i32) {
        if let Some(channel) = self.channels.release(note) {
            self.pending_off[channel] = note as f32;
        }
    }
}

impl Operation for KeyboardPianoOp {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn default_data_init(&mut self, _inputs: &mut [InputSlot], outputs: &mut [OutputSlot]) {
        outputs[1].fill(NO_NOTE);
        outputs[2].fill(NO_NOTE);
    }

    fn reset(&mut self) {
        self.channels.release_all();
        self.pending_on = [NO_NOTE; KEYBOARD_POLYPHONY];
        self.pending_off = [NO_NOTE; KEYBOARD_POLYPHONY];
        self.freq = 0.0;
    }

    fn tick(&mut self, _tick_count: i64, _delta_secs: f32) {
        if let Some(mut keyboard) = self.keyboard.take() {
            for (note, on) in keyboard.update() {
                if on {
                    self.note_on(note, crate::hid::DEFAULT_VELOCITY);
                } else {
                    self.note_off(note);
                }
            }
            self.keyboard = Some(keyboard);
        }
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        _inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        outputs[0].frames_mut(num_samples).fill(self.freq);
        fill_channel(&mut outputs[1], KEYBOARD_POLYPHONY, &self.pending_on);
        fill_channel(&mut outputs[2], KEYBOARD_POLYPHONY, &self.pending_off);
        self.pending_on = [NO_NOTE; KEYBOARD_POLYPHONY];
        self.pending_off = [NO_NOTE; KEYBOARD_POLYPHONY];
    }
}

/// MIDI keyboard: twelve polyphonic note channels with sustain handling.
pub struct MidiKeyboardOp {
    layout: OpLayout,
    name: String,
    listener: Option<MidiListener>,
    hub: Option<Arc<MidiHub>>,
    channels: NoteChannels,
    pending_on: [f32; POLYPHONY],
    pending_off: [f32; POLYPHONY],
    sustain: bool,
    sustained_notes: Vec<i32>,
    freq: f32,
    velocity: f32,
}

impl MidiKeyboardOp {
    pub fn new(hub: Option<Arc<MidiHub>>) -> Self {
        let listener = hub.as_ref().map(|hub| hub.register_listener());
        let name = hub
            .as_ref()
            .and_then(|hub| hub.device_info(0))
            .map(|info| format!("{} : Midi", info.name))
            .unwrap_or_else(|| "Midi Keyboard".to_string());
        Self {
            layout: OpLayout::new("Midi Keyboard")
                .constant("Device Id", 0.0, 1)
                .output("Freq")
                .output("Velocity")
                .output_sized("Note On", NO_NOTE, POLYPHONY)
                .output_sized("Note Off", NO_NOTE, POLYPHONY)
                .output("Device Id"),
            name,
            listener,
            hub,
            channels: NoteChannels::new(POLYPHONY),
            pending_on: [NO_NOTE; POLYPHONY],
            pending_off: [NO_NOTE; POLYPHONY],
            sustain: false,
            sustained_notes: Vec::new(),
            freq: 0.0,
            velocity: 0.0,
        }
    }

    fn device_id(inputs: &[InputSlot]) -> u32 {
        inputs[0].value().clamp(0.0, 10.0) as u32
    }
}

impl NoteProcessor for MidiKeyboardOp {
    fn note_on(&mut self, note: i32, velocity: i32) {
        self.sustained_notes.retain(|n| *n != note);
        let channel = self.channels.allocate(note);
        self.pending_on[channel] = note as f32;
        self.freq = frequency_from_note(note as f32);
        self.velocity = velocity as f32 / 127.0;
    }

    fn note_off_all(&mut self) {
        let held: Vec<i32> = self.channels.held_notes().collect();
        for note in held {
            self.note_off(note);
        }
    }

    fn note_off(&mut self, note: i32) {
        if self.sustain {
            if !self.sustained_notes.contains(&note) {
                self.sustained_notes.push(note);
            }
            return;
        }
        if let Some(channel) = self.channels.release(note) {
            self.pending_off[channel] = note as f32;
        }
    }

    fn note_sustain(&mut self, on: bool) {
        self.sustain = on;
        if !on {
            let notes = std::mem::take(&mut self.sustained_notes);
            for note in notes {
                self.note_off(note);
            }
        }
    }
}

impl Operation for MidiKeyboardOp {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_data_init(&mut self, _inputs: &mut [InputSlot], outputs: &mut [OutputSlot]) {
        outputs[2].fill(NO_NOTE);
        outputs[3].fill(NO_NOTE);
    }

    fn reset(&mut self) {
        self.channels.release_all();
        self.pending_on = [NO_NOTE; POLYPHONY];
        self.pending_off = [NO_NOTE; POLYPHONY];
        self.sustain = false;
        self.sustained_notes.clear();
        self.freq = 0.0;
        self.velocity = 0.0;
    }

    fn tick(&mut self, _tick_count: i64, _delta_secs: f32) {
        let Some(listener) = self.listener.clone() else {
            return;
        };
        let Ok(mut queue) = listener.lock() else {
            return;
        };
        let events: Vec<_> = queue.drain(..).collect();
        drop(queue);
        for data in events {
            match data.message() {
                MidiMessage::NoteOn { note, velocity } => {
                    self.note_on(note as i32, velocity as i32)
                }
                MidiMessage::NoteOff { note } => self.note_off(note as i32),
                MidiMessage::Sustain { on } => self.note_sustain(on),
                _ => {}
            }
        }
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        outputs[0].frames_mut(num_samples).fill(self.freq);
        outputs[1].frames_mut(num_samples).fill(self.velocity);
        fill_channel(&mut outputs[2], POLYPHONY, &self.pending_on);
        fill_channel(&mut outputs[3], POLYPHONY, &self.pending_off);
        outputs[4].set_value(Self::device_id(inputs) as f32);
        self.pending_on = [NO_NOTE; POLYPHONY];
        self.pending_off = [NO_NOTE; POLYPHONY];
        if let (Some(hub), true) = (self.hub.as_ref(), self.name == "Midi Keyboard") {
            if let Some(info) = hub.device_info(Self::device_id(inputs)) {
                self.name = format!("{} : Midi", info.name);
            }
        }
    }
}

/// Eight continuous-controller knobs normalized to [0,1].
pub struct MidiKnobsOp {
    layout: OpLayout,
    listener: Option<MidiListener>,
    knobs: [f32; 8],
}

impl MidiKnobsOp {
    pub fn new(hub: Option<Arc<MidiHub>>) -> Self {
        let mut layout = OpLayout::new("Midi Knobs").constant("Device Id", 0.0, 1);
        for i in 0..8 {
            layout = layout.output(format!("Knob {i}"));
        }
        layout = layout.output("Device Id");
        Self {
            layout,
            listener: hub.as_ref().map(|hub| hub.register_listener()),
            knobs: [0.0; 8],
        }
    }
}

impl Operation for MidiKnobsOp {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.knobs = [0.0; 8];
    }

    fn tick(&mut self, _tick_count: i64, _delta_secs: f32) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        let Ok(mut queue) = listener.lock() else {
            return;
        };
        while let Some(data) = queue.pop_front() {
            if let MidiMessage::ControlChange { controller, value } = data.message() {
                let index = (controller as usize) % 8;
                self.knobs[index] = value as f32 / 127.0;
            }
        }
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        for (i, value) in self.knobs.iter().enumerate() {
            outputs[i].frames_mut(num_samples).fill(*value);
        }
        outputs[8].set_value(inputs[0].value());
    }
}

/// One bank of eight toggle pads. Presses flip the pad state; the state is
/// echoed back to the device as a pad color.
pub struct MidiButtonsOp {
    layout: OpLayout,
    listener: Option<MidiListener>,
    hub: Option<Arc<MidiHub>>,
    button_group: i32,
    states: [f32; 8],
}

/// Device pad colors: off, green, red.
const PAD_COLOR_OFF: u8 = 0;
const PAD_COLOR_ON: u8 = 1;

impl MidiButtonsOp {
    pub fn new(hub: Option<Arc<MidiHub>>, button_group: i32) -> Self {
        let mut layout =
            OpLayout::new(format!("Midi Pads {button_group}")).constant("Device Id", 0.0, 1);
        for i in 0..8 {
            layout = layout.output(format!("Pad {i}"));
        }
        layout = layout.output("Device Id");
        Self {
            layout,
            listener: hub.as_ref().map(|hub| hub.register_listener()),
            hub,
            button_group,
            states: [0.0; 8],
        }
    }

    fn send_pad_color(&self, device: u32, pad: usize, on: bool) {
        if let Some(hub) = self.hub.as_ref() {
            let color = if on { PAD_COLOR_ON } else { PAD_COLOR_OFF };
            let note = (self.button_group * 8) as u8 + pad as u8;
            let _ = hub.send(device, &[0x90, note, color]);
        }
    }
}

impl Operation for MidiButtonsOp {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.states = [0.0; 8];
    }

    fn tick(&mut self, _tick_count: i64, _delta_secs: f32) {
        let Some(listener) = self.listener.clone() else {
            return;
        };
        let Ok(mut queue) = listener.lock() else {
            return;
        };
        let events: Vec<_> = queue.drain(..).collect();
        drop(queue);
        let base = self.button_group * 8;
        for data in events {
            if let MidiMessage::NoteOn { note, .. } = data.message() {
                let note = note as i32;
                if note >= base && note < base + 8 {
                    let pad = (note - base) as usize;
                    self.states[pad] = if self.states[pad] > 0.5 { 0.0 } else { 1.0 };
                    self.send_pad_color(data.device_in, pad, self.states[pad] > 0.5);
                }
            }
        }
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        for (i, state) in self.states.iter().enumerate() {
            outputs[i].frames_mut(num_samples).fill(*state);
        }
        outputs[8].set_value(inputs[0].value());
    }
}

/// Interleaved stereo capture from a recording device queue.
pub struct MicOp {
    layout: OpLayout,
    capture: Option<SharedAudioCapture>,
    envelope: FilterRwa,
}

impl MicOp {
    pub fn new(capture: Option<SharedAudioCapture>) -> Self {
        let mut envelope = FilterRwa::with_smooth(0.005);
        envelope.snap(0.0);
        Self {
            layout: OpLayout::new("Mic")
                .input_bounded("Volume", 0.5, 0.0, 1.0)
                .output("Left")
                .output("Right"),
            capture,
            envelope,
        }
    }
}

impl Operation for MicOp {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.envelope.snap(0.0);
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        self.envelope.set_target(inputs[0].value());
        let (o_left, o_right) = outputs.split_at_mut(1);
        let left = o_left[0].frames_mut(num_samples);
        let right = o_right[0].frames_mut(num_samples);
        let mut queue = self
            .capture
            .as_ref()
            .and_then(|capture| capture.lock().ok());
        for i in 0..num_samples {
            let volume = self.envelope.next();
            let (l, r) = match queue.as_mut() {
                Some(queue) => {
                    let l = queue.pop_front().unwrap_or(0.0);
                    let r = queue.pop_front().unwrap_or(0.0);
                    (l, r)
                }
                None => (0.0, 0.0),
            };
            left[i] = volume * l;
            right[i] = volume * r;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::midi::MidiData;

    #[test]
    fn test_keyboard_op_emits_note_pulses() {
        let keys = KeyState::new();
        let mut op = KeyboardPianoOp::new(Some(keys.clone()));
        keys.press(81);
        op.tick(1, 0.016);
        let mut outputs = vec![
            OutputSlot::new(0.0, 1, true),
            OutputSlot::new(NO_NOTE, KEYBOARD_POLYPHONY, true),
            OutputSlot::new(NO_NOTE, KEYBOARD_POLYPHONY, true),
        ];
        op.process(4, 4, &[], &mut outputs);
        assert!(outputs[0].value() > 0.0);
        let notes_on = outputs[1].written();
        assert!(notes_on.iter().any(|n| (*n - NO_NOTE).abs() > 0.5));
        // Pulses clear on the next pass.
        op.process(4, 4, &[], &mut outputs);
        assert!(outputs[1].written().iter().all(|n| (*n - NO_NOTE).abs() < 0.5));
    }

    #[test]
    fn test_midi_keyboard_sustain_defers_note_off() {
        let hub = MidiHub::new();
        let mut op = MidiKeyboardOp::new(Some(hub.clone()));
        let inputs = vec![InputSlot::constant(0.0, 1)];
        let mut outputs = vec![
            OutputSlot::new(0.0, 1, true),
            OutputSlot::new(0.0, 1, true),
            OutputSlot::new(NO_NOTE, POLYPHONY, true),
            OutputSlot::new(NO_NOTE, POLYPHONY, true),
            OutputSlot::new(0.0, 1, true),
        ];

        hub.dispatch(MidiData {
            device_in: 0,
            status: 0xb0,
            data1: 64,
            data2: 127,
        });
        hub.dispatch(MidiData {
            device_in: 0,
            status: 0x90,
            data1: 60,
            data2: 100,
        });
        hub.dispatch(MidiData {
            device_in: 0,
            status: 0x80,
            data1: 60,
            data2: 0,
        });
        op.tick(1, 0.016);
        op.process(1, 1, &inputs, &mut outputs);
        // Sustained: no note-off pulse yet.
        assert!(outputs[3].written().iter().all(|n| (*n - NO_NOTE).abs() < 0.5));

        hub.dispatch(MidiData {
            device_in: 0,
            status: 0xb0,
            data1: 64,
            data2: 0,
        });
        op.tick(2, 0.016);
        op.process(1, 1, &inputs, &mut outputs);
        assert!(outputs[3]
            .written()
            .iter()
            .any(|n| (*n - 60.0).abs() < 0.5));
    }

    #[test]
    fn test_midi_knobs_track_control_changes() {
        let hub = MidiHub::new();
        let mut op = MidiKnobsOp::new(Some(hub.clone()));
        hub.dispatch(MidiData {
            device_in: 0,
            status: 0xb0,
            data1: 3,
            data2: 127,
        });
        op.tick(1, 0.016);
        let inputs = vec![InputSlot::constant(0.0, 1)];
        let mut outputs: Vec<OutputSlot> = (0..9).map(|_| OutputSlot::new(0.0, 1, true)).collect();
        op.process(1, 1, &inputs, &mut outputs);
        assert!((outputs[3].value() - 1.0).abs() < 1e-6);
        assert_eq!(outputs[0].value(), 0.0);
    }

    #[test]
    fn test_midi_buttons_toggle() {
        let hub = MidiHub::new();
        let mut op = MidiButtonsOp::new(Some(hub.clone()), 1);
        let press = MidiData {
            device_in: 0,
            status: 0x90,
            data1: 10, // group 1 covers notes 8..16, pad 2
            data2: 100,
        };
        hub.dispatch(press);
        op.tick(1, 0.016);
        let inputs = vec![InputSlot::constant(0.0, 1)];
        let mut outputs: Vec<OutputSlot> = (0..9).map(|_| OutputSlot::new(0.0, 1, true)).collect();
        op.process(1, 1, &inputs, &mut outputs);
        assert_eq!(outputs[2].value(), 1.0);
        hub.dispatch(press);
        op.tick(2, 0.016);
        op.process(1, 1, &inputs, &mut outputs);
        assert_eq!(outputs[2].value(), 0.0);
    }

    #[test]
    fn test_mic_reads_capture_queue() {
        use std::collections::VecDeque;
        use std::sync::{Arc, Mutex};
        let capture: SharedAudioCapture = Arc::new(Mutex::new(VecDeque::new()));
        capture.lock().unwrap().extend([0.5f32, -0.5, 0.25, -0.25]);
        let mut op = MicOp::new(Some(capture));
        let inputs = vec![InputSlot::constant(1.0, 1)];
        let mut outputs = vec![OutputSlot::new(0.0, 1, true), OutputSlot::new(0.0, 1, true)];
        op.process(2, 2, &inputs, &mut outputs);
        // The volume envelope ramps up from zero, signs still carry through.
        assert!(outputs[0].written()[1] > 0.0);
        assert!(outputs[1].written()[1] < 0.0);
    }
}
