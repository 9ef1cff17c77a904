//! Human input: keyboard-piano note mapping and the MIDI event hub.

pub mod midi;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Default velocity for note-on events that do not carry one.
pub const DEFAULT_VELOCITY: i32 = 127;

/// Consumer of note events. Implementations map notes onto the graph's
/// polyphonic output channels.
pub trait NoteProcessor {
    fn note_on(&mut self, note: i32, velocity: i32);

    /// Release every held note.
    fn note_off_all(&mut self) {}

    fn note_off(&mut self, _note: i32) {}

    fn note_sustain(&mut self, _on: bool) {}
}

/// Key transition observed by the host window: `(key_code, pressed)`.
pub type KeyEvent = (i32, bool);

/// Shared queue of key transitions. The host pushes events from its input
/// loop; graph operators drain them on tick.
#[derive(Clone, Default)]
pub struct KeyState {
    events: Arc<Mutex<Vec<KeyEvent>>>,
}

impl KeyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self, key_code: i32) {
        if let Ok(mut events) = self.events.lock() {
            events.push((key_code, true));
        }
    }

    pub fn release(&self, key_code: i32) {
        if let Ok(mut events) = self.events.lock() {
            events.push((key_code, false));
        }
    }

    pub fn drain(&self) -> Vec<KeyEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(_) => Vec::new(),
        }
    }
}

/// Note transition produced by the keyboard mapping: `(note, on)`.
pub type NoteEvent = (i32, bool);

/// Function keys that shift the active octave.
const KEY_OCTAVE_DOWN: i32 = 291; // F2
const KEY_OCTAVE_UP: i32 = 292; // F3

/// Maps QWERTY key codes onto piano notes across two rows, with the upper
/// digit row a full octave above the letter row.
pub struct KeyboardPiano {
    key_state: KeyState,
    key_code_to_note: HashMap<i32, i32>,
    octave: i32,
    held: Vec<(i32, i32)>,
}

/// Upper row starting from note B: `1 q 2 w 3 e r 5 t 6 y 7 u i 9 o 0 p +`.
const KEY_MAP_UPPER: [i32; 19] = [
    49, 81, 50, 87, 51, 69, 82, 53, 84, 54, 89, 55, 85, 73, 57, 79, 48, 80, 43,
];
/// Lower row starting from note B: `a z s x d c v g b h n j m , l .`.
const KEY_MAP_LOWER: [i32; 16] = [65, 90, 83, 88, 68, 67, 86, 71, 66, 72, 78, 74, 77, 44, 76, 46];

impl KeyboardPiano {
    pub fn new(key_state: KeyState) -> Self {
        let mut key_code_to_note = HashMap::new();
        for (i, key) in KEY_MAP_LOWER.iter().enumerate() {
            key_code_to_note.insert(*key, i as i32 - 12);
        }
        for (i, key) in KEY_MAP_UPPER.iter().enumerate() {
            key_code_to_note.insert(*key, i as i32);
        }
        Self {
            key_state,
            key_code_to_note,
            octave: 3,
            held: Vec::new(),
        }
    }

    pub fn octave(&self) -> i32 {
        self.octave
    }

    fn note_for(&self, key_code: i32) -> Option<i32> {
        self.key_code_to_note
            .get(&key_code)
            .map(|note| note + 12 * self.octave)
    }

    /// Drain pending key transitions into note events, applying octave
    /// function keys along the way. Held notes are retuned on octave change
    /// by releasing and re-pressing.
    pub fn update(&mut self) -> Vec<NoteEvent> {
        let mut notes = Vec::new();
        for (key_code, pressed) in self.key_state.drain() {
            match key_code {
                KEY_OCTAVE_DOWN | KEY_OCTAVE_UP if pressed => {
                    let step = if key_code == KEY_OCTAVE_UP { 1 } else { -1 };
                    self.octave = (self.octave + step).clamp(0, 8);
                    for (key, note) in self.held.iter_mut() {
                        notes.push((*note, false));
                        if let Some(new_note) = self
                            .key_code_to_note
                            .get(key)
                            .map(|n| n + 12 * self.octave)
                        {
                            notes.push((new_note, true));
                            *note = new_note;
                        }
                    }
                }
                _ => {
                    if let Some(note) = self.note_for(key_code) {
                        if pressed {
                            if !self.held.iter().any(|(k, _)| *k == key_code) {
                                self.held.push((key_code, note));
                                notes.push((note, true));
                            }
                        } else if let Some(pos) =
                            self.held.iter().position(|(k, _)| *k == key_code)
                        {
                            let (_, held_note) = self.held.remove(pos);
                            notes.push((held_note, false));
                        }
                    }
                }
            }
        }
        notes
    }

    /// Convenience: forward the drained events into a note processor.
    pub fn update_into(&mut self, processor: &mut dyn NoteProcessor) {
        for (note, on) in self.update() {
            if on {
                processor.note_on(note, DEFAULT_VELOCITY);
            } else {
                processor.note_off(note);
            }
        }
    }
}

/// Round-robin allocator mapping held notes onto a fixed set of polyphonic
/// channels.
pub struct NoteChannels {
    channels: Vec<(i32, i32)>,
    counter: i32,
}

impl NoteChannels {
    pub fn new(polyphony: usize) -> Self {
        Self {
            channels: vec![(-1, 0); polyphony.max(1)],
            counter: 0,
        }
    }

    /// Channel for a new note: a free channel if any, otherwise the least
    /// recently used one.
    pub fn allocate(&mut self, note: i32) -> usize {
        self.counter += 1;
        if let Some(pos) = self.channels.iter().position(|(n, _)| *n == note) {
            self.channels[pos].1 = self.counter;
            return pos;
        }
        if let Some(pos) = self.channels.iter().position(|(n, _)| *n < 0) {
            self.channels[pos] = (note, self.counter);
            return pos;
        }
        let pos = self
            .channels
            .iter()
            .enumerate()
            .min_by_key(|(_, (_, age))| *age)
            .map(|(i, _)| i)
            .unwrap_or(0);
        self.channels[pos] = (note, self.counter);
        pos
    }

    /// Free the channel holding `note`.
    pub fn release(&mut self, note: i32) -> Option<usize> {
        let pos = self.channels.iter().position(|(n, _)| *n == note)?;
        self.channels[pos] = (-1, 0);
        Some(pos)
    }

    pub fn release_all(&mut self) {
        for channel in self.channels.iter_mut() {
            *channel = (-1, 0);
        }
    }

    pub fn held_notes(&self) -> impl Iterator<Item = i32> + '_ {
        self.channels.iter().filter(|(n, _)| *n >= 0).map(|(n, _)| *n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyboard_piano_maps_rows_an_octave_apart() {
        let keys = KeyState::new();
        let mut piano = KeyboardPiano::new(keys.clone());
        keys.press(81); // 'q' upper row, note 1
        keys.press(90); // 'z' lower row, note -11
        let notes = piano.update();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].0 - notes[1].0, 12);
        assert!(notes.iter().all(|(_, on)| *on));
    }

    #[test]
    fn test_keyboard_piano_release_emits_note_off() {
        let keys = KeyState::new();
        let mut piano = KeyboardPiano::new(keys.clone());
        keys.press(81);
        let on = piano.update();
        keys.release(81);
        let off = piano.update();
        assert_eq!(on[0].0, off[0].0);
        assert!(!off[0].1);
    }

    #[test]
    fn test_octave_shift_retunes() {
        let keys = KeyState::new();
        let mut piano = KeyboardPiano::new(keys.clone());
        keys.press(81);
        let before = piano.update()[0].0;
        keys.press(KEY_OCTAVE_UP);
        let shifted = piano.update();
        // Old note released, same key re-pressed an octave higher.
        assert_eq!(shifted[0], (before, false));
        assert_eq!(shifted[1], (before + 12, true));
    }

    #[test]
    fn test_note_channels_reuse_and_steal() {
        let mut channels = NoteChannels::new(2);
        let a = channels.allocate(60);
        let b = channels.allocate(64);
        assert_ne!(a, b);
        // Same note returns the same channel.
        assert_eq!(channels.allocate(60), a);
        // Full: steals the least recently used (64).
        let c = channels.allocate(67);
        assert_eq!(c, b);
        assert_eq!(channels.release(67), Some(b));
        assert_eq!(channels.release(99), None);
    }
}
