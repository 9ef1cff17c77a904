//! Audio support layer: the stream sink contract consumed by the speaker
//! operator, note conversion helpers and the running-weighted-average filter
//! used to smooth control signals between passes.

pub mod device;

pub use device::{CpalAudioSink, MemoryAudioSink};

/// Sentinel for "no note" in polyphonic note-channel outputs.
pub const NO_NOTE: f32 = -500.0;

/// Fixed polyphony of the note-driven device operators.
pub const POLYPHONY: usize = 12;

/// Contract between the graph's device-output operators and an audio driver.
///
/// The driver exposes a part-sized interleaved stereo write buffer. The call
/// pattern per pass is: while `can_write()`, fill `write_buffer()` with
/// `frames_per_part()` interleaved frames and `commit()`.
pub trait AudioSink: Send {
    /// Number of frames in one buffer part (the driver's block size).
    fn frames_per_part(&self) -> i32;

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> i32;

    /// Non-blocking check whether another part can be written.
    fn can_write(&self) -> bool;

    /// Interleaved stereo staging buffer of `frames_per_part() * 2` floats.
    fn write_buffer(&mut self) -> &mut [f32];

    /// Hand the staged part to the driver.
    fn commit(&mut self);
}

/// A sink shared between the schema and the speaker operator.
pub type SharedAudioSink = std::sync::Arc<std::sync::Mutex<dyn AudioSink>>;

/// Interleaved capture frames shared between a recording device and the mic
/// operator.
pub type SharedAudioCapture = std::sync::Arc<std::sync::Mutex<std::collections::VecDeque<f32>>>;

/// Piano-key note number to frequency, A4 (note 49) = 440 Hz.
pub fn frequency_from_note(note: f32) -> f32 {
    440.0 * 2.0_f32.powf((note - 49.0) / 12.0)
}

/// Convert a duration in milliseconds to a per-sample RWA convergence factor.
pub fn rwa_factor_from_ms(ms: f32, limit: f32, sample_rate: f32) -> f32 {
    let samples = (ms * 0.001 * sample_rate).max(1.0);
    (1.0 - (-1.0 / samples).exp()).max(limit)
}

/// Running weighted average: a one-pole smoother that converges toward a
/// target value one step per sample.
#[derive(Debug, Clone)]
pub struct FilterRwa {
    value: f32,
    target: f32,
    smooth: f32,
}

impl Default for FilterRwa {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterRwa {
    pub fn new() -> Self {
        Self {
            value: 0.0,
            target: 0.0,
            smooth: 0.005,
        }
    }

    pub fn with_smooth(smooth: f32) -> Self {
        Self {
            value: 0.0,
            target: 0.0,
            smooth: smooth.clamp(0.0, 1.0),
        }
    }

    /// Set the convergence factor directly (0 = frozen, 1 = immediate).
    pub fn set_smooth(&mut self, smooth: f32) {
        self.smooth = smooth.clamp(0.0, 1.0);
    }

    /// Set the convergence factor from a duration in milliseconds.
    pub fn set_duration_ms(&mut self, ms: f32, limit: f32, sample_rate: f32) {
        self.smooth = rwa_factor_from_ms(ms, limit, sample_rate);
    }

    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    /// Jump to a value without smoothing.
    pub fn snap(&mut self, value: f32) {
        self.value = value;
        self.target = value;
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    /// Advance one sample toward the target and return the new value.
    pub fn next(&mut self) -> f32 {
        self.value += self.smooth * (self.target - self.value);
        self.value
    }

    /// Advance one sample toward an explicit target.
    pub fn next_toward(&mut self, target: f32) -> f32 {
        self.target = target;
        self.next()
    }
}

/// Run a sample loop that re-evaluates its parameters every `update_samples`
/// samples. `update` runs at each boundary and returns the new update rate;
/// `process` handles the `[start, end)` frames between boundaries. Both
/// callbacks receive `ctx` so one piece of state can serve the whole loop.
/// Returns the number of samples left until the next update so callers can
/// carry the remainder across passes.
pub fn batch_update<C>(
    ctx: &mut C,
    mut update_samples: f32,
    mut samples_left: f32,
    start: usize,
    end: usize,
    mut update: impl FnMut(&mut C) -> f32,
    mut process: impl FnMut(&mut C, usize, usize, bool),
) -> f32 {
    let mut pos = start as f32;
    let end_f = end as f32;
    while pos < end_f {
        let mut updated = false;
        if samples_left < 1.0 {
            update_samples = update(ctx);
            samples_left += update_samples;
            updated = true;
        }
        let samples = (end_f - pos).min(samples_left);
        process(ctx, pos as usize, (pos + samples) as usize, updated);
        pos += samples;
        samples_left -= samples;
    }
    samples_left
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_from_note() {
        assert!((frequency_from_note(49.0) - 440.0).abs() < 1e-4);
        assert!((frequency_from_note(61.0) - 880.0).abs() < 1e-3);
        assert!((frequency_from_note(37.0) - 220.0).abs() < 1e-3);
    }

    #[test]
    fn test_rwa_converges_to_target() {
        let mut rwa = FilterRwa::with_smooth(0.5);
        rwa.set_target(1.0);
        let mut last = 0.0;
        for _ in 0..32 {
            last = rwa.next();
        }
        assert!((last - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_rwa_snap_is_immediate() {
        let mut rwa = FilterRwa::with_smooth(0.01);
        rwa.snap(0.7);
        assert_eq!(rwa.value(), 0.7);
        assert_eq!(rwa.next(), 0.7);
    }

    #[test]
    fn test_batch_update_covers_range() {
        let mut counts = (0usize, 0usize);
        let left = batch_update(
            &mut counts,
            8.0,
            0.0,
            0,
            20,
            |c| {
                c.1 += 1;
                8.0
            },
            |c, s, e, _| c.0 += e - s,
        );
        assert_eq!(counts.0, 20);
        assert_eq!(counts.1, 3);
        assert!((left - 4.0).abs() < 1e-6);
    }
}
