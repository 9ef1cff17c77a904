//! Output sinks: debug probe, rolling plot window and the speaker feeding an
//! audio driver.

use crate::audio::{FilterRwa, SharedAudioSink};
use crate::graph::{InputSlot, OpLayout, Operation, OutputSlot};

/// Smoothed scalar probe for inspecting any signal.
pub struct Debug {
    layout: OpLayout,
    value: f32,
}

impl Debug {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Debug")
                .input("Debug", 0.0)
                .constant("Smooth", 0.5, 1),
            value: 0.0,
        }
    }

    /// The smoothed probe value, read by editors and tests.
    pub fn value(&self) -> f32 {
        self.value
    }
}

impl Operation for Debug {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.value = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        _outputs: &mut [OutputSlot],
    ) {
        let smooth = inputs[1].value().clamp(0.0, 1.0);
        for value in inputs[0].stream().take(num_samples) {
            self.value += (1.0 - smooth) * (value - self.value);
        }
    }
}

/// Rolling window of the input, exposed on one wide output channel for
/// chart-style consumers.
pub struct Plot {
    layout: OpLayout,
    plot_samples: usize,
    cursor: usize,
}

impl Plot {
    pub fn new(plot_samples: i32) -> Self {
        let plot_samples = plot_samples.max(1) as usize;
        Self {
            layout: OpLayout::new("Plot")
                .input_bounded("Plot", 0.0, -1.0, 1.0)
                .output_sized("Plot", 0.0, plot_samples),
            plot_samples,
            cursor: 0,
        }
    }
}

impl Operation for Plot {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let window = outputs[0].frames_mut(self.plot_samples);
        for value in inputs[0].stream().take(num_samples) {
            window[self.cursor] = value;
            self.cursor = (self.cursor + 1) % self.plot_samples;
        }
    }
}

/// Streams interleaved stereo into an [`crate::audio::AudioSink`], applying a
/// smoothed volume. Frames accumulate locally and drain whenever the driver
/// accepts a part; if the driver stalls the oldest frames are dropped.
pub struct Speaker {
    layout: OpLayout,
    sink: Option<SharedAudioSink>,
    volume: FilterRwa,
    pending: Vec<f32>,
}

impl Speaker {
    /// Upper bound on buffered parts before old frames are dropped.
    const MAX_PENDING_PARTS: usize = 8;

    pub fn new(sink: Option<SharedAudioSink>) -> Self {
        Self {
            layout: OpLayout::new("Speaker")
                .input("Left", 0.0)
                .input("Right", 0.0)
                .input_bounded("Volume", 0.5, 0.0, 1.0),
            sink,
            volume: FilterRwa::with_smooth(0.01),
            pending: Vec::new(),
        }
    }
}

impl Operation for Speaker {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.volume.snap(0.0);
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        _outputs: &mut [OutputSlot],
    ) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        self.volume.set_target(inputs[2].value());

        let mut left = inputs[0].stream();
        let mut right = inputs[1].stream();
        for _ in 0..num_samples {
            let volume = self.volume.next();
            self.pending.push(volume * left.next().unwrap_or(0.0));
            self.pending.push(volume * right.next().unwrap_or(0.0));
        }

        let Ok(mut sink) = sink.lock() else {
            return;
        };
        let part = (sink.frames_per_part().max(1) as usize) * 2;
        while self.pending.len() >= part && sink.can_write() {
            sink.write_buffer()[..part].copy_from_slice(&self.pending[..part]);
            sink.commit();
            self.pending.drain(..part);
        }
        let cap = part * Self::MAX_PENDING_PARTS;
        if self.pending.len() > cap {
            let excess = self.pending.len() - cap;
            self.pending.drain(..excess);
        }
    }
}
