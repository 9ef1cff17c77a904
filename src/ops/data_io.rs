//! Bulk data operators: interleaved bus adapters and the pass-decoupling
//! sample cache.

use crate::graph::{InputSlot, OpLayout, Operation, OutputSlot};

/// De-interleaves one bus input of `stride` lanes onto `stride` outputs.
pub struct DataIn {
    layout: OpLayout,
    stride: usize,
}

impl DataIn {
    pub fn new(stride: i32) -> Self {
        let stride = stride.max(1) as usize;
        let mut layout = OpLayout::new(format!("Bus Data In x{stride}")).array("Bus Data", 0.0, 2);
        for i in 0..stride {
            layout = layout.output_sized(format!("Out {i}"), 0.0, 2);
        }
        Self { layout, stride }
    }
}

impl Operation for DataIn {
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
        let bus = inputs[0].array();
        for (i, out) in outputs.iter_mut().enumerate().take(self.stride) {
            let frames = out.frames_mut(num_samples);
            for (j, frame) in frames.iter_mut().enumerate() {
                let index = self.stride * j + i;
                *frame = bus.get(index).copied().unwrap_or(0.0);
            }
        }
    }
}

/// Interleaves `stride` inputs into one bus output of `stride` lanes.
pub struct DataOut {
    layout: OpLayout,
    stride: usize,
}

impl DataOut {
    pub fn new(stride: i32) -> Self {
        let stride = stride.max(1) as usize;
        let mut layout = OpLayout::new(format!("Bus Data Out x{stride}"));
        for i in 0..stride {
            layout = layout.input_sized(format!("In {i}"), 0.0, 2);
        }
        layout = layout.output_sized("Bus Data", 0.0, 2);
        Self { layout, stride }
    }
}

impl Operation for DataOut {
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
        let stride = self.stride;
        let out = outputs[0].frames_mut(stride * num_samples);
        for (j, slot) in inputs.iter().enumerate().take(stride) {
            for (i, value) in slot.stream().take(num_samples).enumerate() {
                out[stride * i + j] = value;
            }
        }
    }
}

/// Decouples a slow producer from a fast consumer across passes.
///
/// Writing appends `num_samples * channels` frames into an internal buffer
/// until `num_cache_samples` have accumulated; reading copies `num_samples`
/// frames out per pass and wraps to the start once the cache window has been
/// drained. Both counters restart when any input reports out-of-date data.
pub struct GraphCache {
    layout: OpLayout,
    channels: usize,
    buffer: Vec<f32>,
    read_samples: usize,
    written_samples: usize,
    input_changed: bool,
}

impl GraphCache {
    pub fn new(channels: i32) -> Self {
        let channels = channels.max(1) as usize;
        let mut layout = OpLayout::new("Data Buffer");
        for i in 0..channels {
            layout = layout.input_sized(format!("In{i}"), 0.0, 2);
        }
        for i in 0..channels {
            layout = layout.output_sized(format!("Out {i}"), 0.0, 2);
        }
        Self {
            layout,
            channels,
            buffer: Vec::new(),
            read_samples: 0,
            written_samples: 0,
            input_changed: true,
        }
    }

    pub fn written_samples(&self) -> usize {
        self.written_samples
    }

    /// True while the cache window is (re)filling from its inputs.
    pub fn is_filling(&self) -> bool {
        self.input_changed
    }

    pub fn read_samples(&self) -> usize {
        self.read_samples
    }
}

impl Operation for GraphCache {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.read_samples = 0;
        self.written_samples = 0;
        self.input_changed = true;
    }

    fn process(
        &mut self,
        num_samples: usize,
        num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let num_cache_samples = num_cache_samples.max(num_samples);

        if inputs.iter().any(|slot| slot.is_out_of_date()) {
            self.input_changed = true;
            self.written_samples = 0;
            self.read_samples = 0;
        }

        if self.written_samples < num_cache_samples {
            self.input_changed = true;
            if self.buffer.len() < num_cache_samples * self.channels {
                self.buffer.resize(num_cache_samples * self.channels, 0.0);
            }
            let base = self.written_samples * self.channels;
            for (i, slot) in inputs.iter().enumerate().take(self.channels) {
                for (j, value) in slot.stream().take(num_samples).enumerate() {
                    let at = base + j * self.channels + i;
                    if at < self.buffer.len() {
                        self.buffer[at] = value;
                    }
                }
            }
            self.written_samples += num_samples;
        }

        if self.read_samples < num_cache_samples {
            let base = self.read_samples * self.channels;
            for (i, out) in outputs.iter_mut().enumerate().take(self.channels) {
                let frames = out.frames_mut(num_samples);
                for (j, frame) in frames.iter_mut().enumerate() {
                    let at = base + j * self.channels + i;
                    *frame = self.buffer.get(at).copied().unwrap_or(0.0);
                }
            }
            self.read_samples += num_samples;
        }

        if self.written_samples >= num_cache_samples {
            self.input_changed = false;
        }
        if self.read_samples >= num_cache_samples {
            self.read_samples = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_roundtrip_through_in_and_out() {
        let mut data_out = DataOut::new(3);
        let inputs: Vec<InputSlot> = (0..3).map(|i| InputSlot::constant(i as f32, 1)).collect();
        let mut bus_out = vec![OutputSlot::new(0.0, 1, true)];
        data_out.process(4, 4, &inputs, &mut bus_out);
        assert_eq!(&bus_out[0].written()[..6], &[0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);

        let mut data_in = DataIn::new(3);
        let mut bus_slot = InputSlot::constant(0.0, 1);
        bus_slot.set_array(bus_out[0].written());
        let mut lane_outputs: Vec<OutputSlot> =
            (0..3).map(|_| OutputSlot::new(0.0, 1, true)).collect();
        data_in.process(4, 4, &[bus_slot], &mut lane_outputs);
        for (i, out) in lane_outputs.iter().enumerate() {
            assert!(out.written().iter().all(|v| *v == i as f32));
        }
    }

    #[test]
    fn test_graph_cache_fills_then_replays() {
        let mut cache = GraphCache::new(1);
        let inputs = vec![InputSlot::constant(0.5, 2)];
        let mut outputs = vec![OutputSlot::new(0.0, 1, true)];

        // Cache window of 8, fed 4 samples per pass.
        cache.process(4, 8, &inputs, &mut outputs);
        assert_eq!(cache.written_samples(), 4);
        assert_eq!(cache.read_samples(), 4);
        assert!(outputs[0].written().iter().all(|v| *v == 0.5));

        cache.process(4, 8, &inputs, &mut outputs);
        assert_eq!(cache.written_samples(), 8);
        // Fully read: wrapped to the start.
        assert_eq!(cache.read_samples(), 0);

        // Third pass: writes are complete, reads replay from the start.
        cache.process(4, 8, &inputs, &mut outputs);
        assert_eq!(cache.written_samples(), 8);
        assert_eq!(cache.read_samples(), 4);
    }

    #[test]
    fn test_graph_cache_interleaves_channels() {
        let mut cache = GraphCache::new(2);
        let inputs = vec![InputSlot::constant(1.0, 2), InputSlot::constant(2.0, 2)];
        let mut outputs = vec![OutputSlot::new(0.0, 1, true), OutputSlot::new(0.0, 1, true)];
        cache.process(4, 4, &inputs, &mut outputs);
        assert!(outputs[0].written().iter().all(|v| *v == 1.0));
        assert!(outputs[1].written().iter().all(|v| *v == 2.0));
    }
}
