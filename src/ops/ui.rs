//! UI surface operators: widgets pushing values into the graph and chart
//! collectors pulling values out.

use crate::graph::{InputSlot, OpLayout, Operation, OutputSlot};

/// Two-state toggle. The editor writes through [`UiCheckbox::set_state`];
/// otherwise the input channel drives the state.
pub struct UiCheckbox {
    layout: OpLayout,
    state: bool,
    externally_changed: bool,
}

impl UiCheckbox {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("UI Checkbox")
                .input_bounded("In", 0.0, 0.0, 1.0)
                .output("Out"),
            state: false,
            externally_changed: false,
        }
    }

    pub fn state(&self) -> bool {
        self.state
    }

    pub fn set_state(&mut self, state: bool) {
        self.state = state;
        self.externally_changed = true;
    }
}

impl Operation for UiCheckbox {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.state = false;
        self.externally_changed = false;
    }

    fn process(
        &mut self,
        _num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        if self.externally_changed {
            self.externally_changed = false;
        } else {
            self.state = inputs[0].value() != 0.0;
        }
        outputs[0].set_value(if self.state { 1.0 } else { 0.0 });
    }
}

/// Editor slider with a response curve: `out = scale * in^power`.
pub struct UiSlider {
    layout: OpLayout,
    state: f32,
    externally_changed: bool,
}

impl UiSlider {
    pub fn new(min: f32, max: f32, power: f32) -> Self {
        Self {
            layout: OpLayout::new("UI Slider")
                .input_bounded("In", 0.0, min, max)
                .input("Power", power)
                .input("Scale", 1.0)
                .output("Out"),
            state: 0.0,
            externally_changed: false,
        }
    }

    pub fn state(&self) -> f32 {
        self.state
    }

    pub fn set_state(&mut self, state: f32) {
        self.state = state;
        self.externally_changed = true;
    }
}

impl Operation for UiSlider {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.state = 0.0;
        self.externally_changed = false;
    }

    fn process(
        &mut self,
        _num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let value = if self.externally_changed {
            self.externally_changed = false;
            self.state
        } else {
            let value = inputs[0].value();
            self.state = value;
            value
        };
        let power = inputs[1].value();
        let scale = inputs[2].value();
        outputs[0].set_value(scale * value.powf(power));
    }
}

/// Collects `(x, y)` pairs into one interleaved rolling window for a line
/// chart.
pub struct UiChartLine {
    layout: OpLayout,
    window_points: usize,
    cursor: usize,
}

impl UiChartLine {
    pub fn new(window_points: i32) -> Self {
        let window_points = window_points.max(1) as usize;
        Self {
            layout: OpLayout::new("UI Chart Lines")
                .input("x", 0.0)
                .input("y", 0.0)
                .output_sized("Lines", 0.0, window_points * 2),
            window_points,
            cursor: 0,
        }
    }
}

impl Operation for UiChartLine {
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
        let window = outputs[0].frames_mut(self.window_points * 2);
        let mut xs = inputs[0].stream();
        let mut ys = inputs[1].stream();
        for _ in 0..num_samples {
            window[self.cursor * 2] = xs.next().unwrap_or(0.0);
            window[self.cursor * 2 + 1] = ys.next().unwrap_or(0.0);
            self.cursor = (self.cursor + 1) % self.window_points;
        }
    }
}

/// Collects candles into one interleaved rolling window of
/// `[unixtime, open, close, high, low, volume]` entries.
pub struct UiCandleSticks {
    layout: OpLayout,
    window_candles: usize,
    cursor: usize,
}

impl UiCandleSticks {
    pub const STRIDE: usize = 6;

    pub fn new(window_candles: i32) -> Self {
        let window_candles = window_candles.max(1) as usize;
        Self {
            layout: OpLayout::new("UI Candle Sticks")
                .input("unixtime", 0.0)
                .input("open", 0.0)
                .input("close", 0.0)
                .input("high", 0.0)
                .input("low", 0.0)
                .input("volume", 0.0)
                .output_sized("Candles", 0.0, window_candles * Self::STRIDE),
            window_candles,
            cursor: 0,
        }
    }
}

impl Operation for UiCandleSticks {
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
        let window = outputs[0].frames_mut(self.window_candles * Self::STRIDE);
        let mut streams: Vec<_> = inputs.iter().take(Self::STRIDE).map(|s| s.stream()).collect();
        for _ in 0..num_samples {
            let base = self.cursor * Self::STRIDE;
            for (lane, stream) in streams.iter_mut().enumerate() {
                window[base + lane] = stream.next().unwrap_or(0.0);
            }
            self.cursor = (self.cursor + 1) % self.window_candles;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkbox_follows_input_until_externally_set() {
        let mut op = UiCheckbox::new();
        let inputs = vec![InputSlot::constant(1.0, 1)];
        let mut outputs = vec![OutputSlot::new(0.0, 1, true)];
        op.process(1, 1, &inputs, &mut outputs);
        assert!(op.state());
        assert_eq!(outputs[0].value(), 1.0);

        op.set_state(false);
        op.process(1, 1, &inputs, &mut outputs);
        assert_eq!(outputs[0].value(), 0.0);
        // Editor write only sticks for one pass; the input takes over again.
        op.process(1, 1, &inputs, &mut outputs);
        assert_eq!(outputs[0].value(), 1.0);
    }

    #[test]
    fn test_slider_applies_power_and_scale() {
        let mut op = UiSlider::new(0.0, 1.0, 2.0);
        let inputs = vec![
            InputSlot::constant(0.5, 1),
            InputSlot::constant(2.0, 1),
            InputSlot::constant(4.0, 1),
        ];
        let mut outputs = vec![OutputSlot::new(0.0, 1, true)];
        op.process(1, 1, &inputs, &mut outputs);
        assert!((outputs[0].value() - 1.0).abs() < 1e-6); // 4 * 0.5^2
    }

    #[test]
    fn test_chart_line_interleaves_pairs() {
        let mut op = UiChartLine::new(4);
        let inputs = vec![InputSlot::constant(1.0, 1), InputSlot::constant(2.0, 1)];
        let mut outputs = vec![OutputSlot::new(0.0, 8, true)];
        op.process(4, 4, &inputs, &mut outputs);
        let window = outputs[0].written();
        assert_eq!(window.len(), 8);
        assert!(window.chunks(2).all(|pair| pair == [1.0, 2.0]));
    }
}
