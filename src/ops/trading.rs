//! Trading operators: candle data ingestion, trend/reversal detectors,
//! gating filters and indicators.
//!
//! Candle buses are interleaved with stride 9 per candle:
//! `[unixtime, open, close, high, low, volume, quantity, buy volume,
//! buy quantity]`. Sell volume and sell quantity are derived on read.

use crate::graph::{InputSlot, OpLayout, Operation, OutputSlot};
use crate::util::string_id;

/// Candle interval choices in minutes, selected by index.
const INTERVALS: [i32; 10] = [1, 5, 15, 30, 60, 120, 240, 720, 1440, 10080];

pub const CANDLE_STRIDE: usize = 9;

/// Capacity of the symbol/base text inputs.
const SYMBOL_CAPACITY: usize = 16;

/// Plain or Heikin-Ashi candle streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleMode {
    Ohlcv,
    HeikinAshi,
}

/// Streams candles from an interleaved bus input across passes. Each pass
/// emits `num_samples` candles on the stream outputs until the written data
/// is exhausted, then wraps to replay; new input data restarts the read
/// position. A candle whose timestamp does not land one interval after its
/// predecessor gets a zeroed timestamp so downstream charting can spot the
/// gap.
pub struct OhlcvDataIn {
    layout: OpLayout,
    mode: CandleMode,
    read_samples: usize,
    input_changed: bool,
    last_change: u32,
    unixtime_prev: i32,
    ha_open_prev: f32,
    ha_close_prev: f32,
    symbol: String,
    base: String,
}

impl OhlcvDataIn {
    pub fn new(mode: CandleMode) -> Self {
        let name = match mode {
            CandleMode::Ohlcv => "OCHLV Data In",
            CandleMode::HeikinAshi => "OCHLV Heikin-Ashi In",
        };
        Self {
            layout: OpLayout::new(name)
                .array("In", 0.0, 2)
                .hidden()
                .text("Symbol", SYMBOL_CAPACITY)
                .text("Base", SYMBOL_CAPACITY)
                .input_bounded("Index", 2.0, 0.0, 10.0)
                .output("Symbol Id")
                .output("Base Id")
                .output("Interval Min")
                .output_sized("Unixtime", 0.0, 2)
                .output_sized("Open", 0.0, 2)
                .output_sized("Close", 0.0, 2)
                .output_sized("High", 0.0, 2)
                .output_sized("Low", 0.0, 2)
                .output_sized("Volume", 0.0, 2)
                .output_sized("Quantity", 0.0, 2)
                .output_sized("Buy Volume", 0.0, 2)
                .output_sized("Sell Volume", 0.0, 2)
                .output_sized("Buy Quantity", 0.0, 2)
                .output_sized("Sell Quantity", 0.0, 2),
            mode,
            read_samples: 0,
            input_changed: true,
            last_change: 0,
            unixtime_prev: 0,
            ha_open_prev: 0.0,
            ha_close_prev: 0.0,
            symbol: String::new(),
            base: String::new(),
        }
    }

    /// Symbol text of the most recent header update.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Base currency text of the most recent header update.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn samples_left(&self, inputs: &[InputSlot]) -> usize {
        let written = inputs[0].array().len() / CANDLE_STRIDE;
        written.saturating_sub(self.read_samples)
    }
}

impl Operation for OhlcvDataIn {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.read_samples = 0;
        self.input_changed = true;
        self.unixtime_prev = 0;
        self.ha_open_prev = 0.0;
        self.ha_close_prev = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let change = inputs[0]
            .change_count()
            .wrapping_add(inputs[1].change_count())
            .wrapping_add(inputs[2].change_count());
        if inputs[0].is_out_of_date() || change != self.last_change {
            self.last_change = change;
            self.input_changed = true;
            self.read_samples = 0;
            self.unixtime_prev = 0;
        }

        if self.input_changed {
            self.symbol = inputs[1].text().to_string();
            self.base = inputs[2].text().to_string();
            let interval_index = inputs[3].value().clamp(0.0, 9.0) as usize;
            outputs[0].set_value(string_id(&self.symbol) as f32);
            outputs[1].set_value(string_id(&self.base) as f32);
            outputs[2].set_value(INTERVALS[interval_index].max(1) as f32);
        }

        let bus = inputs[0].array();
        let written = bus.len() / CANDLE_STRIDE;
        let interval_minutes = (outputs[2].value() + 0.5) as i32;

        if self.read_samples < written {
            let mut frames: Vec<&mut [f32]> = outputs[3..]
                .iter_mut()
                .map(|out| out.frames_mut(num_samples))
                .collect();

            for j in 0..num_samples {
                let candle = self.read_samples + j;
                let at = |lane: usize| -> f32 {
                    if candle < written {
                        bus[candle * CANDLE_STRIDE + lane]
                    } else {
                        0.0
                    }
                };

                // Continuity check: a candle off the expected interval
                // boundary reports timestamp zero.
                let mut unixtime = at(0) as i32;
                if self.unixtime_prev == 0 {
                    self.unixtime_prev = unixtime;
                } else if unixtime != self.unixtime_prev + interval_minutes * 60 {
                    unixtime = 0;
                } else {
                    self.unixtime_prev = unixtime;
                }
                frames[0][j] = unixtime as f32;

                let o = at(1);
                let c = at(2);
                let h = at(3);
                let l = at(4);
                let (open, close, high, low) = match self.mode {
                    CandleMode::Ohlcv => (o, c, h, l),
                    CandleMode::HeikinAshi => {
                        let close = 0.25 * (o + c + h + l);
                        let open = 0.5 * (self.ha_open_prev + self.ha_close_prev);
                        let high = h.max(close).max(open);
                        let low = l.min(close).min(open);
                        self.ha_open_prev = open;
                        self.ha_close_prev = close;
                        (open, close, high, low)
                    }
                };
                let volume = at(5);
                let quantity = at(6);
                let buy_volume = at(7);
                let buy_quantity = at(8);

                frames[1][j] = open;
                frames[2][j] = close;
                frames[3][j] = high;
                frames[4][j] = low;
                frames[5][j] = volume;
                frames[6][j] = quantity;
                frames[7][j] = buy_volume;
                frames[8][j] = volume - buy_volume;
                frames[9][j] = buy_quantity;
                frames[10][j] = quantity - buy_quantity;
            }
            self.read_samples += num_samples;
        }

        if self.read_samples >= written {
            self.input_changed = false;
            self.read_samples = 0;
            self.unixtime_prev = 0;
        }
    }
}

/// Terminal node for a strategy's order stream: forwards the signal so an
/// external trade router can poll it.
pub struct PlaceTrade {
    layout: OpLayout,
}

impl PlaceTrade {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Place Trade")
                .input("Signal", 0.0)
                .output("Signal"),
        }
    }
}

impl Operation for PlaceTrade {
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
        let out = outputs[0].frames_mut(num_samples);
        for (frame, value) in out.iter_mut().zip(inputs[0].stream()) {
            *frame = value;
        }
    }
}

// --- detector kernels -------------------------------------------------------

/// Trend vote from the last three tips, weighted toward the most recent
/// comparison.
#[derive(Default)]
struct TrendDetectorBasic {
    prev1: f32,
    prev2: f32,
    prev3: f32,
}

impl TrendDetectorBasic {
    fn process(&mut self, input: f32) -> f32 {
        let bullish_tip = input > self.prev1;
        let bullish_tip_twice = input > self.prev2;
        let bullish_tip_thrice = input > self.prev3;

        self.prev3 = self.prev2;
        self.prev2 = self.prev1;
        self.prev1 = input;

        (if bullish_tip_thrice { 0.3 } else { -0.3 })
            + (if bullish_tip_twice { 0.35 } else { -0.35 })
            + (if bullish_tip { 0.45 } else { -0.45 })
    }
}

/// Level vote against a recency-weighted mean: newer history weighs more,
/// the incoming sample most of all.
#[derive(Default)]
struct TrendDetectorMean {
    history: Vec<f32>,
}

impl TrendDetectorMean {
    fn process(&mut self, input: f32, num_samples: usize) -> f32 {
        let num_samples = num_samples.max(1);
        if self.history.len() != num_samples {
            self.history.resize(num_samples, 0.0);
        }

        let factor = 1.0 / (self.history.len() + 1) as f32;
        let mut acc = factor;
        let mut mean = 0.0;
        for value in &self.history {
            mean += value * acc;
            acc += factor;
        }
        mean += input;
        mean *= factor;

        let bullish_level = input > mean;

        self.history.remove(0);
        self.history.push(input);

        if bullish_level {
            1.0
        } else {
            -1.0
        }
    }
}

/// Reversal score from the last four differences: +1 per consecutive troph
/// step, -1 per consecutive peak step, scaled to roughly [-1, 1].
#[derive(Default)]
struct ReversalDetector4x {
    prev1: f32,
    prev2: f32,
    prev3: f32,
    prev4: f32,
}

impl ReversalDetector4x {
    fn process(&mut self, input: f32) -> f32 {
        let diff01 = input - self.prev1;
        let diff12 = self.prev1 - self.prev2;
        let diff23 = self.prev2 - self.prev3;
        let diff34 = self.prev3 - self.prev4;

        let troph1 = diff01 > 0.0 && diff12 < 0.0;
        let troph2 = troph1 && diff23 < 0.0;
        let troph3 = troph2 && diff34 < 0.0;
        let peak1 = diff01 < 0.0 && diff12 > 0.0;
        let peak2 = peak1 && diff23 > 0.0;
        let peak3 = peak2 && diff34 > 0.0;

        let troph = troph1 as i32 + troph2 as i32 + troph3 as i32;
        let peak = peak1 as i32 + peak2 as i32 + peak3 as i32;

        self.prev4 = self.prev3;
        self.prev3 = self.prev2;
        self.prev2 = self.prev1;
        self.prev1 = input;

        (troph - peak) as f32 * 0.33
    }
}

/// Acceleration score: counts how many consecutive differences are growing
/// (bullish) or shrinking (bearish).
#[derive(Default)]
struct AccelerationDetector {
    prev1: f32,
    prev2: f32,
    prev3: f32,
    prev4: f32,
}

impl AccelerationDetector {
    fn process(&mut self, input: f32) -> f32 {
        let diff01 = input - self.prev1;
        let diff12 = self.prev1 - self.prev2;
        let diff23 = self.prev2 - self.prev3;
        let diff34 = self.prev3 - self.prev4;

        let bullish1 = diff01 > 0.0 && diff01 > diff12;
        let bullish2 = bullish1 && diff12 > diff23;
        let bullish3 = bullish2 && diff23 > diff34;
        let bearish1 = diff01 < 0.0 && diff01 < diff12;
        let bearish2 = bearish1 && diff12 < diff23;
        let bearish3 = bearish2 && diff23 < diff34;

        let bullish = bullish1 as i32 + bullish2 as i32 + bullish3 as i32;
        let bearish = bearish1 as i32 + bearish2 as i32 + bearish3 as i32;

        self.prev4 = self.prev3;
        self.prev3 = self.prev2;
        self.prev2 = self.prev1;
        self.prev1 = input;

        (bullish - bearish) as f32 * 0.33
    }
}

/// All four trend kernels over one signal, each on its own output. The Sum
/// channel is reserved for combined scoring.
pub struct DetectorTrend {
    layout: OpLayout,
    trend_basic: TrendDetectorBasic,
    trend_mean: TrendDetectorMean,
    reversal: ReversalDetector4x,
    acceleration: AccelerationDetector,
}

impl DetectorTrend {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Trend Detector")
                .input("In", 0.0)
                .hidden()
                .input_bounded("Trend Samples", 6.0, 1.0, 50.0)
                .hidden()
                .output("Trend Basic")
                .output("Trend Mean")
                .output("Reversal")
                .output("Accel")
                .output("Sum"),
            trend_basic: TrendDetectorBasic::default(),
            trend_mean: TrendDetectorMean::default(),
            reversal: ReversalDetector4x::default(),
            acceleration: AccelerationDetector::default(),
        }
    }
}

impl Operation for DetectorTrend {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.trend_basic = TrendDetectorBasic::default();
        self.trend_mean = TrendDetectorMean::default();
        self.reversal = ReversalDetector4x::default();
        self.acceleration = AccelerationDetector::default();
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let trend_samples = inputs[1].value().max(1.0) as usize;
        let (o_basic, rest) = outputs.split_at_mut(1);
        let (o_mean, rest) = rest.split_at_mut(1);
        let (o_reversal, o_accel) = rest.split_at_mut(1);
        let basic_out = o_basic[0].frames_mut(num_samples);
        let mean_out = o_mean[0].frames_mut(num_samples);
        let reversal_out = o_reversal[0].frames_mut(num_samples);
        let accel_out = o_accel[0].frames_mut(num_samples);

        for (i, value) in inputs[0].stream().take(num_samples).enumerate() {
            basic_out[i] = self.trend_basic.process(value);
            mean_out[i] = self.trend_mean.process(value, trend_samples);
            reversal_out[i] = self.reversal.process(value);
            accel_out[i] = self.acceleration.process(value);
        }
    }
}

/// Trend, reversal and acceleration of the difference between a hifi and a
/// lofi rendering of the same series.
pub struct DetectorTrendDiff {
    layout: OpLayout,
    trend: TrendDetectorBasic,
    reversal: ReversalDetector4x,
    acceleration: AccelerationDetector,
}

impl DetectorTrendDiff {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Trend Difference Detector")
                .input("In 1", 0.0)
                .hidden()
                .input("In 2", 0.0)
                .hidden()
                .input_bounded("Trend Samples", 6.0, 1.0, 50.0)
                .hidden()
                .output("Trend")
                .output("Reversal")
                .output("Accel")
                .output("Sum"),
            trend: TrendDetectorBasic::default(),
            reversal: ReversalDetector4x::default(),
            acceleration: AccelerationDetector::default(),
        }
    }
}

impl Operation for DetectorTrendDiff {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.trend = TrendDetectorBasic::default();
        self.reversal = ReversalDetector4x::default();
        self.acceleration = AccelerationDetector::default();
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let (o_trend, rest) = outputs.split_at_mut(1);
        let (o_reversal, o_accel) = rest.split_at_mut(1);
        let trend_out = o_trend[0].frames_mut(num_samples);
        let reversal_out = o_reversal[0].frames_mut(num_samples);
        let accel_out = o_accel[0].frames_mut(num_samples);

        let mut hifi = inputs[0].stream();
        let mut lofi = inputs[1].stream();
        for i in 0..num_samples {
            let diff = hifi.next().unwrap_or(0.0) - lofi.next().unwrap_or(0.0);
            trend_out[i] = self.trend.process(diff);
            reversal_out[i] = self.reversal.process(diff);
            accel_out[i] = self.acceleration.process(diff);
        }
    }
}

/// Hysteresis gate over a signed signal with hold-off counters for both
/// directions. The trigger output pulses once the hold delay elapses.
pub struct FilterFlipGate {
    layout: OpLayout,
    gate: bool,
    pos_hold: i32,
    neg_hold: i32,
}

impl FilterFlipGate {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Flip Gate")
                .input("In", 0.0)
                .input_bounded("Pos Max Hold", 0.0, 0.0, f32::MAX)
                .input_bounded("Neg Max Hold", 0.0, 0.0, f32::MAX)
                .output("Gate Hold")
                .output("Gate"),
            gate: false,
            pos_hold: 0,
            neg_hold: 0,
        }
    }
}

impl Operation for FilterFlipGate {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.gate = false;
        self.pos_hold = 0;
        self.neg_hold = 0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let pos_delay = inputs[1].value() as i32;
        let neg_delay = inputs[2].value() as i32;
        let (o_trig, o_gate) = outputs.split_at_mut(1);
        let trig_out = o_trig[0].frames_mut(num_samples);
        let gate_out = o_gate[0].frames_mut(num_samples);
        for (i, value) in inputs[0].stream().take(num_samples).enumerate() {
            let pos = value > 0.01;
            let neg = value < -0.01;
            if self.gate && neg {
                self.gate = false;
                self.neg_hold = 0;
            }
            if !self.gate && pos {
                self.gate = true;
                self.pos_hold = 0;
            }
            let signal = |on: bool| if on { 1.0 } else { -1.0 };
            if self.gate {
                trig_out[i] = signal(self.pos_hold == pos_delay);
                self.pos_hold += 1;
            } else {
                trig_out[i] = signal(self.neg_hold == neg_delay);
                self.neg_hold += 1;
            }
            gate_out[i] = signal(self.gate);
        }
    }
}

/// Statistics over the most recent sign pulses of the input: mean and max
/// run lengths for both polarities.
pub struct FilterPulseInfo {
    layout: OpLayout,
    pos_runs: Vec<f32>,
    neg_runs: Vec<f32>,
    prev: f32,
}

impl FilterPulseInfo {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Flip Info")
                .input("In", 0.0)
                .input_bounded("Max Flips in info", 5.0, 1.0, 100000.0)
                .input_bounded("Pulse", 0.5, 0.0, 1.0)
                .output("mean+")
                .output("mean-")
                .output("max+")
                .output("max-"),
            pos_runs: Vec::new(),
            neg_runs: Vec::new(),
            prev: 0.0,
        }
    }
}

impl Operation for FilterPulseInfo {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.pos_runs.clear();
        self.neg_runs.clear();
        self.prev = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let max_flips = (inputs[1].value().round() as usize).max(1);
        if self.pos_runs.is_empty() {
            self.pos_runs.push(0.0);
        }
        if self.neg_runs.is_empty() {
            self.neg_runs.push(0.0);
        }

        let (o_mean_pos, rest) = outputs.split_at_mut(1);
        let (o_mean_neg, rest) = rest.split_at_mut(1);
        let (o_max_pos, o_max_neg) = rest.split_at_mut(1);
        let mean_pos_out = o_mean_pos[0].frames_mut(num_samples);
        let mean_neg_out = o_mean_neg[0].frames_mut(num_samples);
        let max_pos_out = o_max_pos[0].frames_mut(num_samples);
        let max_neg_out = o_max_neg[0].frames_mut(num_samples);

        for (i, value) in inputs[0].stream().take(num_samples).enumerate() {
            let reversal = (value > 0.0) != (self.prev > 0.0);
            if reversal && value > 0.0 {
                self.pos_runs.push(0.0);
                while self.pos_runs.len() > max_flips {
                    self.pos_runs.remove(0);
                }
            } else if reversal && value < 0.0 {
                self.neg_runs.push(0.0);
                while self.neg_runs.len() > max_flips {
                    self.neg_runs.remove(0);
                }
            }
            if value > 0.0 {
                *self.pos_runs.last_mut().unwrap() += 1.0;
            } else {
                *self.neg_runs.last_mut().unwrap() += 1.0;
            }
            self.prev = value;

            let stats = |runs: &[f32]| {
                let mut max = 0.0f32;
                let mut sum = 0.0f32;
                for run in runs {
                    max = max.max(*run);
                    sum += run;
                }
                (sum / max_flips as f32, max)
            };
            let (mean_pos, max_pos) = stats(&self.pos_runs);
            let (mean_neg, max_neg) = stats(&self.neg_runs);
            mean_pos_out[i] = mean_pos;
            mean_neg_out[i] = mean_neg;
            max_pos_out[i] = max_pos;
            max_neg_out[i] = max_neg;
        }
    }
}

/// Volume weighted moving average over a fractional kernel width. The
/// balance input tilts the kernel toward recent samples; the fractional
/// part of the width blends in a fraction of the oldest sample so the
/// effective window moves smoothly as the width changes.
pub struct FilterVwma {
    layout: OpLayout,
    values: Vec<f32>,
    weights: Vec<f32>,
    index: usize,
    width: usize,
    initialized: bool,
}

impl FilterVwma {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("Volume Weighted Moving Average")
                .input("In", 0.0)
                .input("Weight", 1.0)
                .input_bounded("Width", 10.0, 1.0, 10000.0)
                .input_bounded("Balance", 0.0, 0.0, 1.0)
                .output("Out"),
            values: Vec::new(),
            weights: Vec::new(),
            index: 0,
            width: 0,
            initialized: false,
        }
    }
}

impl Operation for FilterVwma {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.values.clear();
        self.weights.clear();
        self.index = 0;
        self.width = 0;
        self.initialized = false;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let width = inputs[2].value().max(1.0);
        let balance = inputs[3].value();
        // The buffer holds one sample more than the truncated width so the
        // fractional tail can smooth on the oldest one.
        let width_int = 1 + width as usize;
        let width_frac = width - width.floor();

        let out = outputs[0].frames_mut(num_samples);
        let mut value_in = inputs[0].stream();
        let mut weight_in = inputs[1].stream();
        for frame in out.iter_mut() {
            let value = value_in.next().unwrap_or(0.0);
            let weight = weight_in.next().unwrap_or(1.0);

            if !self.initialized || self.width != width_int {
                self.width = width_int;
                self.initialized = true;
                self.index = 0;
                self.values.clear();
                self.values.resize(width_int, value);
                self.weights.clear();
                self.weights.resize(width_int, weight);
            }

            self.values[self.index] = value;
            self.weights[self.index] = weight;
            self.index = (self.index + 1) % width_int;

            let mut balance_factor = 1.0 - balance;
            let balance_delta = balance / width;
            // Remove the part of the oldest sample that falls outside the
            // fractional window.
            let partial = (balance_delta - balance_factor) * width_frac;
            let mut out_val = self.weights[self.index] * self.values[self.index] * partial;
            let mut divisor = partial;
            for j in self.index..width_int {
                out_val += self.weights[j] * self.values[j] * balance_factor;
                divisor += self.weights[j] * balance_factor;
                balance_factor += balance_delta;
            }
            for j in 0..self.index {
                out_val += self.weights[j] * self.values[j] * balance_factor;
                divisor += self.weights[j] * balance_factor;
                balance_factor += balance_delta;
            }

            let signal = out_val / divisor;
            *frame = if signal.is_finite() { signal } else { 0.0 };
        }
    }
}

/// On-balance volume: cumulative volume signed by the close direction.
pub struct IndicatorObv {
    layout: OpLayout,
    obv: f32,
    prev_close: f32,
    normalize: bool,
    volume_mean: f32,
}

impl IndicatorObv {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("OBV Indicator")
                .input("Close", 0.0)
                .input("Volume", 0.0)
                .output("OBV"),
            obv: 0.0,
            prev_close: 0.0,
            normalize: false,
            volume_mean: 0.0,
        }
    }

    /// Variant that normalizes each volume against its running mean.
    pub fn normalized() -> Self {
        let mut op = Self::new();
        op.layout.name = "OBV2 Indicator".to_string();
        op.layout.type_name = "OBV2 Indicator".to_string();
        op.normalize = true;
        op
    }
}

impl Operation for IndicatorObv {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.obv = 0.0;
        self.prev_close = 0.0;
        self.volume_mean = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let out = outputs[0].frames_mut(num_samples);
        let mut close_in = inputs[0].stream();
        let mut volume_in = inputs[1].stream();
        for frame in out.iter_mut() {
            let close = close_in.next().unwrap_or(0.0);
            let mut volume = volume_in.next().unwrap_or(0.0);
            if self.normalize {
                self.volume_mean += 0.05 * (volume - self.volume_mean);
                if self.volume_mean.abs() > 1e-12 {
                    volume /= self.volume_mean;
                }
            }
            if close > self.prev_close {
                self.obv += volume;
            } else if close < self.prev_close {
                self.obv -= volume;
            }
            self.prev_close = close;
            *frame = self.obv;
        }
    }
}

/// Volume-price trend: like OBV but scaled by the relative close change.
pub struct IndicatorVpt {
    layout: OpLayout,
    vpt: f32,
    prev_close: f32,
}

impl IndicatorVpt {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("VPT Indicator")
                .input("Close", 0.0)
                .input("Volume", 0.0)
                .output("VPT"),
            vpt: 0.0,
            prev_close: 0.0,
        }
    }
}

impl Operation for IndicatorVpt {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.vpt = 0.0;
        self.prev_close = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let out = outputs[0].frames_mut(num_samples);
        let mut close_in = inputs[0].stream();
        let mut volume_in = inputs[1].stream();
        for frame in out.iter_mut() {
            let close = close_in.next().unwrap_or(0.0);
            let volume = volume_in.next().unwrap_or(0.0);
            if self.prev_close.abs() > 1e-12 {
                self.vpt += volume * (close - self.prev_close) / self.prev_close;
            }
            self.prev_close = close;
            *frame = self.vpt;
        }
    }
}

/// Gated accumulation: integrates the input while the gate is open, decaying
/// otherwise.
pub struct IndicatorGa {
    layout: OpLayout,
    acc: f32,
}

impl IndicatorGa {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("GA Indicator")
                .input("In", 0.0)
                .input("Gate", 0.0)
                .input_bounded("Decay", 0.01, 0.0, 1.0)
                .output("GA"),
            acc: 0.0,
        }
    }
}

impl Operation for IndicatorGa {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.acc = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let decay = inputs[2].value();
        let out = outputs[0].frames_mut(num_samples);
        let mut value_in = inputs[0].stream();
        let mut gate_in = inputs[1].stream();
        for frame in out.iter_mut() {
            let value = value_in.next().unwrap_or(0.0);
            let gate = gate_in.next().unwrap_or(0.0);
            if gate > 0.0 {
                self.acc += value;
            } else {
                self.acc -= decay * self.acc;
            }
            *frame = self.acc;
        }
    }
}

/// Volume-weighted relative strength index over a rolling window.
pub struct IndicatorVrsi {
    layout: OpLayout,
    gains: f32,
    losses: f32,
    prev_close: f32,
}

impl IndicatorVrsi {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("VRSI Indicator")
                .input("Close", 0.0)
                .input("Volume", 0.0)
                .input_bounded("Window", 14.0, 1.0, 1000.0)
                .output("VRSI"),
            gains: 0.0,
            losses: 0.0,
            prev_close: 0.0,
        }
    }
}

impl Operation for IndicatorVrsi {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.gains = 0.0;
        self.losses = 0.0;
        self.prev_close = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let window = inputs[2].value().max(1.0);
        let alpha = 1.0 / window;
        let out = outputs[0].frames_mut(num_samples);
        let mut close_in = inputs[0].stream();
        let mut volume_in = inputs[1].stream();
        for frame in out.iter_mut() {
            let close = close_in.next().unwrap_or(0.0);
            let volume = volume_in.next().unwrap_or(0.0);
            let change = (close - self.prev_close) * volume;
            self.prev_close = close;
            self.gains += alpha * (change.max(0.0) - self.gains);
            self.losses += alpha * ((-change).max(0.0) - self.losses);
            *frame = if self.gains + self.losses > 1e-12 {
                100.0 * self.gains / (self.gains + self.losses)
            } else {
                50.0
            };
        }
    }
}

/// Average true range over an exponentially weighted window.
pub struct IndicatorAtr {
    layout: OpLayout,
    atr: f32,
    prev_close: f32,
}

impl IndicatorAtr {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("ATR Indicator")
                .input("High", 0.0)
                .input("Low", 0.0)
                .input("Close", 0.0)
                .input_bounded("Window", 14.0, 1.0, 1000.0)
                .output("ATR"),
            atr: 0.0,
            prev_close: 0.0,
        }
    }
}

impl Operation for IndicatorAtr {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.atr = 0.0;
        self.prev_close = 0.0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let window = inputs[3].value().max(1.0);
        let alpha = 1.0 / window;
        let out = outputs[0].frames_mut(num_samples);
        let mut high_in = inputs[0].stream();
        let mut low_in = inputs[1].stream();
        let mut close_in = inputs[2].stream();
        for frame in out.iter_mut() {
            let high = high_in.next().unwrap_or(0.0);
            let low = low_in.next().unwrap_or(0.0);
            let close = close_in.next().unwrap_or(0.0);
            let tr = (high - low)
                .max((high - self.prev_close).abs())
                .max((low - self.prev_close).abs());
            self.prev_close = close;
            self.atr += alpha * (tr - self.atr);
            *frame = self.atr;
        }
    }
}

/// Rolling standard deviation.
pub struct IndicatorSd {
    layout: OpLayout,
    history: Vec<f32>,
    index: usize,
    filled: usize,
}

impl IndicatorSd {
    pub fn new() -> Self {
        Self {
            layout: OpLayout::new("SD Indicator")
                .input("In", 0.0)
                .input_bounded("Window", 20.0, 2.0, 1000.0)
                .output("SD"),
            history: Vec::new(),
            index: 0,
            filled: 0,
        }
    }
}

impl Operation for IndicatorSd {
    fn layout(&self) -> &OpLayout {
        &self.layout
    }

    fn reset(&mut self) {
        self.history.clear();
        self.index = 0;
        self.filled = 0;
    }

    fn process(
        &mut self,
        num_samples: usize,
        _num_cache_samples: usize,
        inputs: &[InputSlot],
        outputs: &mut [OutputSlot],
    ) {
        let window = inputs[1].value().max(2.0) as usize;
        if self.history.len() != window {
            self.history.clear();
            self.history.resize(window, 0.0);
            self.index = 0;
            self.filled = 0;
        }
        let out = outputs[0].frames_mut(num_samples);
        for (frame, value) in out.iter_mut().zip(inputs[0].stream()) {
            self.history[self.index] = value;
            self.index = (self.index + 1) % window;
            self.filled = (self.filled + 1).min(window);
            let n = self.filled as f32;
            let mean: f32 = self.history[..self.filled].iter().sum::<f32>() / n;
            let var: f32 = self.history[..self.filled]
                .iter()
                .map(|v| (v - mean) * (v - mean))
                .sum::<f32>()
                / n;
            *frame = var.sqrt();
        }
    }
}
