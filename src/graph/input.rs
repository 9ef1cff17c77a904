//! Input slots for graph nodes.
//!
//! An input is a sum type: an inline constant (scalar or fixed-size array), a
//! text buffer, a link to another node's output channel, a shared external
//! buffer, or a resizable float array. Every read goes through the slot's
//! bound; link and external windows are staged by the graph before the owning
//! node's operation runs, and slots marked for running-weighted-average
//! iteration are smoothed during staging.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::audio::FilterRwa;
use crate::graph::node::NodeId;

/// Externally owned float data shared into the graph. The graph only reads it.
pub type SharedBuffer = Arc<RwLock<Vec<f32>>>;

/// Bound applied to every read from an input slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InputBound {
    Unbounded,
    ZeroToOne,
    MinusOneToOne,
    ZeroToHundred,
    ZeroToTwo,
    Custom(f32, f32),
}

impl Default for InputBound {
    fn default() -> Self {
        InputBound::Unbounded
    }
}

impl InputBound {
    /// Build a bound from an explicit `[min, max]` range, collapsing the
    /// well-known ranges onto their named variants.
    pub fn from_range(min: f32, max: f32) -> Self {
        if min == f32::MIN && max == f32::MAX {
            InputBound::Unbounded
        } else if min == 0.0 && max == 1.0 {
            InputBound::ZeroToOne
        } else if min == -1.0 && max == 1.0 {
            InputBound::MinusOneToOne
        } else if min == 0.0 && max == 100.0 {
            InputBound::ZeroToHundred
        } else if min == 0.0 && max == 2.0 {
            InputBound::ZeroToTwo
        } else {
            InputBound::Custom(min, max)
        }
    }

    pub fn apply(&self, value: f32) -> f32 {
        match *self {
            InputBound::Unbounded => value,
            InputBound::ZeroToOne => value.clamp(0.0, 1.0),
            InputBound::MinusOneToOne => value.clamp(-1.0, 1.0),
            InputBound::ZeroToHundred => value.clamp(0.0, 100.0),
            InputBound::ZeroToTwo => value.clamp(0.0, 2.0),
            InputBound::Custom(min, max) => value.clamp(min, max),
        }
    }
}

/// Static metadata for an input slot, fixed by the operation layout.
#[derive(Debug, Clone, Copy)]
pub struct InputFlags {
    pub visible: bool,
    pub editable: bool,
    pub constant: bool,
    pub text: bool,
    pub array: bool,
}

impl Default for InputFlags {
    fn default() -> Self {
        Self {
            visible: true,
            editable: true,
            constant: false,
            text: false,
            array: false,
        }
    }
}

/// How an operation reads per-frame values from a slot: raw per-frame samples
/// or samples smoothed with a running weighted average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IterationPolicy {
    #[default]
    Sampled,
    SampledRwa,
}

/// The polymorphic payload of an input slot.
pub enum InputSource {
    /// Scalar or fixed-size float array owned inline.
    Constant(Vec<f32>),
    /// Fixed-capacity text buffer, e.g. a symbol name.
    Text { text: String, capacity: usize },
    /// Pull from another node's output channel.
    Link { source: NodeId, channel: u8 },
    /// Non-owning view of externally managed floats.
    External(SharedBuffer),
    /// Dynamically sized float buffer.
    Array(Vec<f32>),
}

/// One input channel of a node.
pub struct InputSlot {
    source: InputSource,
    bound: InputBound,
    flags: InputFlags,
    policy: IterationPolicy,
    /// Default used when a broken wire reverts the slot to a constant.
    default_value: f32,
    min_size: usize,
    change_count: u32,
    /// Window staged by the graph before the operation runs (links, external
    /// buffers and RWA-smoothed slots).
    staged: Vec<f32>,
    /// True when the staged link's source node changed since the owning node
    /// last processed.
    source_out_of_date: bool,
    rwa: FilterRwa,
}

impl InputSlot {
    pub fn new(
        source: InputSource,
        bound: InputBound,
        flags: InputFlags,
        policy: IterationPolicy,
        default_value: f32,
        min_size: usize,
    ) -> Self {
        Self {
            source,
            bound,
            flags,
            policy,
            default_value,
            min_size: min_size.max(1),
            change_count: 0,
            staged: Vec::new(),
            source_out_of_date: false,
            rwa: FilterRwa::new(),
        }
    }

    pub fn constant(value: f32, min_size: usize) -> Self {
        Self::new(
            InputSource::Constant(vec![value; min_size.max(1)]),
            InputBound::Unbounded,
            InputFlags::default(),
            IterationPolicy::Sampled,
            value,
            min_size,
        )
    }

    pub fn source(&self) -> &InputSource {
        &self.source
    }

    pub fn bound(&self) -> InputBound {
        self.bound
    }

    pub fn flags(&self) -> InputFlags {
        self.flags
    }

    pub fn policy(&self) -> IterationPolicy {
        self.policy
    }

    pub fn change_count(&self) -> u32 {
        self.change_count
    }

    pub fn default_value(&self) -> f32 {
        self.default_value
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// True when the slot pulls from `source`'s outputs.
    pub fn links_to(&self, source: NodeId) -> bool {
        matches!(self.source, InputSource::Link { source: s, .. } if s == source)
    }

    pub fn link(&self) -> Option<(NodeId, u8)> {
        match self.source {
            InputSource::Link { source, channel } => Some((source, channel)),
            _ => None,
        }
    }

    /// True when the staged link source reported newer data than the owning
    /// node has processed.
    pub fn is_out_of_date(&self) -> bool {
        self.source_out_of_date
    }

    /// First value of the slot with the bound applied.
    pub fn value(&self) -> f32 {
        self.at(0)
    }

    /// Value at frame `index`, repeating the last available frame.
    pub fn at(&self, index: usize) -> f32 {
        let data = self.data();
        let raw = if data.is_empty() {
            match &self.source {
                InputSource::External(buffer) => buffer
                    .read()
                    .ok()
                    .and_then(|b| b.first().copied())
                    .unwrap_or(0.0),
                _ => 0.0,
            }
        } else {
            data[index.min(data.len() - 1)]
        };
        self.bound.apply(raw)
    }

    /// Per-frame value stream. The iterator never ends; callers bound it by
    /// zipping against an output window.
    pub fn stream(&self) -> InputStream<'_> {
        InputStream {
            data: self.data(),
            bound: self.bound,
            pos: 0,
        }
    }

    /// The backing float data readable without staging. Links and external
    /// buffers are only visible through their staged window.
    fn data(&self) -> &[f32] {
        if !self.staged.is_empty() {
            return &self.staged;
        }
        match &self.source {
            InputSource::Constant(values) | InputSource::Array(values) => values,
            _ => &[],
        }
    }

    /// Raw array view for bus-style operations reading with a stride.
    pub fn array(&self) -> &[f32] {
        self.data()
    }

    pub fn text(&self) -> &str {
        match &self.source {
            InputSource::Text { text, .. } => text,
            _ => "",
        }
    }

    // --- mutation API, used by the graph -----------------------------------

    pub(crate) fn set_bound(&mut self, bound: InputBound) {
        self.bound = bound;
    }

    pub(crate) fn set_constant(&mut self, value: f32, min_size: usize) {
        let size = min_size.max(1);
        if self.flags.array {
            self.source = InputSource::Array(vec![value; size]);
        } else {
            self.source = InputSource::Constant(vec![value; size]);
        }
        self.mark_changed();
    }

    /// Install explicit element values, keeping the slot's constant/array
    /// kind.
    pub(crate) fn set_values(&mut self, values: &[f32]) {
        let mut data = values.to_vec();
        if data.is_empty() {
            data.push(self.default_value);
        }
        if self.flags.array {
            self.source = InputSource::Array(data);
        } else {
            self.source = InputSource::Constant(data);
        }
        self.mark_changed();
    }

    pub(crate) fn set_array(&mut self, values: &[f32]) {
        self.source = InputSource::Array(values.to_vec());
        self.mark_changed();
    }

    pub(crate) fn set_text(&mut self, text: &str) -> bool {
        match &mut self.source {
            InputSource::Text { text: buffer, capacity } => {
                buffer.clear();
                let take = text.len().min(*capacity);
                // Respect the capacity without splitting a UTF-8 sequence.
                let mut end = take;
                while end > 0 && !text.is_char_boundary(end) {
                    end -= 1;
                }
                buffer.push_str(&text[..end]);
                self.mark_changed();
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_link(&mut self, source: NodeId, channel: u8) {
        self.source = InputSource::Link { source, channel };
        self.mark_changed();
    }

    pub(crate) fn set_external(&mut self, buffer: SharedBuffer) {
        self.source = InputSource::External(buffer);
        self.mark_changed();
    }

    /// Revert a broken wire to the layout's default constant.
    pub(crate) fn revert_to_default(&mut self) {
        self.source = InputSource::Constant(vec![self.default_value; self.min_size]);
        self.staged.clear();
        self.mark_changed();
    }

    fn mark_changed(&mut self) {
        self.change_count = self.change_count.wrapping_add(1);
    }

    // --- staging, performed by the graph before the operation runs ---------

    pub(crate) fn begin_stage(&mut self) {
        self.staged.clear();
        self.source_out_of_date = false;
    }

    /// Copy a link window into the slot, repeating the final frame when the
    /// source wrote fewer samples than requested.
    pub(crate) fn stage_window(&mut self, window: &[f32], num_samples: usize, out_of_date: bool) {
        self.staged.clear();
        self.staged.reserve(num_samples);
        for i in 0..num_samples {
            let raw = if window.is_empty() {
                0.0
            } else {
                window[i.min(window.len() - 1)]
            };
            self.staged.push(self.bound.apply(raw));
        }
        self.source_out_of_date = out_of_date;
    }

    /// Snapshot an external buffer for this pass.
    pub(crate) fn stage_external(&mut self, num_samples: usize) {
        if let InputSource::External(buffer) = &self.source {
            if let Ok(values) = buffer.read() {
                self.staged.clear();
                self.staged.reserve(num_samples);
                for i in 0..num_samples {
                    let raw = if values.is_empty() {
                        0.0
                    } else {
                        values[i.min(values.len() - 1)]
                    };
                    self.staged.push(self.bound.apply(raw));
                }
            }
        }
    }

    /// Materialize the RWA-smoothed window for slots using
    /// [`IterationPolicy::SampledRwa`].
    pub(crate) fn stage_rwa(&mut self, num_samples: usize) {
        if self.policy != IterationPolicy::SampledRwa {
            return;
        }
        if self.staged.is_empty() {
            let target = self.at(0);
            self.staged.reserve(num_samples);
            for _ in 0..num_samples {
                let v = self.rwa.next_toward(target);
                self.staged.push(v);
            }
        } else {
            for v in self.staged.iter_mut() {
                *v = self.rwa.next_toward(*v);
            }
        }
    }
}

/// Bound-applied per-frame reader over a slot's data. Repeats the last frame
/// forever, so zip it with a finite output window.
pub struct InputStream<'a> {
    data: &'a [f32],
    bound: InputBound,
    pos: usize,
}

impl Iterator for InputStream<'_> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let raw = if self.data.is_empty() {
            0.0
        } else {
            self.data[self.pos.min(self.data.len() - 1)]
        };
        self.pos += 1;
        Some(self.bound.apply(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_apply() {
        assert_eq!(InputBound::ZeroToOne.apply(1.5), 1.0);
        assert_eq!(InputBound::MinusOneToOne.apply(-3.0), -1.0);
        assert_eq!(InputBound::Unbounded.apply(123.0), 123.0);
        assert_eq!(InputBound::Custom(2.0, 4.0).apply(1.0), 2.0);
    }

    #[test]
    fn test_constant_slot_repeats_last_frame() {
        let slot = InputSlot::constant(0.25, 1);
        let values: Vec<f32> = slot.stream().take(4).collect();
        assert_eq!(values, vec![0.25; 4]);
    }

    #[test]
    fn test_staged_window_applies_bound() {
        let mut slot = InputSlot::constant(0.0, 1);
        slot.set_bound(InputBound::ZeroToOne);
        slot.set_link(3, 0);
        slot.stage_window(&[-1.0, 0.5, 2.0], 4, false);
        let values: Vec<f32> = slot.stream().take(4).collect();
        assert_eq!(values, vec![0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_text_capacity_is_enforced() {
        let mut slot = InputSlot::new(
            InputSource::Text {
                text: String::new(),
                capacity: 4,
            },
            InputBound::Unbounded,
            InputFlags {
                text: true,
                ..InputFlags::default()
            },
            IterationPolicy::Sampled,
            0.0,
            1,
        );
        assert!(slot.set_text("EURUSD"));
        assert_eq!(slot.text(), "EURU");
        let before = slot.change_count();
        assert!(slot.set_text("btc"));
        assert!(slot.change_count() > before);
    }

    #[test]
    fn test_revert_to_default_restores_constant() {
        let mut slot = InputSlot::constant(0.5, 1);
        slot.set_link(7, 1);
        assert!(slot.links_to(7));
        slot.revert_to_default();
        assert!(slot.link().is_none());
        assert_eq!(slot.value(), 0.5);
    }
}
