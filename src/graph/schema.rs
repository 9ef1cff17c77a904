//! The schema: node type registry, factory and JSON persistence for a graph.
//!
//! Every node type carries a stable integer id used both by the picker menu
//! and by `new_node`. Saved graphs keep those ids, so the numbering is part
//! of the file format.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audio::{SharedAudioCapture, SharedAudioSink};
use crate::graph::graph::{GraphError, NodeGraph};
use crate::graph::input::{InputBound, InputSource, SharedBuffer};
use crate::graph::node::{Node, NodeId, NodeKind, INVALID_NODE};
use crate::graph::operation::Operation;
use crate::graph::picker::TreeMenuNode;
use crate::hid::midi::MidiHub;
use crate::hid::KeyState;
use crate::ops;
use crate::util::string_id;

/// Current schema file version. Minor bumps are backward compatible;
/// a file with a newer major version is refused.
pub const VERSION_MAJOR: i32 = 1;
pub const VERSION_MINOR: i32 = 1;

/// Custom node factory for application-defined type ids (>= 10000).
pub type CustomCreator = Box<dyn Fn(i32) -> Option<(NodeKind, Box<dyn Operation>)> + Send>;

/// A registered node type shown by pickers.
#[derive(Debug, Clone)]
pub struct NodeTypeDesc {
    pub id: i32,
    pub name: String,
}

/// Registry, factory and persistence wrapper around one [`NodeGraph`].
#[derive(Default)]
pub struct NodeGraphSchema {
    version_major: i32,
    version_minor: i32,
    name: String,
    type_name: String,
    file_name: String,
    full_path: String,
    string_id: u32,
    graph: NodeGraph,
    key_state: Option<KeyState>,
    midi_hub: Option<Arc<MidiHub>>,
    audio_output: Option<SharedAudioSink>,
    audio_capture: Option<SharedAudioCapture>,
    custom_creator: Option<CustomCreator>,
    registered: BTreeMap<String, Vec<NodeTypeDesc>>,
    picker_root: TreeMenuNode,
}

impl NodeGraphSchema {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name: if name.is_empty() { "Schema".into() } else { name },
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    /// A schema with every built-in operator registered.
    pub fn with_all_node_types(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let mut schema = Self::new(name, type_name);
        schema.register_all_operators();
        schema
    }

    // --- collaborators ------------------------------------------------------

    pub fn set_key_state(&mut self, key_state: KeyState) {
        self.key_state = Some(key_state);
    }

    pub fn set_midi_hub(&mut self, hub: Arc<MidiHub>) {
        self.midi_hub = Some(hub);
    }

    pub fn set_audio_output(&mut self, sink: SharedAudioSink) {
        self.audio_output = Some(sink);
    }

    pub fn set_audio_capture(&mut self, capture: SharedAudioCapture) {
        self.audio_capture = Some(capture);
    }

    pub fn set_custom_creator(&mut self, creator: CustomCreator) {
        self.custom_creator = Some(creator);
    }

    fn sample_rate(&self) -> i32 {
        self.audio_output
            .as_ref()
            .and_then(|sink| sink.lock().ok().map(|sink| sink.sample_rate()))
            .unwrap_or(44100)
    }

    // --- accessors ----------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn set_type_name(&mut self, type_name: impl Into<String>) {
        self.type_name = type_name.into();
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn string_id(&mut self) -> u32 {
        if self.string_id == 0 {
            self.string_id = string_id(&self.full_path);
        }
        self.string_id
    }

    /// Version of the most recently loaded document, `(0, 0)` before any
    /// load and for files without version keys.
    pub fn loaded_version(&self) -> (i32, i32) {
        (self.version_major, self.version_minor)
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut NodeGraph {
        &mut self.graph
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.graph.node(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.graph.node_mut(id)
    }

    // --- node factory -------------------------------------------------------

    /// Create a node of a registered type. Returns the node id, or
    /// `INVALID_NODE` for an unknown type id or an occupied explicit id.
    pub fn new_node(&mut self, type_id: i32, id: NodeId) -> NodeId {
        let Some((kind, operation)) = self.create_operation(type_id) else {
            warn!(type_id, "unknown node type id");
            return INVALID_NODE;
        };
        if id >= 0 {
            self.graph.insert_with_id(id, type_id, kind, operation)
        } else {
            self.graph.insert(type_id, kind, operation)
        }
    }

    pub fn remove_node(&mut self, id: NodeId) -> bool {
        self.graph.remove_node(id)
    }

    fn create_operation(&self, type_id: i32) -> Option<(NodeKind, Box<dyn Operation>)> {
        use crate::ops::source::ConstantMode;
        use NodeKind::*;
        let sample_rate = self.sample_rate();
        let op: (NodeKind, Box<dyn Operation>) = match type_id {
            // Data sources from within the node graph
            0 => (Default, Box::new(ops::source::Constants::new(ConstantMode::ZeroToOne))),
            1 => (Default, Box::new(ops::source::Constants::new(ConstantMode::MinusOneToOne))),
            2 => (Default, Box::new(ops::source::Constants::new(ConstantMode::ZeroToHundred))),
            3 => (Default, Box::new(ops::source::Constants::new(ConstantMode::Unbounded))),
            4 => (ExternalOutput, Box::new(ops::source::Time::new(sample_rate))),
            5 => (Default, Box::new(ops::source::Text::new())),

            // Internal outputs like charts or debug views
            20 => (ExternalOutput, Box::new(ops::output::Debug::new())),
            21 => (ExternalVisualOutput, Box::new(ops::output::Plot::new(100))),

            // Internal cache for bulk data between passes
            40 => (Default, Box::new(ops::data_io::GraphCache::new(1))),
            41 => (Default, Box::new(ops::data_io::GraphCache::new(2))),
            42 => (Default, Box::new(ops::data_io::GraphCache::new(3))),
            43 => (Default, Box::new(ops::data_io::GraphCache::new(4))),

            // Math arithmetic
            100 => (Default, Box::new(ops::arithmetic::Add::new())),
            101 => (Default, Box::new(ops::arithmetic::Subtract::new())),
            102 => (Default, Box::new(ops::arithmetic::Multiply::new())),
            103 => (Default, Box::new(ops::arithmetic::Negate::new())),
            104 => (Default, Box::new(ops::arithmetic::Abs::new())),
            105 => (Default, Box::new(ops::arithmetic::Log::new())),
            106 => (Default, Box::new(ops::arithmetic::Multiply3::new())),
            107 => (Default, Box::new(ops::arithmetic::MultiplyAndAdd::new())),
            108 => (Default, Box::new(ops::arithmetic::Round::new())),

            // Math logic
            120 => (Default, Box::new(ops::logic::And::new())),
            121 => (Default, Box::new(ops::logic::Or::new())),
            122 => (Default, Box::new(ops::logic::Xor::new())),

            // Math numerical
            140 => (Default, Box::new(ops::numerical::Integral::new())),
            141 => (Default, Box::new(ops::numerical::Derivate::new())),
            142 => (Default, Box::new(ops::numerical::DiffNorm::new())),
            143 => (Default, Box::new(ops::numerical::Diff::new())),

            // Trading data io
            200 => (ExternalInput, Box::new(ops::trading::OhlcvDataIn::new(ops::trading::CandleMode::Ohlcv))),
            201 => (ExternalInput, Box::new(ops::trading::OhlcvDataIn::new(ops::trading::CandleMode::HeikinAshi))),
            202 => (ExternalOutput, Box::new(ops::trading::PlaceTrade::new())),

            // Trading detectors
            220 => (Default, Box::new(ops::trading::DetectorTrend::new())),
            221 => (Default, Box::new(ops::trading::DetectorTrendDiff::new())),

            // Trading filters
            240 => (Default, Box::new(ops::trading::FilterFlipGate::new())),
            241 => (Default, Box::new(ops::trading::FilterPulseInfo::new())),
            242 => (Default, Box::new(ops::trading::FilterVwma::new())),

            // Trading indicators
            260 => (Default, Box::new(ops::trading::IndicatorObv::new())),
            261 => (Default, Box::new(ops::trading::IndicatorVpt::new())),
            262 => (Default, Box::new(ops::trading::IndicatorObv::normalized())),
            263 => (Default, Box::new(ops::trading::IndicatorGa::new())),
            264 => (Default, Box::new(ops::trading::IndicatorVrsi::new())),
            265 => (Default, Box::new(ops::trading::IndicatorAtr::new())),
            266 => (Default, Box::new(ops::trading::IndicatorSd::new())),

            // Signal generators
            300 => (Default, Box::new(ops::generator::Sine::new(sample_rate))),
            301 => (Default, Box::new(ops::generator::SineFm::new(sample_rate))),
            302 => (Default, Box::new(ops::generator::SineFm2::new(sample_rate))),
            303 => (Default, Box::new(ops::generator::SineFm3::new(sample_rate))),
            304 => (Default, Box::new(ops::generator::Saw::new(sample_rate))),
            305 => (Default, Box::new(ops::generator::Sine2::new(sample_rate))),
            306 => (Default, Box::new(ops::generator::Saw2::new(sample_rate))),

            // Signal control
            320 => (Default, Box::new(ops::control::Envelope::new(sample_rate))),
            321 => (Default, Box::new(ops::control::Arpeggio::new(sample_rate))),

            // Signal filters
            340 => (Default, Box::new(ops::filter::Lowpass::new())),
            341 => (Default, Box::new(ops::filter::Highpass::new())),
            342 => (Default, Box::new(ops::filter::Chamberlin::new(sample_rate))),
            343 => (Default, Box::new(ops::filter::MovingAverage::new())),

            // Signal effects
            360 => (Default, Box::new(ops::effect::Reverb1::new(sample_rate))),
            361 => (Default, Box::new(ops::effect::Reverb2::new(sample_rate))),
            362 => (Default, Box::new(ops::effect::Limiter::new(sample_rate))),
            363 => (Default, Box::new(ops::effect::EnvelopeFollower::new(sample_rate))),
            364 => (Default, Box::new(ops::effect::Saturator::new())),
            365 => (Default, Box::new(ops::effect::TranceGate::new(sample_rate))),

            // Device IO inputs
            400 => (Default, Box::new(ops::device::KeyboardPianoOp::new(self.key_state.clone()))),
            401 => (Default, Box::new(ops::device::MidiKeyboardOp::new(self.midi_hub.clone()))),
            402 => (Default, Box::new(ops::device::MidiKnobsOp::new(self.midi_hub.clone()))),
            403..=407 => (
                Default,
                Box::new(ops::device::MidiButtonsOp::new(self.midi_hub.clone(), type_id - 403)),
            ),
            408 => (Default, Box::new(ops::device::MicOp::new(self.audio_capture.clone()))),

            // Device IO outputs
            421 => (ExternalOutput, Box::new(ops::output::Speaker::new(self.audio_output.clone()))),

            // Data IO buses
            500 => (ExternalInput, Box::new(ops::data_io::DataIn::new(6))),
            501 => (ExternalOutput, Box::new(ops::data_io::DataOut::new(6))),

            // UI elements
            600 => (ExternalInput, Box::new(ops::ui::UiCheckbox::new())),
            601 => (ExternalInput, Box::new(ops::ui::UiSlider::new(0.0, 1.0, 1.0))),
            602 => (ExternalOutput, Box::new(ops::ui::UiChartLine::new(100))),
            603 => (ExternalOutput, Box::new(ops::ui::UiCandleSticks::new(100))),

            _ => {
                if type_id >= 10000 {
                    if let Some(creator) = self.custom_creator.as_ref() {
                        return creator(type_id);
                    }
                }
                return None;
            }
        };
        Some(op)
    }

    // --- wiring, delegated to the graph ------------------------------------

    pub fn set_input_link(
        &mut self,
        dst: NodeId,
        channel: usize,
        src: NodeId,
        src_channel: u8,
    ) -> Result<(), GraphError> {
        self.graph.set_input_link(dst, channel, src, src_channel)
    }

    pub fn set_input_value(
        &mut self,
        id: NodeId,
        channel: usize,
        value: f32,
        min_size: usize,
    ) -> Result<(), GraphError> {
        self.graph.set_input_value(id, channel, value, min_size)
    }

    pub fn set_input_array(
        &mut self,
        id: NodeId,
        channel: usize,
        values: &[f32],
    ) -> Result<(), GraphError> {
        self.graph.set_input_array(id, channel, values)
    }

    pub fn set_input_text(
        &mut self,
        id: NodeId,
        channel: usize,
        text: &str,
    ) -> Result<(), GraphError> {
        self.graph.set_input_text(id, channel, text)
    }

    pub fn set_input_bound(
        &mut self,
        id: NodeId,
        channel: usize,
        bound: InputBound,
    ) -> Result<(), GraphError> {
        self.graph.set_input_bound(id, channel, bound)
    }

    pub fn set_input_external(
        &mut self,
        id: NodeId,
        channel: usize,
        buffer: SharedBuffer,
    ) -> Result<(), GraphError> {
        self.graph.set_input_external(id, channel, buffer)
    }

    pub fn detach_input(&mut self, id: NodeId, src: NodeId) {
        self.graph.detach_input(id, src)
    }

    pub fn tick(&mut self, tick_count: i64, delta_secs: f32) {
        self.graph.tick(tick_count, delta_secs)
    }

    pub fn process_subgraph(&mut self, num_samples: usize, num_cache_samples: usize) {
        self.graph.process_subgraph(num_samples, num_cache_samples)
    }

    // --- registry & picker --------------------------------------------------

    pub fn has_node_type(&self, type_group: &str, type_id: i32) -> bool {
        self.registered
            .get(type_group)
            .map(|types| types.iter().any(|desc| desc.id == type_id))
            .unwrap_or(false)
    }

    pub fn register_node_type(&mut self, type_group: &str, unique_type_id: i32, type_name: &str) {
        if !self.has_node_type(type_group, unique_type_id) {
            self.registered
                .entry(type_group.to_string())
                .or_default()
                .push(NodeTypeDesc {
                    id: unique_type_id,
                    name: type_name.to_string(),
                });
        }
        self.picker_root
            .insert_path(type_group, type_name, unique_type_id);
    }

    pub fn for_each_node_type(&self, mut visit: impl FnMut(&str, &[NodeTypeDesc])) {
        for (group, types) in &self.registered {
            visit(group, types);
        }
    }

    pub fn picker_root(&self) -> &TreeMenuNode {
        &self.picker_root
    }

    pub fn register_all_of(&mut self, type_group: &str) {
        match type_group {
            "Node Graph.Source" => {
                self.register_node_type(type_group, 0, "Value [0,1]");
                self.register_node_type(type_group, 1, "Value [-1,1]");
                self.register_node_type(type_group, 2, "Value [0,100]");
                self.register_node_type(type_group, 3, "Value [-inf,inf]");
                self.register_node_type(type_group, 4, "Time");
                self.register_node_type(type_group, 5, "Text");
            }
            "Node Graph.Output" => {
                self.register_node_type(type_group, 20, "Debug");
                self.register_node_type(type_group, 21, "Plot");
            }
            "Node Graph.Cache" => {
                self.register_node_type(type_group, 40, "Cache x1");
                self.register_node_type(type_group, 41, "Cache x2");
                self.register_node_type(type_group, 42, "Cache x3");
                self.register_node_type(type_group, 43, "Cache x4");
            }
            "Math.Aritmethic" => {
                self.register_node_type(type_group, 100, "Add");
                self.register_node_type(type_group, 101, "Sub");
                self.register_node_type(type_group, 102, "Mul");
                self.register_node_type(type_group, 103, "Neg");
                self.register_node_type(type_group, 104, "Abs");
                self.register_node_type(type_group, 105, "Log");
                self.register_node_type(type_group, 106, "Mul3");
                self.register_node_type(type_group, 107, "Madd");
                self.register_node_type(type_group, 108, "Round");
            }
            "Math.Logic" => {
                self.register_node_type(type_group, 120, "And");
                self.register_node_type(type_group, 121, "Or");
                self.register_node_type(type_group, 122, "Xor");
            }
            "Math.Numerical" => {
                self.register_node_type(type_group, 140, "Integral");
                self.register_node_type(type_group, 141, "Derivate");
                self.register_node_type(type_group, 142, "Difference Normalized");
                self.register_node_type(type_group, 143, "Difference");
            }
            "Trading.Data IO" => {
                self.register_node_type(type_group, 200, "OCHLV Data In");
                self.register_node_type(type_group, 201, "Heikin-Ashi Data In");
                self.register_node_type(type_group, 202, "Place Trade");
            }
            "Trading.Detector" => {
                self.register_node_type(type_group, 220, "Trend");
                self.register_node_type(type_group, 221, "Trend Diff");
            }
            "Trading.Filter" => {
                self.register_node_type(type_group, 240, "Flip Gate");
                self.register_node_type(type_group, 241, "Pulse Info");
                self.register_node_type(type_group, 242, "Volume Weighted Moving Average");
            }
            "Trading.Indicator" => {
                self.register_node_type(type_group, 260, "On-Balance Volume (OBV)");
                self.register_node_type(type_group, 261, "Volume-Price Trend VPT");
                self.register_node_type(type_group, 262, "On-Balance Volume 2 (OBV2)");
                self.register_node_type(type_group, 263, "Gated Accumulation (GA)");
                // 264..266 (VRSI, ATR, SD) are constructible but not picked.
            }
            "Signal.Generator" => {
                self.register_node_type(type_group, 300, "Sine");
                self.register_node_type(type_group, 301, "Sine FM 1");
                self.register_node_type(type_group, 302, "Sine FM 2");
                self.register_node_type(type_group, 303, "Sine FM 3");
                self.register_node_type(type_group, 304, "Saw");
                self.register_node_type(type_group, 305, "Sine 2");
                self.register_node_type(type_group, 306, "Saw 2");
            }
            "Signal.Control" => {
                self.register_node_type(type_group, 320, "Envelope");
                self.register_node_type(type_group, 321, "Arpeggio");
            }
            "Signal.Filter" => {
                self.register_node_type(type_group, 340, "Lowpass");
                self.register_node_type(type_group, 341, "Highpass");
                self.register_node_type(type_group, 342, "Chamberlin two-pole (4 mode)");
                self.register_node_type(type_group, 343, "Gamma Weighted Moving Average (GWMA)");
            }
            "Signal.Effect" => {
                self.register_node_type(type_group, 360, "Reverb1");
                self.register_node_type(type_group, 361, "Reverb2");
                self.register_node_type(type_group, 362, "Limiter");
                self.register_node_type(type_group, 363, "Envelope Follower");
                self.register_node_type(type_group, 364, "Saturator");
                self.register_node_type(type_group, 365, "Trance Gate");
            }
            "Device IO.Input" => {
                self.register_node_type(type_group, 400, "Keyboard Piano");
                self.register_node_type(type_group, 401, "Midi Keyboard");
                self.register_node_type(type_group, 402, "Midi Knobs");
                self.register_node_type(type_group, 403, "Midi Button Group 1");
                self.register_node_type(type_group, 404, "Midi Button Group 2");
                self.register_node_type(type_group, 405, "Midi Button Group 3");
                self.register_node_type(type_group, 406, "Midi Button Group 4");
                self.register_node_type(type_group, 407, "Midi Button Group 5");
                self.register_node_type(type_group, 408, "Mic");
            }
            "Device IO.Output" => {
                self.register_node_type(type_group, 421, "Speaker");
            }
            "Data IO" => {
                self.register_node_type(type_group, 500, "Data In x6");
                self.register_node_type(type_group, 501, "Data Out x6");
            }
            "UI" => {
                self.register_node_type(type_group, 600, "UI Checkbox");
                self.register_node_type(type_group, 601, "UI Slider");
                self.register_node_type(type_group, 602, "UI Chart Lines");
                self.register_node_type(type_group, 603, "UI Candle Sticks");
            }
            _ => warn!(type_group, "type group does not exist"),
        }
    }

    pub fn register_all_operators(&mut self) {
        for group in [
            "Node Graph.Source",
            "Node Graph.Output",
            "Node Graph.Cache",
            "Math.Aritmethic",
            "Math.Logic",
            "Math.Numerical",
            "Trading.Data IO",
            "Trading.Detector",
            "Trading.Filter",
            "Trading.Indicator",
            "Signal.Generator",
            "Signal.Control",
            "Signal.Filter",
            "Signal.Effect",
            "Device IO.Input",
            "Device IO.Output",
            "Data IO",
            "UI",
        ] {
            self.register_all_of(group);
        }
    }

    // --- persistence --------------------------------------------------------

    /// Serialize the schema to its JSON document.
    pub fn to_json(&mut self) -> String {
        let doc = SchemaFile {
            schema: self.to_doc(),
        };
        serde_json::to_string_pretty(&doc).unwrap_or_default()
    }

    /// Save to a file, updating the recorded file name and path.
    pub fn save(&mut self, path: &Path) -> bool {
        if path.file_name().is_none() {
            warn!("failed to save schema: there is no file name");
            return false;
        }
        self.file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.full_path = path.to_string_lossy().replace('\\', "/");
        self.string_id = 0;
        let _ = self.string_id();
        self.version_major = VERSION_MAJOR;
        self.version_minor = VERSION_MINOR;
        let json = self.to_json();
        match std::fs::write(path, json) {
            Ok(()) => {
                info!(path = %path.display(), "schema saved");
                true
            }
            Err(err) => {
                warn!(error = %err, "failed to save schema");
                false
            }
        }
    }

    /// Load from a file. Unknown node types are dropped with their wires;
    /// a newer major version refuses to load.
    pub fn load(&mut self, path: &Path) -> bool {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "failed to load schema: the file does not exist");
                return false;
            }
        };
        if !self.load_json(&data) {
            return false;
        }
        self.file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.full_path = path.to_string_lossy().replace('\\', "/");
        self.string_id = 0;
        let _ = self.string_id();
        true
    }

    /// Load from a JSON document string.
    pub fn load_json(&mut self, data: &str) -> bool {
        let doc: SchemaFile = match serde_json::from_str(data) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(error = %err, "failed to parse schema");
                return false;
            }
        };
        let schema = doc.schema;
        if schema.version_major > VERSION_MAJOR {
            warn!(
                file_major = schema.version_major,
                supported_major = VERSION_MAJOR,
                "schema major version is newer than this loader"
            );
            return false;
        }
        if schema.version_major < VERSION_MAJOR {
            warn!("schema major version mismatch, upgrading; schema should be re-saved");
        } else if schema.version_minor < VERSION_MINOR {
            warn!("schema minor version is old; re-save when suitable");
        }
        self.version_major = schema.version_major;
        self.version_minor = schema.version_minor;
        self.name = schema.name;
        self.type_name = schema.type_name;
        self.file_name = schema.file_name;
        self.full_path = schema.full_path;
        self.string_id = schema.string_id;

        self.graph = NodeGraph::new();
        let mut dropped: Vec<NodeId> = Vec::new();
        for node in &schema.group.nodes {
            let id = self.new_node(node.type_id, node.id);
            if id == INVALID_NODE {
                warn!(node = node.id, type_id = node.type_id, "node dropped on load");
                dropped.push(node.id);
                continue;
            }
            for input in &node.inputs {
                let result = if let Some(text) = &input.text {
                    self.graph.set_input_text(id, input.channel, text)
                } else if let Some(values) = &input.array {
                    self.graph.set_input_array(id, input.channel, values)
                } else if let Some(values) = &input.constant {
                    self.graph.set_input_values(id, input.channel, values)
                } else {
                    Ok(())
                };
                if let Err(err) = result {
                    warn!(node = id, channel = input.channel, error = %err, "input dropped on load");
                }
                if let Some(bound) = input.bound {
                    let _ = self.graph.set_input_bound(id, input.channel, bound);
                }
            }
        }
        for wire in &schema.group.wires {
            if dropped.contains(&wire.src_id) || dropped.contains(&wire.dst_id) {
                continue;
            }
            if let Err(err) =
                self.graph
                    .set_input_link(wire.dst_id, wire.dst_channel, wire.src_id, wire.src_channel)
            {
                warn!(
                    src = wire.src_id,
                    dst = wire.dst_id,
                    error = %err,
                    "wire dropped on load"
                );
            }
        }
        true
    }

    fn to_doc(&self) -> SchemaDoc {
        let mut nodes = Vec::new();
        let mut wires = Vec::new();
        for node in self.graph.iter() {
            let mut inputs = Vec::new();
            for (channel, slot) in (0..node.num_inputs()).filter_map(|c| node.input(c).map(|s| (c, s))) {
                let bound = match slot.bound() {
                    InputBound::Unbounded => None,
                    bound => Some(bound),
                };
                match slot.source() {
                    InputSource::Link { source, channel: src_channel } => {
                        wires.push(WireDoc {
                            src_id: *source,
                            src_channel: *src_channel,
                            dst_id: node.id(),
                            dst_channel: channel,
                        });
                        if bound.is_some() {
                            inputs.push(InputDoc {
                                channel,
                                bound,
                                ..InputDoc::default()
                            });
                        }
                    }
                    InputSource::Constant(values) => inputs.push(InputDoc {
                        channel,
                        constant: Some(values.clone()),
                        bound,
                        ..InputDoc::default()
                    }),
                    InputSource::Array(values) => inputs.push(InputDoc {
                        channel,
                        array: Some(values.clone()),
                        bound,
                        ..InputDoc::default()
                    }),
                    InputSource::Text { text, .. } => inputs.push(InputDoc {
                        channel,
                        text: Some(text.clone()),
                        bound,
                        ..InputDoc::default()
                    }),
                    // External buffers are runtime-only and not persisted.
                    InputSource::External(_) => {}
                }
            }
            nodes.push(NodeDoc {
                id: node.id(),
                type_id: node.type_id(),
                inputs,
            });
        }
        SchemaDoc {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            name: self.name.clone(),
            type_name: self.type_name.clone(),
            file_name: self.file_name.clone(),
            full_path: self.full_path.clone(),
            string_id: self.string_id,
            group: GroupDoc { nodes, wires },
        }
    }
}

// --- file format ------------------------------------------------------------

#[derive(Serialize, Deserialize, Default)]
struct SchemaFile {
    #[serde(rename = "NodeGraphSchema")]
    schema: SchemaDoc,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct SchemaDoc {
    #[serde(rename = "VersionMajor")]
    version_major: i32,
    #[serde(rename = "VersionMinor")]
    version_minor: i32,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "TypeName")]
    type_name: String,
    #[serde(rename = "FileName")]
    file_name: String,
    #[serde(rename = "FullPath")]
    full_path: String,
    #[serde(rename = "StringId")]
    string_id: u32,
    #[serde(rename = "NodeGraphGroup")]
    group: GroupDoc,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct GroupDoc {
    #[serde(rename = "Nodes")]
    nodes: Vec<NodeDoc>,
    #[serde(rename = "Wires")]
    wires: Vec<WireDoc>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct NodeDoc {
    #[serde(rename = "Id")]
    id: NodeId,
    #[serde(rename = "TypeId")]
    type_id: i32,
    #[serde(rename = "Inputs")]
    inputs: Vec<InputDoc>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct InputDoc {
    #[serde(rename = "Channel")]
    channel: usize,
    #[serde(rename = "Constant", skip_serializing_if = "Option::is_none")]
    constant: Option<Vec<f32>>,
    #[serde(rename = "Array", skip_serializing_if = "Option::is_none")]
    array: Option<Vec<f32>>,
    #[serde(rename = "Text", skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "Bound", skip_serializing_if = "Option::is_none")]
    bound: Option<InputBound>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct WireDoc {
    #[serde(rename = "SrcId")]
    src_id: NodeId,
    #[serde(rename = "SrcChannel")]
    src_channel: u8,
    #[serde(rename = "DstId")]
    dst_id: NodeId,
    #[serde(rename = "DstChannel")]
    dst_channel: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_with_unknown_type_fails() {
        let mut schema = NodeGraphSchema::with_all_node_types("Test", "");
        assert_eq!(schema.new_node(9999, -1), INVALID_NODE);
    }

    #[test]
    fn test_factory_covers_registered_types() {
        let mut schema = NodeGraphSchema::with_all_node_types("Test", "");
        let mut type_ids = Vec::new();
        schema.for_each_node_type(|_, types| {
            type_ids.extend(types.iter().map(|desc| desc.id));
        });
        assert!(type_ids.len() > 50);
        for type_id in type_ids {
            let id = schema.new_node(type_id, -1);
            assert_ne!(id, INVALID_NODE, "type {type_id} failed to construct");
        }
    }

    #[test]
    fn test_custom_creator_handles_high_type_ids() {
        use crate::ops::arithmetic::Add;
        let mut schema = NodeGraphSchema::new("Test", "");
        assert_eq!(schema.new_node(10001, -1), INVALID_NODE);
        schema.set_custom_creator(Box::new(|type_id| {
            (type_id == 10001).then(|| {
                (
                    NodeKind::Default,
                    Box::new(Add::new()) as Box<dyn Operation>,
                )
            })
        }));
        assert_ne!(schema.new_node(10001, -1), INVALID_NODE);
    }

    #[test]
    fn test_save_load_roundtrip_preserves_graph() {
        let mut schema = NodeGraphSchema::with_all_node_types("Roundtrip", "test");
        let a = schema.new_node(100, -1);
        let b = schema.new_node(100, -1);
        let sink = schema.new_node(20, -1);
        schema.set_input_value(a, 0, 1.5, 1).unwrap();
        schema.set_input_value(a, 1, 2.5, 1).unwrap();
        schema.set_input_link(b, 0, a, 0).unwrap();
        schema.set_input_link(sink, 0, b, 0).unwrap();
        let json = schema.to_json();

        let mut restored = NodeGraphSchema::with_all_node_types("", "");
        assert!(restored.load_json(&json));
        assert_eq!(restored.graph().num_nodes(), 3);
        assert_eq!(restored.node(b).unwrap().input(0).unwrap().link(), Some((a, 0)));
        restored.process_subgraph(64, 64);
        // (1.5 + 2.5) + 0 = 4.0 flows into the debug sink.
        let debug = restored
            .node(sink)
            .unwrap()
            .op::<ops::output::Debug>()
            .unwrap();
        assert!((debug.value() - 4.0).abs() < 0.2);
    }

    #[test]
    fn test_load_drops_unknown_types_but_still_loads() {
        let json = r#"{
            "NodeGraphSchema": {
                "VersionMajor": 1,
                "VersionMinor": 1,
                "Name": "Partial",
                "NodeGraphGroup": {
                    "Nodes": [
                        {"Id": 0, "TypeId": 100, "Inputs": []},
                        {"Id": 1, "TypeId": 12345, "Inputs": []}
                    ],
                    "Wires": [
                        {"SrcId": 1, "SrcChannel": 0, "DstId": 0, "DstChannel": 0}
                    ]
                }
            }
        }"#;
        let mut schema = NodeGraphSchema::with_all_node_types("", "");
        assert!(schema.load_json(json));
        assert_eq!(schema.graph().num_nodes(), 1);
        assert!(schema.node(0).unwrap().input(0).unwrap().link().is_none());
    }

    #[test]
    fn test_load_tolerates_missing_keys_as_version_zero() {
        let json = r#"{"NodeGraphSchema": {"Name": "Old", "NodeGraphGroup": {}}}"#;
        let mut schema = NodeGraphSchema::with_all_node_types("", "");
        assert!(schema.load_json(json));
        assert_eq!(schema.name(), "Old");
        assert_eq!(schema.loaded_version(), (0, 0));
    }

    #[test]
    fn test_load_refuses_newer_major_version() {
        let json = r#"{"NodeGraphSchema": {"VersionMajor": 99, "Name": "Future", "NodeGraphGroup": {}}}"#;
        let mut schema = NodeGraphSchema::with_all_node_types("", "");
        assert!(!schema.load_json(json));
    }

    #[test]
    fn test_picker_contains_registered_groups() {
        let schema = NodeGraphSchema::with_all_node_types("", "");
        let math = schema.picker_root().descend(&["Math", "Aritmethic"]).unwrap();
        assert!(math.children.iter().any(|c| c.name() == "Add" && c.id() == 100));
        assert!(schema.has_node_type("Signal.Generator", 300));
        assert!(!schema.has_node_type("Signal.Generator", 9999));
    }
}
