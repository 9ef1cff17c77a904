//! Command line front end: render a saved node graph offline to WAV, play it
//! through the default audio device, or inspect the registered node types.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use phasor::audio::{MemoryAudioSink, SharedAudioSink};
use phasor::graph::NodeGraphSchema;

#[derive(Parser)]
#[command(name = "phasor", about = "Node-graph signal engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a schema file offline and write the speaker output to WAV
    Render {
        /// Schema JSON file
        #[arg(long)]
        graph: PathBuf,
        /// Seconds of audio to render
        #[arg(long, default_value_t = 2.0)]
        seconds: f32,
        /// Output WAV path
        #[arg(long, default_value = "out.wav")]
        out: PathBuf,
    },
    /// Play a schema file through the default audio device
    Play {
        /// Schema JSON file
        #[arg(long)]
        graph: PathBuf,
        /// Seconds to play
        #[arg(long, default_value_t = 5.0)]
        seconds: f32,
    },
    /// Render a built-in demo patch (sine through envelope into speaker)
    Demo {
        /// Output WAV path
        #[arg(long, default_value = "demo.wav")]
        out: PathBuf,
    },
    /// List all registered node types as a picker tree
    Types,
}

const BLOCK_SIZE: usize = 256;
const SAMPLE_RATE: i32 = 44100;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Render { graph, seconds, out } => render(&graph, seconds, &out),
        Command::Play { graph, seconds } => play(&graph, seconds),
        Command::Demo { out } => demo(&out),
        Command::Types => {
            print_types();
            0
        }
    };
    std::process::exit(code);
}

/// Drive ticks and passes for `seconds` against the given sink-backed
/// schema, at roughly 60 ticks per second of rendered audio.
fn drive(schema: &mut NodeGraphSchema, seconds: f32, sample_rate: i32) {
    let total_samples = (seconds.max(0.0) * sample_rate as f32) as usize;
    let samples_per_tick = (sample_rate as usize / 60).max(1);
    let mut rendered = 0usize;
    let mut tick_count = 1i64;
    let mut samples_until_tick = 0usize;
    while rendered < total_samples {
        if samples_until_tick == 0 {
            schema.tick(tick_count, samples_per_tick as f32 / sample_rate as f32);
            tick_count += 1;
            samples_until_tick = samples_per_tick;
        }
        let block = BLOCK_SIZE.min(total_samples - rendered).min(samples_until_tick);
        schema.process_subgraph(block, block);
        rendered += block;
        samples_until_tick -= block;
    }
}

fn write_wav(path: &PathBuf, sample_rate: i32, interleaved: &[f32]) -> bool {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: sample_rate as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = match hound::WavWriter::create(path, spec) {
        Ok(writer) => writer,
        Err(err) => {
            warn!(error = %err, "failed to create wav file");
            return false;
        }
    };
    for sample in interleaved {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        if writer.write_sample(value).is_err() {
            return false;
        }
    }
    writer.finalize().is_ok()
}

fn render(graph: &PathBuf, seconds: f32, out: &PathBuf) -> i32 {
    let sink = Arc::new(Mutex::new(MemoryAudioSink::new(BLOCK_SIZE as i32, SAMPLE_RATE)));
    let shared: SharedAudioSink = sink.clone();

    let mut schema = NodeGraphSchema::with_all_node_types("", "");
    schema.set_audio_output(shared);
    if !schema.load(graph) {
        warn!(path = %graph.display(), "failed to load schema");
        return 1;
    }
    info!(name = schema.name(), "rendering");
    drive(&mut schema, seconds, SAMPLE_RATE);

    let frames = sink.lock().map(|mut s| s.take_committed()).unwrap_or_default();
    if frames.is_empty() {
        warn!("graph produced no speaker output; is a Speaker node wired?");
    }
    if write_wav(out, SAMPLE_RATE, &frames) {
        info!(path = %out.display(), frames = frames.len() / 2, "wav written");
        0
    } else {
        1
    }
}

fn play(graph: &PathBuf, seconds: f32) -> i32 {
    let (sink, _stream) = match phasor::audio::device::open_output(BLOCK_SIZE as i32) {
        Ok(opened) => opened,
        Err(err) => {
            warn!(error = %err, "audio device unavailable");
            return 1;
        }
    };
    let sample_rate = sink.lock().map(|s| s.sample_rate()).unwrap_or(SAMPLE_RATE);

    let mut schema = NodeGraphSchema::with_all_node_types("", "");
    schema.set_audio_output(sink.clone());
    if !schema.load(graph) {
        warn!(path = %graph.display(), "failed to load schema");
        return 1;
    }
    info!(name = schema.name(), sample_rate, "playing");

    let start = Instant::now();
    let mut tick_count = 1i64;
    let mut last_tick = Instant::now();
    while start.elapsed().as_secs_f32() < seconds {
        let ready = sink.lock().map(|s| s.can_write()).unwrap_or(false);
        if ready {
            let delta = last_tick.elapsed().as_secs_f32();
            schema.tick(tick_count, delta);
            tick_count += 1;
            last_tick = Instant::now();
            schema.process_subgraph(BLOCK_SIZE, BLOCK_SIZE);
        } else {
            std::thread::sleep(Duration::from_millis(2));
        }
    }
    0
}

fn demo(out: &PathBuf) -> i32 {
    let sink = Arc::new(Mutex::new(MemoryAudioSink::new(BLOCK_SIZE as i32, SAMPLE_RATE)));
    let shared: SharedAudioSink = sink.clone();

    let mut schema = NodeGraphSchema::with_all_node_types("Demo", "demo");
    schema.set_audio_output(shared);

    // Envelope-gated sine into both speaker channels.
    let envelope = schema.new_node(320, -1);
    let sine = schema.new_node(300, -1);
    let speaker = schema.new_node(421, -1);
    let wired = schema
        .set_input_value(envelope, 6, 440.0, 1)
        .and_then(|_| schema.set_input_link(sine, 0, envelope, 0))
        .and_then(|_| schema.set_input_link(sine, 1, envelope, 1))
        .and_then(|_| schema.set_input_link(speaker, 0, sine, 0))
        .and_then(|_| schema.set_input_link(speaker, 1, sine, 0))
        .and_then(|_| schema.set_input_value(speaker, 2, 0.8, 1));
    if let Err(err) = wired {
        warn!(error = %err, "failed to wire demo patch");
        return 1;
    }

    drive(&mut schema, 2.0, SAMPLE_RATE);
    let frames = sink.lock().map(|mut s| s.take_committed()).unwrap_or_default();
    if write_wav(out, SAMPLE_RATE, &frames) {
        info!(path = %out.display(), "demo written");
        0
    } else {
        1
    }
}

fn print_types() {
    let schema = NodeGraphSchema::with_all_node_types("", "");
    schema.picker_root().for_each_leaf(|path, name, id| {
        println!("{path:<24} {id:>5}  {name}");
    });
}
