//! Audio sink implementations: a cpal-backed device sink fed through a
//! lock-free ring buffer, and an in-memory sink for tests and offline
//! rendering.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{info, warn};

use crate::audio::{AudioSink, SharedAudioSink};

/// Ring capacity in parts. Double buffering plus headroom.
const RING_PARTS: usize = 4;

/// Producer half of the device ring. The graph's speaker operator writes
/// parts here; the cpal callback drains them.
pub struct CpalAudioSink {
    producer: HeapProd<f32>,
    staging: Vec<f32>,
    frames_per_part: i32,
    sample_rate: i32,
}

impl AudioSink for CpalAudioSink {
    fn frames_per_part(&self) -> i32 {
        self.frames_per_part
    }

    fn sample_rate(&self) -> i32 {
        self.sample_rate
    }

    fn can_write(&self) -> bool {
        self.producer.vacant_len() >= self.staging.len()
    }

    fn write_buffer(&mut self) -> &mut [f32] {
        &mut self.staging
    }

    fn commit(&mut self) {
        let pushed = self.producer.push_slice(&self.staging);
        if pushed < self.staging.len() {
            warn!(
                dropped = self.staging.len() - pushed,
                "audio ring overrun, frames dropped"
            );
        }
    }
}

/// Keep-alive handle for the platform stream. Dropping it stops playback.
/// The stream is platform-bound and stays on the thread that opened it.
pub struct CpalOutputStream {
    _stream: cpal::Stream,
}

/// Open the default output device and return the shared sink plus the
/// stream handle the caller must keep alive.
pub fn open_output(frames_per_part: i32) -> Result<(SharedAudioSink, CpalOutputStream), String> {
    let frames_per_part = frames_per_part.max(32);
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "no default audio output device".to_string())?;
    let config = device
        .default_output_config()
        .map_err(|err| format!("no default output config: {err}"))?;
    let sample_rate = config.sample_rate().0 as i32;
    let channels = config.channels() as usize;

    let ring = HeapRb::<f32>::new(frames_per_part as usize * 2 * RING_PARTS);
    let (producer, consumer) = ring.split();

    let stream = device
        .build_output_stream(
            &config.into(),
            into_callback(consumer, channels),
            |err| warn!(error = %err, "audio stream error"),
            None,
        )
        .map_err(|err| format!("failed to build output stream: {err}"))?;
    stream
        .play()
        .map_err(|err| format!("failed to start output stream: {err}"))?;
    info!(sample_rate, channels, "audio output opened");

    let sink = CpalAudioSink {
        producer,
        staging: vec![0.0; frames_per_part as usize * 2],
        frames_per_part,
        sample_rate,
    };
    let shared: SharedAudioSink = Arc::new(Mutex::new(sink));
    Ok((shared, CpalOutputStream { _stream: stream }))
}

/// Map the stereo ring onto however many channels the device wants.
fn into_callback(
    mut consumer: HeapCons<f32>,
    channels: usize,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) {
    let mut frame = [0.0f32; 2];
    move |data: &mut [f32], _info| {
        for out_frame in data.chunks_mut(channels.max(1)) {
            let got = consumer.pop_slice(&mut frame);
            if got < 2 {
                frame[got..].iter_mut().for_each(|s| *s = 0.0);
            }
            match out_frame.len() {
                1 => out_frame[0] = 0.5 * (frame[0] + frame[1]),
                _ => {
                    out_frame[0] = frame[0];
                    out_frame[1] = frame[1];
                    for extra in out_frame.iter_mut().skip(2) {
                        *extra = 0.0;
                    }
                }
            }
        }
    }
}

/// Sink that accepts everything and records committed frames. Used by tests
/// and offline rendering.
pub struct MemoryAudioSink {
    staging: Vec<f32>,
    committed: Vec<f32>,
    frames_per_part: i32,
    sample_rate: i32,
}

impl MemoryAudioSink {
    pub fn new(frames_per_part: i32, sample_rate: i32) -> Self {
        let frames_per_part = frames_per_part.max(1);
        Self {
            staging: vec![0.0; frames_per_part as usize * 2],
            committed: Vec::new(),
            frames_per_part,
            sample_rate: sample_rate.max(1),
        }
    }

    /// All frames committed so far, interleaved stereo.
    pub fn committed(&self) -> &[f32] {
        &self.committed
    }

    pub fn take_committed(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.committed)
    }
}

impl AudioSink for MemoryAudioSink {
    fn frames_per_part(&self) -> i32 {
        self.frames_per_part
    }

    fn sample_rate(&self) -> i32 {
        self.sample_rate
    }

    fn can_write(&self) -> bool {
        true
    }

    fn write_buffer(&mut self) -> &mut [f32] {
        &mut self.staging
    }

    fn commit(&mut self) {
        self.committed.extend_from_slice(&self.staging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_accumulates_parts() {
        let mut sink = MemoryAudioSink::new(4, 44100);
        assert!(sink.can_write());
        sink.write_buffer().fill(0.25);
        sink.commit();
        sink.write_buffer().fill(0.5);
        sink.commit();
        assert_eq!(sink.committed().len(), 16);
        assert_eq!(sink.committed()[0], 0.25);
        assert_eq!(sink.committed()[8], 0.5);
        let taken = sink.take_committed();
        assert_eq!(taken.len(), 16);
        assert!(sink.committed().is_empty());
    }
}
