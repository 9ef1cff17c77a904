//! MIDI event hub: connects every available input port through `midir` and
//! fans incoming messages out to registered listener queues. Graph operators
//! drain their queue on tick instead of running code inside the driver
//! callback.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::{info, warn};

/// One raw MIDI message tagged with its source device index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiData {
    pub device_in: u32,
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

/// Decoded view of a [`MidiData`] message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    ControlChange { controller: u8, value: u8 },
    Sustain { on: bool },
    Other,
}

const CC_SUSTAIN: u8 = 64;

impl MidiData {
    pub fn message(&self) -> MidiMessage {
        match self.status & 0xf0 {
            0x90 if self.data2 > 0 => MidiMessage::NoteOn {
                note: self.data1,
                velocity: self.data2,
            },
            0x80 | 0x90 => MidiMessage::NoteOff { note: self.data1 },
            0xb0 if self.data1 == CC_SUSTAIN => MidiMessage::Sustain {
                on: self.data2 >= 64,
            },
            0xb0 => MidiMessage::ControlChange {
                controller: self.data1,
                value: self.data2,
            },
            _ => MidiMessage::Other,
        }
    }
}

/// Queue handle handed to graph operators.
pub type MidiListener = Arc<Mutex<VecDeque<MidiData>>>;

/// Known device, by input port name.
#[derive(Debug, Clone)]
pub struct MidiDeviceInfo {
    pub name: String,
    pub has_output: bool,
}

/// Fan-out hub between MIDI drivers and graph operators.
#[derive(Default)]
pub struct MidiHub {
    listeners: Mutex<Vec<MidiListener>>,
    devices: Mutex<Vec<MidiDeviceInfo>>,
    input_connections: Mutex<Vec<MidiInputConnection<()>>>,
    output_connections: Mutex<Vec<Option<MidiOutputConnection>>>,
}

impl MidiHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open every available input port and, where possible, the matching
    /// output port. Returns the number of connected inputs; failures are
    /// logged and skipped.
    pub fn connect_all(self: &Arc<Self>) -> usize {
        let probe = match MidiInput::new("phasor-probe") {
            Ok(probe) => probe,
            Err(err) => {
                warn!(error = %err, "midi input unavailable");
                return 0;
            }
        };
        let ports = probe.ports();
        let mut connected = 0;
        for (index, port) in ports.iter().enumerate() {
            let name = probe
                .port_name(port)
                .unwrap_or_else(|_| format!("midi-{index}"));
            let mut input = match MidiInput::new("phasor") {
                Ok(input) => input,
                Err(err) => {
                    warn!(error = %err, "midi input init failed");
                    continue;
                }
            };
            input.ignore(Ignore::None);
            let hub = Arc::clone(self);
            let device_in = index as u32;
            match input.connect(
                port,
                "phasor-in",
                move |_timestamp, message, _| {
                    if message.len() >= 2 {
                        hub.dispatch(MidiData {
                            device_in,
                            status: message[0],
                            data1: message[1],
                            data2: message.get(2).copied().unwrap_or(0),
                        });
                    }
                },
                (),
            ) {
                Ok(connection) => {
                    info!(device = %name, "midi input connected");
                    if let Ok(mut connections) = self.input_connections.lock() {
                        connections.push(connection);
                    }
                    let output = Self::connect_output(&name);
                    if let Ok(mut devices) = self.devices.lock() {
                        devices.push(MidiDeviceInfo {
                            name: name.clone(),
                            has_output: output.is_some(),
                        });
                    }
                    if let Ok(mut outputs) = self.output_connections.lock() {
                        outputs.push(output);
                    }
                    connected += 1;
                }
                Err(err) => warn!(device = %name, error = %err, "midi connect failed"),
            }
        }
        connected
    }

    fn connect_output(name: &str) -> Option<MidiOutputConnection> {
        let probe = MidiOutput::new("phasor-out-probe").ok()?;
        let ports = probe.ports();
        let port = ports
            .iter()
            .find(|p| probe.port_name(p).map(|n| n == name).unwrap_or(false))?;
        MidiOutput::new("phasor-out")
            .ok()?
            .connect(port, "phasor-out")
            .ok()
    }

    /// Push a message to every listener queue.
    pub fn dispatch(&self, data: MidiData) {
        if let Ok(listeners) = self.listeners.lock() {
            for listener in listeners.iter() {
                if let Ok(mut queue) = listener.lock() {
                    queue.push_back(data);
                }
            }
        }
    }

    /// Create a queue that receives every subsequent message.
    pub fn register_listener(&self) -> MidiListener {
        let listener: MidiListener = Arc::new(Mutex::new(VecDeque::new()));
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(Arc::clone(&listener));
        }
        listener
    }

    pub fn device_info(&self, device: u32) -> Option<MidiDeviceInfo> {
        self.devices
            .lock()
            .ok()
            .and_then(|devices| devices.get(device as usize).cloned())
    }

    /// Send raw bytes to a device's output port, if one is connected.
    pub fn send(&self, device: u32, bytes: &[u8]) -> bool {
        let Ok(mut outputs) = self.output_connections.lock() else {
            return false;
        };
        match outputs.get_mut(device as usize) {
            Some(Some(connection)) => connection.send(bytes).is_ok(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_decoding() {
        let on = MidiData {
            device_in: 0,
            status: 0x90,
            data1: 60,
            data2: 100,
        };
        assert_eq!(
            on.message(),
            MidiMessage::NoteOn {
                note: 60,
                velocity: 100
            }
        );
        // Note-on with zero velocity is a release.
        let off = MidiData {
            device_in: 0,
            status: 0x90,
            data1: 60,
            data2: 0,
        };
        assert_eq!(off.message(), MidiMessage::NoteOff { note: 60 });
        let sustain = MidiData {
            device_in: 0,
            status: 0xb0,
            data1: 64,
            data2: 127,
        };
        assert_eq!(sustain.message(), MidiMessage::Sustain { on: true });
    }

    #[test]
    fn test_dispatch_reaches_all_listeners() {
        let hub = MidiHub::new();
        let a = hub.register_listener();
        let b = hub.register_listener();
        hub.dispatch(MidiData {
            device_in: 1,
            status: 0x90,
            data1: 42,
            data2: 80,
        });
        assert_eq!(a.lock().unwrap().len(), 1);
        assert_eq!(b.lock().unwrap().pop_front().unwrap().data1, 42);
    }
}
