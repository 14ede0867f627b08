//! MIDI output through `midir`

use super::{MidiMessage, MidiSink};
use crate::error::{ControlError, Result};
use midir::{MidiOutput, MidiOutputConnection};
use tracing::info;

const CLIENT_NAME: &str = "ShowFlow";

/// Sends cue messages to a hardware or virtual MIDI port
pub struct MidiOutputSink {
    conn: MidiOutputConnection,
    port_name: String,
}

impl MidiOutputSink {
    /// Names of the available output ports
    pub fn list_ports() -> Result<Vec<String>> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;
        Ok(midi_out
            .ports()
            .iter()
            .map(|port| {
                midi_out
                    .port_name(port)
                    .unwrap_or_else(|_| "Unknown".to_string())
            })
            .collect())
    }

    /// Connect to the first port whose name contains `filter`
    pub fn connect(filter: &str) -> Result<Self> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;
        let ports = midi_out.ports();
        let (port, port_name) = ports
            .iter()
            .find_map(|port| {
                let name = midi_out.port_name(port).ok()?;
                name.contains(filter).then(|| (port.clone(), name))
            })
            .ok_or_else(|| ControlError::PortNotFound(filter.to_string()))?;

        let conn = midi_out
            .connect(&port, "showflow-out")
            .map_err(|e| ControlError::MidiError(e.to_string()))?;
        info!(port = %port_name, "Connected MIDI output");
        Ok(Self { conn, port_name })
    }
}

impl MidiSink for MidiOutputSink {
    fn send(&mut self, message: &MidiMessage) -> Result<()> {
        message.validate()?;
        self.conn.send(&message.to_bytes())?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.port_name
    }
}
