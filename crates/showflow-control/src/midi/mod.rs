//! MIDI messages and output sinks

#[cfg(feature = "midi")]
mod output;

#[cfg(feature = "midi")]
pub use output::*;

use crate::error::{ControlError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use showflow_core::{CueMessage, MessageKind};
use std::sync::Arc;
use tracing::info;

/// Velocity used for cue Note On messages
pub const CUE_VELOCITY: u8 = 127;

/// MIDI message types sent by cues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MidiMessage {
    /// Channel is 0-15 on the wire
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
}

impl MidiMessage {
    /// Message for one side of a cue's event pair.
    ///
    /// Notes send Note On when the pair opens and Note Off when it closes;
    /// controllers send 127 and 0. Custom messages have no MIDI form.
    pub fn for_cue(message: &CueMessage, opening: bool) -> Option<Self> {
        let channel = message.channel.saturating_sub(1) & 0x0F;
        match message.kind {
            MessageKind::Note if opening => Some(MidiMessage::NoteOn {
                channel,
                note: message.number,
                velocity: CUE_VELOCITY,
            }),
            MessageKind::Note => Some(MidiMessage::NoteOff {
                channel,
                note: message.number,
            }),
            MessageKind::ControlChange => Some(MidiMessage::ControlChange {
                channel,
                controller: message.number,
                value: if opening { 127 } else { 0 },
            }),
            MessageKind::Custom => None,
        }
    }

    /// Convert to raw MIDI bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => vec![0x90 | channel, *note, *velocity],
            MidiMessage::NoteOff { channel, note } => vec![0x80 | channel, *note, 0],
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => vec![0xB0 | channel, *controller, *value],
        }
    }

    /// Reject channels and data bytes outside the MIDI ranges
    pub fn validate(&self) -> Result<()> {
        let (channel, data) = match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => (channel, [note, velocity]),
            MidiMessage::NoteOff { channel, note } => (channel, [note, 0]),
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => (channel, [controller, value]),
        };
        if channel > 15 || data.iter().any(|b| *b > 127) {
            return Err(ControlError::InvalidMessage(format!("{:?}", self)));
        }
        Ok(())
    }
}

/// Destination for outgoing MIDI
pub trait MidiSink: Send {
    fn send(&mut self, message: &MidiMessage) -> Result<()>;

    /// Name for logs
    fn name(&self) -> &str;
}

/// Logs messages instead of sending them
#[derive(Debug, Default)]
pub struct LoggingSink;

impl MidiSink for LoggingSink {
    fn send(&mut self, message: &MidiMessage) -> Result<()> {
        message.validate()?;
        info!(?message, bytes = ?message.to_bytes(), "MIDI out");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Keeps every message; clones share the same record
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<MidiMessage>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<MidiMessage> {
        self.sent.lock().clone()
    }
}

impl MidiSink for RecordingSink {
    fn send(&mut self, message: &MidiMessage) -> Result<()> {
        message.validate()?;
        self.sent.lock().push(*message);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_pair() {
        let cue = CueMessage::note(36, 10).unwrap();
        let on = MidiMessage::for_cue(&cue, true).unwrap();
        let off = MidiMessage::for_cue(&cue, false).unwrap();
        assert_eq!(on.to_bytes(), vec![0x99, 36, 127]);
        assert_eq!(off.to_bytes(), vec![0x89, 36, 0]);
    }

    #[test]
    fn test_control_change_pair() {
        let cue = CueMessage::control_change(20, 1).unwrap();
        assert_eq!(
            MidiMessage::for_cue(&cue, true),
            Some(MidiMessage::ControlChange {
                channel: 0,
                controller: 20,
                value: 127
            })
        );
        assert_eq!(
            MidiMessage::for_cue(&cue, false).unwrap().to_bytes(),
            vec![0xB0, 20, 0]
        );
        assert_eq!(MidiMessage::for_cue(&CueMessage::custom(), true), None);
    }

    #[test]
    fn test_to_bytes() {
        let message = MidiMessage::NoteOn {
            channel: 3,
            note: 60,
            velocity: 100,
        };
        assert_eq!(message.to_bytes(), vec![0x93, 60, 100]);
    }

    #[test]
    fn test_recording_sink_validates() {
        let sink = RecordingSink::new();
        let mut writer = sink.clone();
        writer
            .send(&MidiMessage::NoteOff {
                channel: 0,
                note: 1,
            })
            .unwrap();
        assert!(writer
            .send(&MidiMessage::NoteOff {
                channel: 16,
                note: 1
            })
            .is_err());
        assert_eq!(sink.messages().len(), 1);
    }
}
