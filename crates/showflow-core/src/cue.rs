//! Cues - user-authored beat ranges with configurable messages
//!
//! A cue lives either on a track (absolute track beats) or on a phrase
//! trigger canvas (canvas beats). Its range is half-open: `[start, end)`.

use crate::error::{Result, ShowError};
use crate::event::StartClass;
use crate::show::CueId;
use serde::{Deserialize, Serialize};

/// Half-open beat range `[start, end)` with `end > start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BeatRangeDef", into = "BeatRangeDef")]
pub struct BeatRange {
    start: u32,
    end: u32,
}

#[derive(Serialize, Deserialize)]
struct BeatRangeDef {
    start: u32,
    end: u32,
}

impl TryFrom<BeatRangeDef> for BeatRange {
    type Error = ShowError;

    fn try_from(def: BeatRangeDef) -> Result<Self> {
        BeatRange::new(def.start, def.end)
    }
}

impl From<BeatRange> for BeatRangeDef {
    fn from(range: BeatRange) -> Self {
        Self {
            start: range.start,
            end: range.end,
        }
    }
}

impl BeatRange {
    /// Create a range, rejecting `end <= start`
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if end <= start {
            return Err(ShowError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Range of `len` beats from `start`; an empty length still spans one beat
    pub(crate) fn spanning(start: u32, len: u32) -> Self {
        Self {
            start,
            end: start + len.max(1),
        }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    /// Never true; kept for clippy's `len_without_is_empty`
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, beat: u32) -> bool {
        beat >= self.start && beat < self.end
    }
}

/// What a configured message sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Note On at the opening event, Note Off at the closing event
    Note,
    /// Control Change 127 at the opening event, 0 at the closing event
    ControlChange,
    /// No MIDI; only registered callbacks run
    Custom,
}

/// One configured message (MIDI channel 1-16, note/controller 0-127)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CueMessage {
    pub kind: MessageKind,
    #[serde(default)]
    pub number: u8,
    #[serde(default = "default_channel")]
    pub channel: u8,
}

fn default_channel() -> u8 {
    1
}

impl CueMessage {
    pub fn note(number: u8, channel: u8) -> Result<Self> {
        Self {
            kind: MessageKind::Note,
            number,
            channel,
        }
        .validated()
    }

    pub fn control_change(number: u8, channel: u8) -> Result<Self> {
        Self {
            kind: MessageKind::ControlChange,
            number,
            channel,
        }
        .validated()
    }

    pub fn custom() -> Self {
        Self {
            kind: MessageKind::Custom,
            number: 0,
            channel: 1,
        }
    }

    /// Check channel and number bounds
    pub fn validate(&self) -> Result<()> {
        if !(1..=16).contains(&self.channel) {
            return Err(ShowError::InvalidMessage(format!(
                "channel {} outside 1-16",
                self.channel
            )));
        }
        if self.number > 127 {
            return Err(ShowError::InvalidMessage(format!(
                "number {} outside 0-127",
                self.number
            )));
        }
        Ok(())
    }

    fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

/// Message for the Started-Late/Ended pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateMessage {
    #[default]
    None,
    /// Reuse the on-beat configuration
    SameAsOnBeat,
    Message(CueMessage),
}

/// Per-event message configuration; `None` means no action configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CueMessages {
    /// Entered / Exited
    #[serde(default)]
    pub entered: Option<CueMessage>,
    /// Started-On-Beat / Ended
    #[serde(default)]
    pub on_beat: Option<CueMessage>,
    /// Started-Late / Ended
    #[serde(default)]
    pub late: LateMessage,
}

impl CueMessages {
    /// Message governing a started episode of the given class
    pub fn for_start(&self, class: StartClass) -> Option<CueMessage> {
        match class {
            StartClass::OnBeat => self.on_beat,
            StartClass::Late => match self.late {
                LateMessage::None => None,
                LateMessage::SameAsOnBeat => self.on_beat,
                LateMessage::Message(message) => Some(message),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(message) = &self.entered {
            message.validate()?;
        }
        if let Some(message) = &self.on_beat {
            message.validate()?;
        }
        if let LateMessage::Message(message) = &self.late {
            message.validate()?;
        }
        Ok(())
    }
}

/// A named beat range owned by a track or phrase trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub id: CueId,
    pub name: String,
    pub range: BeatRange,
    #[serde(default)]
    pub messages: CueMessages,
}

impl Cue {
    /// Create a cue over `[start, end)`
    pub fn new(id: CueId, name: impl Into<String>, start: u32, end: u32) -> Result<Self> {
        Ok(Self {
            id,
            name: name.into(),
            range: BeatRange::new(start, end)?,
            messages: CueMessages::default(),
        })
    }

    /// Attach message configuration, validating it
    pub fn with_messages(mut self, messages: CueMessages) -> Result<Self> {
        messages.validate()?;
        self.messages = messages;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_rejects_empty_and_inverted() {
        assert!(BeatRange::new(17, 33).is_ok());
        assert!(matches!(
            BeatRange::new(33, 33),
            Err(ShowError::InvalidRange { start: 33, end: 33 })
        ));
        assert!(BeatRange::new(40, 10).is_err());
    }

    #[test]
    fn test_range_is_half_open() {
        let range = BeatRange::new(17, 33).unwrap();
        assert!(!range.contains(16));
        assert!(range.contains(17));
        assert!(range.contains(32));
        assert!(!range.contains(33));
        assert_eq!(range.len(), 16);
    }

    #[test]
    fn test_range_deserialization_validates() {
        let ok: BeatRange = serde_json::from_str(r#"{"start":1,"end":5}"#).unwrap();
        assert_eq!(ok.end(), 5);

        let err = serde_json::from_str::<BeatRange>(r#"{"start":5,"end":1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_message_bounds() {
        assert!(CueMessage::note(60, 1).is_ok());
        assert!(CueMessage::note(60, 0).is_err());
        assert!(CueMessage::note(60, 17).is_err());
        assert!(CueMessage::control_change(128, 1).is_err());
    }

    #[test]
    fn test_late_message_resolution() {
        let on_beat = CueMessage::note(36, 1).unwrap();
        let mut messages = CueMessages {
            on_beat: Some(on_beat),
            ..Default::default()
        };
        assert_eq!(messages.for_start(StartClass::OnBeat), Some(on_beat));
        assert_eq!(messages.for_start(StartClass::Late), None);

        messages.late = LateMessage::SameAsOnBeat;
        assert_eq!(messages.for_start(StartClass::Late), Some(on_beat));

        let late = CueMessage::control_change(20, 2).unwrap();
        messages.late = LateMessage::Message(late);
        assert_eq!(messages.for_start(StartClass::Late), Some(late));
    }
}
