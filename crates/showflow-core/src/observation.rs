//! Player observations
//!
//! A [`PlayerObservation`] is the normalized form of one beat or status report
//! from a networked player. Everything above the feed adapter consumes these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Player (device) number on the network
pub type PlayerId = u8;

/// Opaque identity of the content loaded in a player
pub type TrackSignature = String;

/// Which kind of network report produced an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Sent once as the player reaches each beat
    Beat,
    /// Regular sub-second playback status
    Status,
}

/// Analyzed phrase type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhraseType {
    Intro,
    Verse,
    Bridge,
    Chorus,
    Up,
    Down,
    Outro,
}

impl fmt::Display for PhraseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Intro => "Intro",
            Self::Verse => "Verse",
            Self::Bridge => "Bridge",
            Self::Chorus => "Chorus",
            Self::Up => "Up",
            Self::Down => "Down",
            Self::Outro => "Outro",
        };
        write!(f, "{}", name)
    }
}

/// Track bank (analysis style) the phrase analysis was performed with
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TrackBank {
    #[default]
    Default,
    Cool,
    Natural,
    Hot,
    Subtle,
    Warm,
    Vivid,
    Club1,
    Club2,
}

/// One analyzed phrase of a track, in track-relative beats.
///
/// `start_beat` is the first beat of the phrase and `end_beat` the first beat
/// after it. When the analysis found a fill, `fill_start_beat` marks where it
/// begins; the fill runs to `end_beat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhraseInfo {
    pub phrase_type: PhraseType,
    #[serde(default)]
    pub bank: TrackBank,
    pub start_beat: u32,
    pub end_beat: u32,
    #[serde(default)]
    pub fill_start_beat: Option<u32>,
}

impl PhraseInfo {
    /// Create a phrase without a fill
    pub fn new(phrase_type: PhraseType, start_beat: u32, end_beat: u32) -> Self {
        Self {
            phrase_type,
            bank: TrackBank::Default,
            start_beat,
            end_beat,
            fill_start_beat: None,
        }
    }

    /// Mark the beat at which the fill begins
    pub fn with_fill(mut self, fill_start_beat: u32) -> Self {
        self.fill_start_beat = Some(fill_start_beat);
        self
    }

    /// Set the analysis bank
    pub fn with_bank(mut self, bank: TrackBank) -> Self {
        self.bank = bank;
        self
    }

    /// Length in beats
    pub fn len_beats(&self) -> u32 {
        self.end_beat.saturating_sub(self.start_beat)
    }

    /// Length in whole bars
    pub fn bars(&self) -> u32 {
        self.len_beats() / crate::canvas::BEATS_PER_BAR
    }

    /// A phrase with no beats is treated as absent
    pub fn is_valid(&self) -> bool {
        self.end_beat > self.start_beat
    }

    /// Check whether a track beat lies inside the phrase
    pub fn contains(&self, beat: u32) -> bool {
        beat >= self.start_beat && beat < self.end_beat
    }

    /// Fill start if it lies strictly inside the phrase
    pub fn fill_start(&self) -> Option<u32> {
        self.fill_start_beat
            .filter(|fill| *fill > self.start_beat && *fill < self.end_beat)
    }
}

/// Normalized per-player report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerObservation {
    pub player: PlayerId,
    /// Strictly increasing per player
    pub sequence: u64,
    pub kind: ReportKind,
    pub playing: bool,
    /// Track-relative beat number, `None` when the position is unknown
    pub beat: Option<u32>,
    /// Track-relative elapsed time
    pub elapsed_ms: Option<u64>,
    pub track: Option<TrackSignature>,
    /// Effective tempo in beats per minute
    pub tempo: Option<f64>,
    pub phrase: Option<PhraseInfo>,
    pub received_at: DateTime<Utc>,
}

impl PlayerObservation {
    /// Observation produced by a beat report (always playing)
    pub fn beat(player: PlayerId, sequence: u64, beat: u32) -> Self {
        Self {
            player,
            sequence,
            kind: ReportKind::Beat,
            playing: true,
            beat: Some(beat),
            elapsed_ms: None,
            track: None,
            tempo: None,
            phrase: None,
            received_at: Utc::now(),
        }
    }

    /// Observation produced by a status report
    pub fn status(player: PlayerId, sequence: u64, playing: bool, beat: Option<u32>) -> Self {
        Self {
            player,
            sequence,
            kind: ReportKind::Status,
            playing,
            beat,
            elapsed_ms: None,
            track: None,
            tempo: None,
            phrase: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_track(mut self, track: impl Into<TrackSignature>) -> Self {
        self.track = Some(track.into());
        self
    }

    pub fn with_phrase(mut self, phrase: PhraseInfo) -> Self {
        self.phrase = Some(phrase);
        self
    }

    pub fn with_tempo(mut self, tempo: f64) -> Self {
        self.tempo = Some(tempo);
        self
    }

    /// Position as seen by the occupancy tracker
    pub fn position(&self) -> CuePosition {
        CuePosition {
            sequence: self.sequence,
            kind: self.kind,
            playing: self.playing,
            beat: self.beat,
            at: self.received_at,
        }
    }

    /// The phrase the player is currently positioned in, if known
    pub fn current_phrase(&self) -> Option<&PhraseInfo> {
        match (self.phrase.as_ref(), self.beat) {
            (Some(phrase), Some(beat)) if phrase.is_valid() && phrase.contains(beat) => {
                Some(phrase)
            }
            _ => None,
        }
    }
}

/// The part of an observation the occupancy tracker needs, with the beat
/// already translated into the coordinate space of the cue being checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CuePosition {
    pub sequence: u64,
    pub kind: ReportKind,
    pub playing: bool,
    pub beat: Option<u32>,
    pub at: DateTime<Utc>,
}

impl CuePosition {
    /// Same report, different coordinate
    pub fn with_beat(&self, beat: Option<u32>) -> Self {
        Self { beat, ..*self }
    }
}
