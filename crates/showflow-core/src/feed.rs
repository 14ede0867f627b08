//! Position Feed Adapter
//!
//! Turns raw per-player beat and status reports into [`PlayerObservation`]s.
//! The adapter assigns the per-player sequence number, remembers which track
//! each player has loaded, and fills gaps (missing beat numbers, phrase
//! analysis) from a [`TrackMetadata`] collaborator.

use crate::observation::{PhraseInfo, PlayerId, PlayerObservation, ReportKind, TrackSignature};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Regular playback status from a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub player: PlayerId,
    pub playing: bool,
    #[serde(default)]
    pub beat: Option<u32>,
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
    /// `None` when nothing is loaded
    #[serde(default)]
    pub track: Option<TrackSignature>,
    #[serde(default)]
    pub tempo: Option<f64>,
}

/// Sent as a player reaches a beat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatReport {
    pub player: PlayerId,
    #[serde(default)]
    pub beat: Option<u32>,
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
    #[serde(default)]
    pub tempo: Option<f64>,
}

/// Raw report as decoded from the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceReport {
    Beat(BeatReport),
    Status(StatusReport),
}

impl DeviceReport {
    pub fn player(&self) -> PlayerId {
        match self {
            Self::Beat(report) => report.player,
            Self::Status(report) => report.player,
        }
    }
}

/// Beat grid and phrase analysis for loaded tracks
pub trait TrackMetadata: Send + Sync {
    /// Beat number at a track-relative time
    fn beat_at(&self, track: &str, elapsed_ms: u64) -> Option<u32>;

    /// Phrase containing a beat
    fn phrase_at(&self, track: &str, beat: u32) -> Option<PhraseInfo>;
}

/// Metadata source that knows nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetadata;

impl TrackMetadata for NoMetadata {
    fn beat_at(&self, _track: &str, _elapsed_ms: u64) -> Option<u32> {
        None
    }

    fn phrase_at(&self, _track: &str, _beat: u32) -> Option<PhraseInfo> {
        None
    }
}

/// Analysis of one track: a constant-tempo grid plus its phrases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackAnalysis {
    pub bpm: f64,
    /// Time of beat 1
    #[serde(default)]
    pub first_beat_ms: u64,
    #[serde(default)]
    pub phrases: Vec<PhraseInfo>,
}

impl TrackAnalysis {
    pub fn beat_at(&self, elapsed_ms: u64) -> Option<u32> {
        if self.bpm <= 0.0 || elapsed_ms < self.first_beat_ms {
            return None;
        }
        let beat_ms = 60_000.0 / self.bpm;
        let index = ((elapsed_ms - self.first_beat_ms) as f64 / beat_ms).floor();
        u32::try_from(index as u64).ok().map(|i| i.saturating_add(1))
    }

    pub fn phrase_at(&self, beat: u32) -> Option<PhraseInfo> {
        self.phrases
            .iter()
            .find(|p| p.is_valid() && p.contains(beat))
            .copied()
    }
}

/// Metadata from a fixed table of analyses
#[derive(Debug, Clone, Default)]
pub struct StaticMetadata {
    tracks: HashMap<TrackSignature, TrackAnalysis>,
}

impl StaticMetadata {
    pub fn new(tracks: HashMap<TrackSignature, TrackAnalysis>) -> Self {
        Self { tracks }
    }

    pub fn insert(&mut self, track: impl Into<TrackSignature>, analysis: TrackAnalysis) {
        self.tracks.insert(track.into(), analysis);
    }
}

impl TrackMetadata for StaticMetadata {
    fn beat_at(&self, track: &str, elapsed_ms: u64) -> Option<u32> {
        self.tracks.get(track)?.beat_at(elapsed_ms)
    }

    fn phrase_at(&self, track: &str, beat: u32) -> Option<PhraseInfo> {
        self.tracks.get(track)?.phrase_at(beat)
    }
}

#[derive(Debug, Default)]
struct FeedState {
    sequence: u64,
    track: Option<TrackSignature>,
    tempo: Option<f64>,
}

/// Normalizes device reports into observations
pub struct PositionFeedAdapter {
    metadata: Arc<dyn TrackMetadata>,
    players: Mutex<HashMap<PlayerId, FeedState>>,
}

impl PositionFeedAdapter {
    pub fn new(metadata: Arc<dyn TrackMetadata>) -> Self {
        Self {
            metadata,
            players: Mutex::new(HashMap::new()),
        }
    }

    /// Normalize a report received now
    pub fn ingest(&self, report: DeviceReport) -> PlayerObservation {
        self.ingest_at(report, Utc::now())
    }

    /// Normalize a report received at `received_at`
    pub fn ingest_at(&self, report: DeviceReport, received_at: DateTime<Utc>) -> PlayerObservation {
        let player = report.player();
        let mut players = self.players.lock();
        let state = players.entry(player).or_default();
        state.sequence += 1;

        let (kind, playing, beat, elapsed_ms, tempo) = match report {
            DeviceReport::Status(status) => {
                if state.track != status.track {
                    debug!(player, track = ?status.track, "Player loaded new content");
                }
                state.track = status.track;
                (
                    ReportKind::Status,
                    status.playing,
                    status.beat,
                    status.elapsed_ms,
                    status.tempo,
                )
            }
            // A beat report only arrives while playing
            DeviceReport::Beat(beat) => (
                ReportKind::Beat,
                true,
                beat.beat,
                beat.elapsed_ms,
                beat.tempo,
            ),
        };
        if tempo.is_some() {
            state.tempo = tempo;
        }

        let track = state.track.clone();
        let beat = match (beat, elapsed_ms, track.as_deref()) {
            (Some(beat), _, _) => Some(beat),
            (None, Some(elapsed), Some(track)) => self.metadata.beat_at(track, elapsed),
            _ => None,
        };
        let phrase = match (beat, track.as_deref()) {
            (Some(beat), Some(track)) => self.metadata.phrase_at(track, beat),
            _ => None,
        };

        let observation = PlayerObservation {
            player,
            sequence: state.sequence,
            kind,
            playing,
            beat,
            elapsed_ms,
            track,
            tempo: state.tempo,
            phrase,
            received_at,
        };
        trace!(
            player,
            sequence = observation.sequence,
            ?kind,
            beat = ?observation.beat,
            "Normalized device report"
        );
        observation
    }

    /// Drop everything known about a player that left the network
    pub fn forget_player(&self, player: PlayerId) {
        if self.players.lock().remove(&player).is_some() {
            debug!(player, "Forgot player feed state");
        }
    }
}

impl Default for PositionFeedAdapter {
    fn default() -> Self {
        Self::new(Arc::new(NoMetadata))
    }
}
