//! Lifecycle events emitted by the occupancy tracker

use crate::observation::PlayerId;
use crate::show::{CueId, TrackId, TriggerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Owner of a cue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CueOwner {
    Track(TrackId),
    Trigger(TriggerId),
}

/// Something with its own occupancy state: a cue, or a phrase trigger as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Cue { owner: CueOwner, cue: CueId },
    Trigger(TriggerId),
}

impl Subject {
    pub fn track_cue(track: TrackId, cue: CueId) -> Self {
        Self::Cue {
            owner: CueOwner::Track(track),
            cue,
        }
    }

    pub fn trigger_cue(trigger: TriggerId, cue: CueId) -> Self {
        Self::Cue {
            owner: CueOwner::Trigger(trigger),
            cue,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cue {
                owner: CueOwner::Track(track),
                cue,
            } => write!(f, "track {} cue {}", track, cue),
            Self::Cue {
                owner: CueOwner::Trigger(trigger),
                cue,
            } => write!(f, "trigger {} cue {}", trigger, cue),
            Self::Trigger(trigger) => write!(f, "trigger {}", trigger),
        }
    }
}

/// Lifecycle transition kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Entered,
    Exited,
    StartedOnBeat,
    StartedLate,
    Ended,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Entered => "Entered",
            Self::Exited => "Exited",
            Self::StartedOnBeat => "Started-On-Beat",
            Self::StartedLate => "Started-Late",
            Self::Ended => "Ended",
        };
        write!(f, "{}", name)
    }
}

/// How a started episode began
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartClass {
    OnBeat,
    Late,
}

impl StartClass {
    pub fn started_kind(self) -> EventKind {
        match self {
            Self::OnBeat => EventKind::StartedOnBeat,
            Self::Late => EventKind::StartedLate,
        }
    }
}

/// One logical transition, delivered exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub subject: Subject,
    pub player: PlayerId,
    /// Beat (in the subject's coordinate space) that caused the transition
    pub beat: Option<u32>,
    /// Class of the episode, set on Started and Ended events
    pub class: Option<StartClass>,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Whether this event opens a pair (Entered / Started)
    pub fn is_opening(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Entered | EventKind::StartedOnBeat | EventKind::StartedLate
        )
    }
}
