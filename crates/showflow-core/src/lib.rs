//! ShowFlow Core - Show Playback Engine
//!
//! This crate contains the playback engine behind ShowFlow, including:
//! - Position feed normalization (device reports to player observations)
//! - Cue occupancy tracking and lifecycle events
//! - Phrase canvas mapping for elastic phrase triggers
//! - Phrase trigger arbitration by exclusivity tier and weight
//! - Show definitions, engine configuration and logging settings

pub mod arbitration;
pub mod canvas;
pub mod config;
pub mod cue;
pub mod engine;
pub mod error;
pub mod event;
pub mod feed;
pub mod logging;
pub mod observation;
pub mod occupancy;
pub mod show;
pub mod trigger;

// --- Re-exports grouped by category ---

// Input
pub use feed::{
    BeatReport, DeviceReport, NoMetadata, PositionFeedAdapter, StaticMetadata, StatusReport,
    TrackAnalysis, TrackMetadata,
};
pub use observation::{
    CuePosition, PhraseInfo, PhraseType, PlayerId, PlayerObservation, ReportKind, TrackBank,
    TrackSignature,
};

// Show model
pub use cue::{BeatRange, Cue, CueMessage, CueMessages, LateMessage, MessageKind};
pub use show::{CueId, Show, ShowFile, ShowId, ShowRegistry, Track, TrackId, TriggerId};
pub use trigger::{
    CustomRule, Enablement, EnablementRule, Exclusivity, PhraseFilter, PhraseTrigger,
    TriggerContext, Weight,
};

// Engine
pub use arbitration::{
    arbitrate, weighted_pick, ActivationPlan, Arbiter, Candidate, DrawSource, RandomDraw,
    SequenceDraw,
};
pub use canvas::{map_phrase, CanvasMap, SectionLayout, BEATS_PER_BAR};
pub use engine::{ActivePhraseBinding, PhraseKey, ShowEngine};
pub use event::{CueOwner, EventKind, LifecycleEvent, StartClass, Subject};
pub use occupancy::{CueRuntimeState, OccupancySnapshot, OccupancyTracker};

// Configuration & Errors
pub use config::{DispatcherSettings, EngineConfig};
pub use error::{Result, ShowError};
pub use logging::LogConfig;
