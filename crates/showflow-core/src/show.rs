//! Shows, tracks and the registry of open shows
//!
//! A show groups track cues and phrase triggers. Only open shows take part in
//! playback; closing a show removes its tracks and triggers from the registry.

use crate::cue::Cue;
use crate::error::{Result, ShowError};
use crate::feed::TrackAnalysis;
use crate::observation::TrackSignature;
use crate::trigger::PhraseTrigger;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// Unique show identifier
pub type ShowId = u64;
/// Unique track identifier
pub type TrackId = u64;
/// Unique phrase trigger identifier
pub type TriggerId = u64;
/// Cue identifier, unique within its owner
pub type CueId = u64;

fn default_true() -> bool {
    true
}

/// A track with cues placed on its absolute beat grid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    /// Content this track matches on the players
    pub signature: TrackSignature,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub cues: Vec<Cue>,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>, signature: impl Into<TrackSignature>) -> Self {
        Self {
            id,
            name: name.into(),
            signature: signature.into(),
            enabled: true,
            cues: Vec::new(),
        }
    }

    pub fn add_cue(&mut self, cue: Cue) -> Result<()> {
        self.check_cue(&cue)?;
        self.cues.push(cue);
        Ok(())
    }

    pub fn with_cue(mut self, cue: Cue) -> Result<Self> {
        self.add_cue(cue)?;
        Ok(self)
    }

    pub fn cue(&self, id: CueId) -> Option<&Cue> {
        self.cues.iter().find(|c| c.id == id)
    }

    pub(crate) fn take_cue(&mut self, id: CueId) -> Option<Cue> {
        let index = self.cues.iter().position(|c| c.id == id)?;
        Some(self.cues.remove(index))
    }

    pub(crate) fn check_cue(&self, cue: &Cue) -> Result<()> {
        if self.cue(cue.id).is_some() {
            return Err(ShowError::DuplicateId(format!(
                "cue {} on track {}",
                cue.id, self.id
            )));
        }
        cue.messages.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for cue in &self.cues {
            if !seen.insert(cue.id) {
                return Err(ShowError::DuplicateId(format!(
                    "cue {} on track {}",
                    cue.id, self.id
                )));
            }
            cue.messages.validate()?;
        }
        Ok(())
    }
}

/// A show: tracks with cues plus phrase triggers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Show {
    pub id: ShowId,
    pub name: String,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub triggers: Vec<PhraseTrigger>,
}

impl Show {
    pub fn new(id: ShowId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tracks: Vec::new(),
            triggers: Vec::new(),
        }
    }

    pub fn with_track(mut self, track: Track) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn with_trigger(mut self, mut trigger: PhraseTrigger) -> Self {
        trigger.show = self.id;
        self.triggers.push(trigger);
        self
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn trigger(&self, id: TriggerId) -> Option<&PhraseTrigger> {
        self.triggers.iter().find(|t| t.id == id)
    }

    /// Validate contents and claim ownership of every trigger
    pub fn validate(&mut self) -> Result<()> {
        for track in &self.tracks {
            track.validate()?;
        }
        for trigger in &mut self.triggers {
            trigger.validate()?;
            trigger.show = self.id;
        }
        Ok(())
    }
}

/// On-disk show definitions plus optional track analysis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShowFile {
    #[serde(default)]
    pub shows: Vec<Show>,
    /// Beat grid and phrase analysis keyed by track signature
    #[serde(default)]
    pub analysis: HashMap<TrackSignature, TrackAnalysis>,
}

impl ShowFile {
    /// Load and validate a show file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut file: ShowFile = serde_json::from_str(&content)?;
        file.validate()?;
        Ok(file)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check ids are unique across the whole file
    pub fn validate(&mut self) -> Result<()> {
        let mut registry = ShowRegistry::new();
        for show in &self.shows {
            registry.check_new(show)?;
            registry.shows.insert(show.id, show.clone());
        }
        for show in &mut self.shows {
            show.validate()?;
        }
        Ok(())
    }
}

/// The set of open shows
#[derive(Debug, Clone, Default)]
pub struct ShowRegistry {
    shows: BTreeMap<ShowId, Show>,
}

impl ShowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a show, rejecting ids already used by an open show
    pub fn open(&mut self, mut show: Show) -> Result<()> {
        show.validate()?;
        self.check_new(&show)?;
        self.shows.insert(show.id, show);
        Ok(())
    }

    pub fn close(&mut self, id: ShowId) -> Result<Show> {
        self.shows.remove(&id).ok_or(ShowError::ShowNotFound(id))
    }

    fn check_new(&self, show: &Show) -> Result<()> {
        if self.shows.contains_key(&show.id) {
            return Err(ShowError::DuplicateId(format!("show {}", show.id)));
        }
        let mut tracks = BTreeSet::new();
        for track in &show.tracks {
            if !tracks.insert(track.id) || self.find_track(track.id).is_some() {
                return Err(ShowError::DuplicateId(format!("track {}", track.id)));
            }
        }
        let mut triggers = BTreeSet::new();
        for trigger in &show.triggers {
            if !triggers.insert(trigger.id) || self.find_trigger(trigger.id).is_some() {
                return Err(ShowError::DuplicateId(format!("trigger {}", trigger.id)));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.shows.is_empty()
    }

    pub fn show(&self, id: ShowId) -> Option<&Show> {
        self.shows.get(&id)
    }

    pub(crate) fn show_mut(&mut self, id: ShowId) -> Result<&mut Show> {
        self.shows.get_mut(&id).ok_or(ShowError::ShowNotFound(id))
    }

    /// Open shows in ascending id order
    pub fn shows(&self) -> impl Iterator<Item = &Show> {
        self.shows.values()
    }

    pub fn show_ids(&self) -> Vec<ShowId> {
        self.shows.keys().copied().collect()
    }

    pub fn find_track(&self, id: TrackId) -> Option<&Track> {
        self.shows.values().find_map(|s| s.track(id))
    }

    pub(crate) fn track_mut(&mut self, id: TrackId) -> Result<&mut Track> {
        self.shows
            .values_mut()
            .flat_map(|s| s.tracks.iter_mut())
            .find(|t| t.id == id)
            .ok_or(ShowError::TrackNotFound(id))
    }

    pub fn find_trigger(&self, id: TriggerId) -> Option<&PhraseTrigger> {
        self.shows.values().find_map(|s| s.trigger(id))
    }

    pub(crate) fn trigger_mut(&mut self, id: TriggerId) -> Result<&mut PhraseTrigger> {
        self.shows
            .values_mut()
            .flat_map(|s| s.triggers.iter_mut())
            .find(|t| t.id == id)
            .ok_or(ShowError::TriggerNotFound(id))
    }
}
