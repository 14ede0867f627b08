//! Show Playback Engine
//!
//! [`ShowEngine`] routes every [`PlayerObservation`] to the cues it can
//! affect:
//!
//! - track cues see the track beat when the player has the track loaded,
//! - a newly detected phrase runs trigger arbitration, and each activated
//!   trigger gets an [`ActivePhraseBinding`] for that player,
//! - bound triggers see the canvas position produced by the canvas mapper,
//!   and the trigger itself is tracked as a whole-phrase cue.
//!
//! Show edits may run concurrently with playback. Anything removed or
//! disabled closes its open occupancy with terminal events first.
//!
//! # Locking
//!
//! `process` holds the player's state lock, then the registry read lock, then
//! individual cue locks. Edits hold the registry write lock and cue locks,
//! and only touch player state after releasing the registry.

use crate::arbitration::{ActivationPlan, Arbiter, Candidate, DrawSource, RandomDraw};
use crate::canvas::{map_phrase, CanvasMap};
use crate::cue::{BeatRange, Cue};
use crate::error::{Result, ShowError};
use crate::event::{LifecycleEvent, Subject};
use crate::observation::{CuePosition, PhraseInfo, PlayerId, PlayerObservation, TrackSignature};
use crate::occupancy::{OccupancySnapshot, OccupancyTracker};
use crate::show::{CueId, Show, ShowId, ShowRegistry, Track, TrackId, TriggerId};
use crate::trigger::{Enablement, PhraseTrigger, TriggerContext};
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Range used for a trigger's whole-phrase cue, in phrase-relative beats
fn whole_phrase() -> BeatRange {
    BeatRange::spanning(1, u32::MAX - 1)
}

/// Identity of one phrase instance on one player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseKey {
    pub track: Option<TrackSignature>,
    pub start_beat: u32,
    pub end_beat: u32,
}

/// A player's current phrase, bound to a trigger that won it
#[derive(Debug, Clone, PartialEq)]
pub struct ActivePhraseBinding {
    pub player: PlayerId,
    pub show: ShowId,
    pub trigger: TriggerId,
    pub phrase: PhraseInfo,
    pub canvas: CanvasMap,
}

#[derive(Debug)]
struct PhraseEpisode {
    key: PhraseKey,
    bindings: Vec<ActivePhraseBinding>,
}

#[derive(Debug, Default)]
struct PlayerState {
    last_sequence: Option<u64>,
    phrase: Option<PhraseEpisode>,
    /// Outcome of the most recent arbitration
    plan: Option<ActivationPlan>,
}

/// The show playback engine
pub struct ShowEngine {
    registry: RwLock<ShowRegistry>,
    tracker: OccupancyTracker,
    arbiter: Arbiter,
    players: RwLock<HashMap<PlayerId, Arc<Mutex<PlayerState>>>>,
}

impl ShowEngine {
    /// Engine that only returns events
    pub fn new(draw: Box<dyn DrawSource>) -> Self {
        Self::with_tracker(OccupancyTracker::new(), draw)
    }

    /// Engine that also publishes every event for dispatch
    pub fn with_publisher(draw: Box<dyn DrawSource>, publisher: Sender<LifecycleEvent>) -> Self {
        Self::with_tracker(OccupancyTracker::with_publisher(publisher), draw)
    }

    fn with_tracker(tracker: OccupancyTracker, draw: Box<dyn DrawSource>) -> Self {
        Self {
            registry: RwLock::new(ShowRegistry::new()),
            tracker,
            arbiter: Arbiter::new(draw),
            players: RwLock::new(HashMap::new()),
        }
    }

    fn player_slot(&self, player: PlayerId) -> Arc<Mutex<PlayerState>> {
        if let Some(slot) = self.players.read().get(&player) {
            return slot.clone();
        }
        self.players.write().entry(player).or_default().clone()
    }

    /// Process one observation and return the events it caused, in order
    pub fn process(&self, obs: &PlayerObservation) -> Vec<LifecycleEvent> {
        let slot = self.player_slot(obs.player);
        let mut player = slot.lock();
        if player
            .last_sequence
            .is_some_and(|last| obs.sequence <= last)
        {
            trace!(player = obs.player, sequence = obs.sequence, "Stale observation ignored");
            return Vec::new();
        }
        player.last_sequence = Some(obs.sequence);

        let registry = self.registry.read();
        let position = obs.position();
        let mut events = Vec::new();

        for show in registry.shows() {
            for track in &show.tracks {
                let loaded = track.enabled && obs.track.as_deref() == Some(track.signature.as_str());
                let track_position = position.with_beat(if loaded { obs.beat } else { None });
                for cue in &track.cues {
                    events.extend(self.tracker.observe(
                        Subject::track_cue(track.id, cue.id),
                        cue.range,
                        obs.player,
                        &track_position,
                    ));
                }
            }
        }

        let current = obs.current_phrase().copied();
        let key = current.map(|phrase| PhraseKey {
            track: obs.track.clone(),
            start_beat: phrase.start_beat,
            end_beat: phrase.end_beat,
        });
        if player.phrase.as_ref().map(|episode| &episode.key) != key.as_ref() {
            if let Some(ended) = player.phrase.take() {
                events.extend(self.release_bindings(&registry, &ended.bindings, obs.received_at));
            }
            if let (Some(phrase), Some(key)) = (current, key) {
                let (plan, bindings) = self.start_phrase(&registry, obs, phrase);
                player.plan = Some(plan);
                player.phrase = Some(PhraseEpisode { key, bindings });
            }
        }

        if let Some(episode) = &player.phrase {
            for binding in &episode.bindings {
                events.extend(self.feed_binding(&registry, binding, &position, obs.beat));
            }
        }

        events
    }

    /// Arbitrate a newly detected phrase and bind the winners
    fn start_phrase(
        &self,
        registry: &ShowRegistry,
        obs: &PlayerObservation,
        phrase: PhraseInfo,
    ) -> (ActivationPlan, Vec<ActivePhraseBinding>) {
        let mut candidates = Vec::new();
        let mut canvases: BTreeMap<TriggerId, (ShowId, CanvasMap)> = BTreeMap::new();

        for show in registry.shows() {
            for trigger in &show.triggers {
                let Some(canvas) = map_phrase(&trigger.layout, &phrase) else {
                    continue;
                };
                let ctx = TriggerContext {
                    show: show.id,
                    trigger: trigger.id,
                    player: obs.player,
                    phrase: &phrase,
                    track: obs.track.as_deref(),
                    tempo: obs.tempo,
                };
                if let Enablement::Enabled(weight) = trigger.evaluate(&ctx) {
                    candidates.push(Candidate {
                        show: show.id,
                        trigger: trigger.id,
                        exclusivity: trigger.exclusivity,
                        weight,
                    });
                    canvases.insert(trigger.id, (show.id, canvas));
                }
            }
        }

        let plan = self.arbiter.arbitrate(&candidates, &registry.show_ids());
        let bindings: Vec<ActivePhraseBinding> = plan
            .activated()
            .into_iter()
            .filter_map(|trigger| {
                canvases.get(&trigger).map(|(show, canvas)| ActivePhraseBinding {
                    player: obs.player,
                    show: *show,
                    trigger,
                    phrase,
                    canvas: *canvas,
                })
            })
            .collect();

        for binding in &bindings {
            debug!(
                player = binding.player,
                trigger = binding.trigger,
                loop_passes = binding.canvas.loop_passes(),
                loop_eliminated = binding.canvas.loop_eliminated(),
                "Trigger bound to phrase"
            );
        }
        info!(
            player = obs.player,
            phrase = %phrase.phrase_type,
            start_beat = phrase.start_beat,
            candidates = candidates.len(),
            activated = ?plan.activated(),
            "Phrase started"
        );
        (plan, bindings)
    }

    fn feed_binding(
        &self,
        registry: &ShowRegistry,
        binding: &ActivePhraseBinding,
        position: &CuePosition,
        track_beat: Option<u32>,
    ) -> Vec<LifecycleEvent> {
        // Removed or disabled triggers were already closed by the edit
        let Some(trigger) = registry.find_trigger(binding.trigger) else {
            return Vec::new();
        };
        if !trigger.enabled {
            return Vec::new();
        }

        let mut events = self.tracker.observe(
            Subject::Trigger(trigger.id),
            whole_phrase(),
            binding.player,
            &position.with_beat(track_beat.and_then(|b| binding.canvas.phrase_beat(b))),
        );
        let canvas_position = position.with_beat(track_beat.and_then(|b| binding.canvas.position(b)));
        for cue in &trigger.cues {
            events.extend(self.tracker.observe(
                Subject::trigger_cue(trigger.id, cue.id),
                cue.range,
                binding.player,
                &canvas_position,
            ));
        }
        events
    }

    fn release_bindings(
        &self,
        registry: &ShowRegistry,
        bindings: &[ActivePhraseBinding],
        at: DateTime<Utc>,
    ) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        for binding in bindings {
            let Some(trigger) = registry.find_trigger(binding.trigger) else {
                continue;
            };
            // Contents close before the trigger itself
            for cue in &trigger.cues {
                events.extend(self.tracker.release(
                    Subject::trigger_cue(trigger.id, cue.id),
                    binding.player,
                    at,
                ));
            }
            events.extend(
                self.tracker
                    .release(Subject::Trigger(trigger.id), binding.player, at),
            );
            debug!(player = binding.player, trigger = trigger.id, "Phrase binding released");
        }
        events
    }

    /// A player vanished from the network: treat its position as unknown
    /// everywhere and forget its phrase.
    pub fn player_lost(&self, player: PlayerId) -> Vec<LifecycleEvent> {
        let removed = self.players.write().remove(&player);
        // Wait for any in-flight observation of this player
        let _guard = removed.as_ref().map(|slot| slot.lock());
        let events = self.tracker.release_player(player, Utc::now());
        info!(player, closed = events.len(), "Player lost");
        events
    }

    /// Open a show; its triggers compete from the next phrase onwards
    pub fn open_show(&self, show: Show) -> Result<()> {
        let id = show.id;
        let name = show.name.clone();
        self.registry.write().open(show)?;
        info!(show = id, name = %name, "Show opened");
        Ok(())
    }

    /// Close a show, synthesizing terminal events for everything it held
    pub fn close_show(&self, id: ShowId) -> Result<Vec<LifecycleEvent>> {
        let now = Utc::now();
        let (events, triggers) = {
            let mut registry = self.registry.write();
            let show = registry.close(id)?;
            let mut events = Vec::new();
            for track in &show.tracks {
                events.extend(self.remove_track_cues(track, now));
            }
            for trigger in &show.triggers {
                events.extend(self.remove_trigger_state(trigger, now));
            }
            let triggers: Vec<TriggerId> = show.triggers.iter().map(|t| t.id).collect();
            (events, triggers)
        };
        self.prune_bindings(|binding| triggers.contains(&binding.trigger));
        info!(show = id, closed = events.len(), "Show closed");
        Ok(events)
    }

    pub fn add_track(&self, show: ShowId, track: Track) -> Result<()> {
        track.validate()?;
        let mut registry = self.registry.write();
        if registry.find_track(track.id).is_some() {
            return Err(ShowError::DuplicateId(format!("track {}", track.id)));
        }
        registry.show_mut(show)?.tracks.push(track);
        Ok(())
    }

    pub fn remove_track(&self, id: TrackId) -> Result<Vec<LifecycleEvent>> {
        let mut registry = self.registry.write();
        let show = registry
            .shows()
            .find(|s| s.track(id).is_some())
            .map(|s| s.id)
            .ok_or(ShowError::TrackNotFound(id))?;
        let tracks = &mut registry.show_mut(show)?.tracks;
        let index = tracks
            .iter()
            .position(|t| t.id == id)
            .ok_or(ShowError::TrackNotFound(id))?;
        let track = tracks.remove(index);
        Ok(self.remove_track_cues(&track, Utc::now()))
    }

    /// Enable or disable a track; disabling closes its occupied cues
    pub fn set_track_enabled(&self, id: TrackId, enabled: bool) -> Result<Vec<LifecycleEvent>> {
        let mut registry = self.registry.write();
        let track = registry.track_mut(id)?;
        if track.enabled == enabled {
            return Ok(Vec::new());
        }
        track.enabled = enabled;
        if enabled {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let mut events = Vec::new();
        for cue in &track.cues {
            events.extend(self.tracker.terminate(Subject::track_cue(track.id, cue.id), now));
        }
        debug!(track = id, closed = events.len(), "Track disabled");
        Ok(events)
    }

    pub fn add_trigger(&self, show: ShowId, mut trigger: PhraseTrigger) -> Result<()> {
        trigger.validate()?;
        let mut registry = self.registry.write();
        if registry.find_trigger(trigger.id).is_some() {
            return Err(ShowError::DuplicateId(format!("trigger {}", trigger.id)));
        }
        trigger.show = show;
        registry.show_mut(show)?.triggers.push(trigger);
        Ok(())
    }

    pub fn remove_trigger(&self, id: TriggerId) -> Result<Vec<LifecycleEvent>> {
        let events = {
            let mut registry = self.registry.write();
            let show = registry
                .find_trigger(id)
                .map(|t| t.show)
                .ok_or(ShowError::TriggerNotFound(id))?;
            let triggers = &mut registry.show_mut(show)?.triggers;
            let index = triggers
                .iter()
                .position(|t| t.id == id)
                .ok_or(ShowError::TriggerNotFound(id))?;
            let trigger = triggers.remove(index);
            self.remove_trigger_state(&trigger, Utc::now())
        };
        self.prune_bindings(|binding| binding.trigger == id);
        Ok(events)
    }

    /// Enable or disable a trigger. A disabled trigger stops competing and
    /// closes everything it holds open; bindings resume if it is re-enabled
    /// within the same phrase.
    pub fn set_trigger_enabled(&self, id: TriggerId, enabled: bool) -> Result<Vec<LifecycleEvent>> {
        let mut registry = self.registry.write();
        let trigger = registry.trigger_mut(id)?;
        if trigger.enabled == enabled {
            return Ok(Vec::new());
        }
        trigger.enabled = enabled;
        if enabled {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let mut events = Vec::new();
        for cue in &trigger.cues {
            events.extend(self.tracker.terminate(Subject::trigger_cue(trigger.id, cue.id), now));
        }
        events.extend(self.tracker.terminate(Subject::Trigger(trigger.id), now));
        debug!(trigger = id, closed = events.len(), "Trigger disabled");
        Ok(events)
    }

    pub fn add_track_cue(&self, track: TrackId, cue: Cue) -> Result<()> {
        self.registry.write().track_mut(track)?.add_cue(cue)
    }

    pub fn add_trigger_cue(&self, trigger: TriggerId, cue: Cue) -> Result<()> {
        self.registry.write().trigger_mut(trigger)?.add_cue(cue)
    }

    /// Remove a track cue, closing its occupancy first
    pub fn remove_track_cue(&self, track: TrackId, cue: CueId) -> Result<Vec<LifecycleEvent>> {
        let mut registry = self.registry.write();
        registry
            .track_mut(track)?
            .take_cue(cue)
            .ok_or(ShowError::CueNotFound(cue))?;
        Ok(self.tracker.remove(Subject::track_cue(track, cue), Utc::now()))
    }

    /// Remove a trigger cue, closing its occupancy first
    pub fn remove_trigger_cue(&self, trigger: TriggerId, cue: CueId) -> Result<Vec<LifecycleEvent>> {
        let mut registry = self.registry.write();
        registry
            .trigger_mut(trigger)?
            .take_cue(cue)
            .ok_or(ShowError::CueNotFound(cue))?;
        Ok(self.tracker.remove(Subject::trigger_cue(trigger, cue), Utc::now()))
    }

    fn remove_track_cues(&self, track: &Track, at: DateTime<Utc>) -> Vec<LifecycleEvent> {
        track
            .cues
            .iter()
            .flat_map(|cue| self.tracker.remove(Subject::track_cue(track.id, cue.id), at))
            .collect()
    }

    fn remove_trigger_state(&self, trigger: &PhraseTrigger, at: DateTime<Utc>) -> Vec<LifecycleEvent> {
        let mut events: Vec<LifecycleEvent> = trigger
            .cues
            .iter()
            .flat_map(|cue| self.tracker.remove(Subject::trigger_cue(trigger.id, cue.id), at))
            .collect();
        events.extend(self.tracker.remove(Subject::Trigger(trigger.id), at));
        events
    }

    fn prune_bindings(&self, removed: impl Fn(&ActivePhraseBinding) -> bool) {
        let slots: Vec<Arc<Mutex<PlayerState>>> = self.players.read().values().cloned().collect();
        for slot in slots {
            let mut player = slot.lock();
            if let Some(episode) = player.phrase.as_mut() {
                let before = episode.bindings.len();
                episode.bindings.retain(|b| !removed(b));
                let pruned = before - episode.bindings.len();
                if pruned > 0 {
                    debug!(pruned, "Pruned phrase bindings");
                }
            }
        }
    }

    /// Most recent arbitration outcome for a player
    pub fn activation(&self, player: PlayerId) -> Option<ActivationPlan> {
        let slot = self.players.read().get(&player).cloned()?;
        let plan = slot.lock().plan.clone();
        plan
    }

    /// Triggers currently bound to a player's phrase
    pub fn bindings(&self, player: PlayerId) -> Vec<ActivePhraseBinding> {
        let Some(slot) = self.players.read().get(&player).cloned() else {
            return Vec::new();
        };
        let state = slot.lock();
        state
            .phrase
            .as_ref()
            .map(|episode| episode.bindings.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, subject: &Subject) -> Option<OccupancySnapshot> {
        self.tracker.snapshot(subject)
    }

    /// Events lost because the dispatch queue was full
    pub fn dropped_events(&self) -> u64 {
        self.tracker.dropped_events()
    }

    /// Read access to the open shows
    pub fn with_registry<R>(&self, f: impl FnOnce(&ShowRegistry) -> R) -> R {
        f(&self.registry.read())
    }
}

impl Default for ShowEngine {
    fn default() -> Self {
        Self::new(Box::new(RandomDraw::new()))
    }
}

impl std::fmt::Debug for ShowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShowEngine")
            .field("shows", &self.registry.read().show_ids())
            .field("players", &self.players.read().len())
            .finish_non_exhaustive()
    }
}
