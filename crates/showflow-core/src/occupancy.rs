//! Cue Occupancy Tracker
//!
//! Tracks, per cue, which players are positioned inside it (*entered*) and
//! which of those are playing (*started*), and turns changes of those sets
//! into [`LifecycleEvent`]s.
//!
//! Only edges of set emptiness fire events: the first player in fires
//! `Entered` / `Started*`, the last player out fires `Ended` / `Exited`.
//! The first started player decides whether the episode is on-beat or late,
//! and that classification holds until the started set empties again.
//!
//! # Concurrency
//!
//! Each cue's [`CueRuntimeState`] sits behind its own mutex, so different
//! cues are updated in parallel while updates to the same cue are
//! serialized. Events are published while the cue lock is held, which keeps
//! per-cue causal order across feed threads.

use crate::cue::BeatRange;
use crate::event::{EventKind, LifecycleEvent, StartClass, Subject};
use crate::observation::{CuePosition, PlayerId, ReportKind};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-player bookkeeping inside one cue
#[derive(Debug, Clone, Copy, Default)]
struct PlayerMarker {
    last_sequence: Option<u64>,
    /// Most recent beat processed for this player, and which path handled it
    last_beat: Option<(u32, ReportKind)>,
}

/// The current started episode
#[derive(Debug, Clone, Copy)]
struct Episode {
    class: StartClass,
    start_beat: Option<u32>,
}

/// Runtime occupancy of a single cue
#[derive(Debug, Default)]
pub struct CueRuntimeState {
    entered: BTreeSet<PlayerId>,
    started: BTreeSet<PlayerId>,
    episode: Option<Episode>,
    markers: HashMap<PlayerId, PlayerMarker>,
}

impl CueRuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_entered(&self, player: PlayerId) -> bool {
        self.entered.contains(&player)
    }

    pub fn is_started(&self, player: PlayerId) -> bool {
        self.started.contains(&player)
    }

    /// Class of the running episode
    pub fn episode_class(&self) -> Option<StartClass> {
        self.episode.map(|e| e.class)
    }

    /// Beat at which the first current occupant started
    pub fn episode_start_beat(&self) -> Option<u32> {
        self.episode.and_then(|e| e.start_beat)
    }

    fn knows_player(&self, player: PlayerId) -> bool {
        self.markers.contains_key(&player)
    }

    /// Apply one position report for one player
    pub fn apply(
        &mut self,
        subject: Subject,
        range: BeatRange,
        player: PlayerId,
        position: &CuePosition,
    ) -> Vec<LifecycleEvent> {
        let marker = self.markers.entry(player).or_default();
        if marker
            .last_sequence
            .is_some_and(|last| position.sequence <= last)
        {
            return Vec::new();
        }
        marker.last_sequence = Some(position.sequence);

        // A beat report for a beat the status path already reconciled must
        // not produce a second, on-beat classification.
        let reconciled_by_status = position.kind == ReportKind::Beat
            && position.beat.is_some()
            && marker.last_beat.map(|(beat, kind)| (Some(beat), kind))
                == Some((position.beat, ReportKind::Status));

        marker.last_beat = position.beat.map(|beat| (beat, position.kind));

        let inside = position.beat.is_some_and(|beat| range.contains(beat));
        let playing_inside = inside && position.playing;
        let class = if position.kind == ReportKind::Beat
            && position.beat == Some(range.start())
            && !reconciled_by_status
        {
            StartClass::OnBeat
        } else {
            StartClass::Late
        };

        self.transition(
            subject,
            player,
            inside,
            playing_inside,
            class,
            position.beat,
            position.at,
        )
    }

    /// Treat the player as gone: its position is unknown from now on and its
    /// sequence bookkeeping is reset.
    pub fn release(
        &mut self,
        subject: Subject,
        player: PlayerId,
        at: DateTime<Utc>,
    ) -> Vec<LifecycleEvent> {
        self.markers.remove(&player);
        self.transition(subject, player, false, false, StartClass::Late, None, at)
    }

    #[allow(clippy::too_many_arguments)]
    fn transition(
        &mut self,
        subject: Subject,
        player: PlayerId,
        inside: bool,
        playing_inside: bool,
        class: StartClass,
        beat: Option<u32>,
        at: DateTime<Utc>,
    ) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        let was_entered = self.entered.contains(&player);
        let was_started = self.started.contains(&player);

        // Closing transitions first: Ended before Exited
        if was_started && !playing_inside {
            self.started.remove(&player);
            if self.started.is_empty() {
                let closed = self.episode.take().map(|e| e.class);
                events.push(event(EventKind::Ended, subject, player, beat, closed, at));
            }
        }
        if was_entered && !inside {
            self.entered.remove(&player);
            if self.entered.is_empty() {
                events.push(event(EventKind::Exited, subject, player, beat, None, at));
            }
        }

        // Opening transitions: Entered before Started
        if !was_entered && inside {
            let first = self.entered.is_empty();
            self.entered.insert(player);
            if first {
                events.push(event(EventKind::Entered, subject, player, beat, None, at));
            }
        }
        if !was_started && playing_inside {
            let first = self.started.is_empty();
            self.started.insert(player);
            if first {
                self.episode = Some(Episode {
                    class,
                    start_beat: beat,
                });
                events.push(event(
                    class.started_kind(),
                    subject,
                    player,
                    beat,
                    Some(class),
                    at,
                ));
            }
        }

        events
    }

    /// Synthesize terminal events for a disabled or removed owner.
    ///
    /// Each set that is non-empty closes once, attributed to its
    /// lowest-numbered occupant.
    pub fn terminate(&mut self, subject: Subject, at: DateTime<Utc>) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        if let Some(player) = self.started.iter().next().copied() {
            let closed = self.episode.map(|e| e.class);
            events.push(event(EventKind::Ended, subject, player, None, closed, at));
        }
        if let Some(player) = self.entered.iter().next().copied() {
            events.push(event(EventKind::Exited, subject, player, None, None, at));
        }
        self.started.clear();
        self.entered.clear();
        self.episode = None;
        events
    }

    fn snapshot(&self) -> OccupancySnapshot {
        OccupancySnapshot {
            entered: self.entered.iter().copied().collect(),
            started: self.started.iter().copied().collect(),
            class: self.episode_class(),
            start_beat: self.episode_start_beat(),
        }
    }
}

fn event(
    kind: EventKind,
    subject: Subject,
    player: PlayerId,
    beat: Option<u32>,
    class: Option<StartClass>,
    timestamp: DateTime<Utc>,
) -> LifecycleEvent {
    LifecycleEvent {
        kind,
        subject,
        player,
        beat,
        class,
        timestamp,
    }
}

/// Read-only view of one cue's occupancy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupancySnapshot {
    pub entered: Vec<PlayerId>,
    pub started: Vec<PlayerId>,
    pub class: Option<StartClass>,
    pub start_beat: Option<u32>,
}

/// Owns the runtime state of every tracked cue
#[derive(Default)]
pub struct OccupancyTracker {
    cues: RwLock<HashMap<Subject, Arc<Mutex<CueRuntimeState>>>>,
    publisher: Option<Sender<LifecycleEvent>>,
    dropped: AtomicU64,
}

impl OccupancyTracker {
    /// Tracker that only returns events
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that also publishes every event into a channel
    pub fn with_publisher(publisher: Sender<LifecycleEvent>) -> Self {
        Self {
            publisher: Some(publisher),
            ..Self::default()
        }
    }

    fn existing(&self, subject: &Subject) -> Option<Arc<Mutex<CueRuntimeState>>> {
        self.cues.read().get(subject).cloned()
    }

    fn slot(&self, subject: Subject) -> Arc<Mutex<CueRuntimeState>> {
        if let Some(slot) = self.existing(&subject) {
            return slot;
        }
        self.cues.write().entry(subject).or_default().clone()
    }

    /// Process one position report for `player` against a cue.
    pub fn observe(
        &self,
        subject: Subject,
        range: BeatRange,
        player: PlayerId,
        position: &CuePosition,
    ) -> Vec<LifecycleEvent> {
        let inside = position.beat.is_some_and(|beat| range.contains(beat));
        let slot = match self.existing(&subject) {
            Some(slot) => slot,
            // Nothing to leave and nothing to enter
            None if !inside => return Vec::new(),
            None => self.slot(subject),
        };

        let mut state = slot.lock();
        let events = state.apply(subject, range, player, position);
        self.publish(&events);
        events
    }

    /// Close every open set of a cue whose owner was disabled.
    /// The cue keeps its per-player bookkeeping.
    pub fn terminate(&self, subject: Subject, at: DateTime<Utc>) -> Vec<LifecycleEvent> {
        let Some(slot) = self.existing(&subject) else {
            return Vec::new();
        };
        let mut state = slot.lock();
        let events = state.terminate(subject, at);
        if !events.is_empty() {
            debug!(%subject, count = events.len(), "Synthesized terminal events");
        }
        self.publish(&events);
        events
    }

    /// Terminate a cue and drop its state entirely
    pub fn remove(&self, subject: Subject, at: DateTime<Utc>) -> Vec<LifecycleEvent> {
        let Some(slot) = self.cues.write().remove(&subject) else {
            return Vec::new();
        };
        let mut state = slot.lock();
        let events = state.terminate(subject, at);
        self.publish(&events);
        events
    }

    /// Forget a player in one cue, closing whatever it held open
    pub fn release(
        &self,
        subject: Subject,
        player: PlayerId,
        at: DateTime<Utc>,
    ) -> Vec<LifecycleEvent> {
        let Some(slot) = self.existing(&subject) else {
            return Vec::new();
        };
        let mut state = slot.lock();
        if !state.knows_player(player) {
            return Vec::new();
        }
        let events = state.release(subject, player, at);
        self.publish(&events);
        events
    }

    /// Forget a player in every cue it has been seen in
    pub fn release_player(&self, player: PlayerId, at: DateTime<Utc>) -> Vec<LifecycleEvent> {
        let mut slots: Vec<(Subject, Arc<Mutex<CueRuntimeState>>)> = self
            .cues
            .read()
            .iter()
            .map(|(subject, slot)| (*subject, slot.clone()))
            .collect();
        slots.sort_by_key(|(subject, _)| *subject);

        let mut events = Vec::new();
        for (subject, slot) in slots {
            let mut state = slot.lock();
            if state.knows_player(player) {
                let released = state.release(subject, player, at);
                self.publish(&released);
                events.extend(released);
            }
        }
        events
    }

    /// Current occupancy of a cue, if it has ever been entered
    pub fn snapshot(&self, subject: &Subject) -> Option<OccupancySnapshot> {
        self.existing(subject).map(|slot| slot.lock().snapshot())
    }

    /// Number of events that could not be handed to the publisher
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn publish(&self, events: &[LifecycleEvent]) {
        for event in events {
            debug!(
                subject = %event.subject,
                kind = %event.kind,
                player = event.player,
                beat = ?event.beat,
                "Cue lifecycle event"
            );
            let Some(publisher) = &self.publisher else {
                continue;
            };
            match publisher.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subject = %event.subject,
                        kind = %event.kind,
                        player = event.player,
                        "Dispatch queue full, dropping lifecycle event"
                    );
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::PlayerObservation;

    const CUE: Subject = Subject::Cue {
        owner: crate::event::CueOwner::Track(1),
        cue: 1,
    };

    fn range() -> BeatRange {
        BeatRange::new(17, 33).unwrap()
    }

    fn kinds(events: &[LifecycleEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    struct Feed {
        tracker: OccupancyTracker,
        sequence: u64,
    }

    impl Feed {
        fn new() -> Self {
            Self {
                tracker: OccupancyTracker::new(),
                sequence: 0,
            }
        }

        fn beat(&mut self, player: PlayerId, beat: u32) -> Vec<LifecycleEvent> {
            self.sequence += 1;
            let obs = PlayerObservation::beat(player, self.sequence, beat);
            self.tracker.observe(CUE, range(), player, &obs.position())
        }

        fn status(&mut self, player: PlayerId, playing: bool, beat: Option<u32>) -> Vec<LifecycleEvent> {
            self.sequence += 1;
            let obs = PlayerObservation::status(player, self.sequence, playing, beat);
            self.tracker.observe(CUE, range(), player, &obs.position())
        }
    }

    #[test]
    fn test_continuous_play_through_cue() {
        let mut feed = Feed::new();
        let mut all = Vec::new();
        for beat in 1..=40 {
            let events = feed.beat(1, beat);
            match beat {
                17 => assert_eq!(
                    kinds(&events),
                    vec![EventKind::Entered, EventKind::StartedOnBeat]
                ),
                33 => assert_eq!(kinds(&events), vec![EventKind::Ended, EventKind::Exited]),
                _ => assert!(events.is_empty(), "unexpected events at beat {}", beat),
            }
            all.extend(events);
        }
        assert_eq!(all.len(), 4);
        assert_eq!(all[3].class, None);
        assert_eq!(all[2].class, Some(StartClass::OnBeat));
    }

    #[test]
    fn test_needle_jump_is_late() {
        let mut feed = Feed::new();
        feed.status(1, true, Some(4));
        let events = feed.status(1, true, Some(20));
        assert_eq!(kinds(&events), vec![EventKind::Entered, EventKind::StartedLate]);
        assert_eq!(events[1].beat, Some(20));
    }

    #[test]
    fn test_missed_start_beat_reconciled_by_status() {
        let mut feed = Feed::new();
        feed.beat(1, 16);
        // Beat 17 report dropped; status arrives at 18
        let events = feed.status(1, true, Some(18));
        assert_eq!(kinds(&events), vec![EventKind::Entered, EventKind::StartedLate]);
        assert!(feed.beat(1, 19).is_empty());
    }

    #[test]
    fn test_paused_inside_is_entered_not_started() {
        let mut feed = Feed::new();
        let events = feed.status(1, false, Some(20));
        assert_eq!(kinds(&events), vec![EventKind::Entered]);

        let snapshot = feed.tracker.snapshot(&CUE).unwrap();
        assert_eq!(snapshot.entered, vec![1]);
        assert!(snapshot.started.is_empty());

        let events = feed.status(1, true, Some(20));
        assert_eq!(kinds(&events), vec![EventKind::StartedLate]);

        let events = feed.status(1, false, Some(21));
        assert_eq!(kinds(&events), vec![EventKind::Ended]);
        assert_eq!(events[0].class, Some(StartClass::Late));
    }

    #[test]
    fn test_first_arrival_decides_class() {
        let mut feed = Feed::new();
        let first = feed.beat(1, 17);
        assert_eq!(kinds(&first), vec![EventKind::Entered, EventKind::StartedOnBeat]);

        // Second player needle-drops in: silently joins both sets
        assert!(feed.status(2, true, Some(25)).is_empty());
        let snapshot = feed.tracker.snapshot(&CUE).unwrap();
        assert_eq!(snapshot.started, vec![1, 2]);
        assert_eq!(snapshot.class, Some(StartClass::OnBeat));
        assert_eq!(snapshot.start_beat, Some(17));

        // First player leaves: nothing, second still there
        assert!(feed.beat(1, 33).is_empty());
        let last = feed.status(2, true, Some(40));
        assert_eq!(kinds(&last), vec![EventKind::Ended, EventKind::Exited]);
        assert_eq!(last[0].class, Some(StartClass::OnBeat));
    }

    #[test]
    fn test_replayed_sequence_is_ignored() {
        let tracker = OccupancyTracker::new();
        let obs = PlayerObservation::beat(1, 5, 17);
        assert_eq!(tracker.observe(CUE, range(), 1, &obs.position()).len(), 2);
        assert!(tracker.observe(CUE, range(), 1, &obs.position()).is_empty());

        // Older sequence is stale too
        let stale = PlayerObservation::status(1, 4, false, None);
        assert!(tracker.observe(CUE, range(), 1, &stale.position()).is_empty());
    }

    #[test]
    fn test_beat_after_status_for_same_beat_is_not_on_beat() {
        let mut feed = Feed::new();
        // Status already handled beat 17 while paused on it
        assert_eq!(kinds(&feed.status(1, false, Some(17))), vec![EventKind::Entered]);
        let events = feed.beat(1, 17);
        assert_eq!(kinds(&events), vec![EventKind::StartedLate]);
    }

    #[test]
    fn test_status_after_beat_does_not_double_fire() {
        let mut feed = Feed::new();
        assert_eq!(feed.beat(1, 17).len(), 2);
        assert!(feed.status(1, true, Some(17)).is_empty());
        assert!(feed.status(1, true, Some(18)).is_empty());
    }

    #[test]
    fn test_unknown_position_forces_removal() {
        let mut feed = Feed::new();
        feed.beat(1, 20);
        let events = feed.status(1, true, None);
        assert_eq!(kinds(&events), vec![EventKind::Ended, EventKind::Exited]);
    }

    #[test]
    fn test_loop_back_inside_without_emptying() {
        let mut feed = Feed::new();
        feed.beat(1, 17);
        feed.status(2, true, Some(30));
        // Player 1 loops out and back; player 2 keeps the sets non-empty
        assert!(feed.status(1, true, Some(10)).is_empty());
        assert!(feed.status(1, true, Some(18)).is_empty());
    }

    #[test]
    fn test_terminate_closes_open_sets() {
        let mut feed = Feed::new();
        feed.status(3, true, Some(20));
        feed.status(2, false, Some(21));
        let events = feed.tracker.terminate(CUE, Utc::now());
        assert_eq!(kinds(&events), vec![EventKind::Ended, EventKind::Exited]);
        assert_eq!(events[0].player, 3);
        assert_eq!(events[1].player, 2);
        assert_eq!(events[0].class, Some(StartClass::Late));

        // Nothing left to close
        assert!(feed.tracker.terminate(CUE, Utc::now()).is_empty());
    }

    #[test]
    fn test_release_player_resets_sequence() {
        let tracker = OccupancyTracker::new();
        let obs = PlayerObservation::beat(1, 10, 20);
        tracker.observe(CUE, range(), 1, &obs.position());

        let events = tracker.release_player(1, Utc::now());
        assert_eq!(kinds(&events), vec![EventKind::Ended, EventKind::Exited]);

        // Feed restarted numbering from 1
        let obs = PlayerObservation::beat(1, 1, 17);
        assert_eq!(tracker.observe(CUE, range(), 1, &obs.position()).len(), 2);
    }

    #[test]
    fn test_publisher_receives_events_in_order() {
        let (tx, rx) = crossbeam_channel::bounded(8);
        let tracker = OccupancyTracker::with_publisher(tx);
        let obs = PlayerObservation::beat(1, 1, 17);
        tracker.observe(CUE, range(), 1, &obs.position());

        let received: Vec<EventKind> = rx.try_iter().map(|e| e.kind).collect();
        assert_eq!(received, vec![EventKind::Entered, EventKind::StartedOnBeat]);
    }

    #[test]
    fn test_full_publisher_counts_drops() {
        let (tx, _rx) = crossbeam_channel::bounded(1);
        let tracker = OccupancyTracker::with_publisher(tx);
        let obs = PlayerObservation::beat(1, 1, 17);
        let events = tracker.observe(CUE, range(), 1, &obs.position());
        assert_eq!(events.len(), 2);
        assert_eq!(tracker.dropped_events(), 1);
    }
}
