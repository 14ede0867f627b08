//! Action table
//!
//! Maps lifecycle event subjects to the actions they run: MIDI messages
//! derived from the cue's message configuration, and user callbacks.

use crate::midi::MidiMessage;
use parking_lot::RwLock;
use showflow_core::{
    CueMessage, CueMessages, EventKind, LifecycleEvent, Show, StartClass, Subject,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Signature of a user callback
pub type CallbackFn = dyn Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync;

/// User callback attached to a subject
#[derive(Clone)]
pub struct Callback {
    name: String,
    run: Arc<CallbackFn>,
}

impl Callback {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        (self.run)(event)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").field("name", &self.name).finish()
    }
}

/// One thing to do for an event
#[derive(Debug, Clone)]
pub enum CueAction {
    Midi(MidiMessage),
    Callback(Callback),
}

#[derive(Debug, Clone, Default)]
struct SubjectActions {
    messages: CueMessages,
    /// `None` filter runs for every event kind
    callbacks: Vec<(Option<EventKind>, Callback)>,
}

/// Registered actions per subject
#[derive(Debug, Default)]
pub struct ActionTable {
    subjects: RwLock<HashMap<Subject, SubjectActions>>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the message configuration of a subject
    pub fn set_messages(&self, subject: Subject, messages: CueMessages) {
        self.subjects.write().entry(subject).or_default().messages = messages;
    }

    /// Register a callback for one event kind, or every kind with `None`
    pub fn on(&self, subject: Subject, kind: Option<EventKind>, callback: Callback) {
        self.subjects
            .write()
            .entry(subject)
            .or_default()
            .callbacks
            .push((kind, callback));
    }

    /// Forget everything registered for a subject
    pub fn clear(&self, subject: &Subject) {
        self.subjects.write().remove(subject);
    }

    /// Register the message configuration of every cue in a show
    pub fn register_show(&self, show: &Show) {
        let mut subjects = self.subjects.write();
        for track in &show.tracks {
            for cue in &track.cues {
                subjects
                    .entry(Subject::track_cue(track.id, cue.id))
                    .or_default()
                    .messages = cue.messages;
            }
        }
        for trigger in &show.triggers {
            for cue in &trigger.cues {
                subjects
                    .entry(Subject::trigger_cue(trigger.id, cue.id))
                    .or_default()
                    .messages = cue.messages;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.subjects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.read().is_empty()
    }

    /// Actions for an event, MIDI first, then callbacks in registration order
    pub fn resolve(&self, event: &LifecycleEvent) -> Vec<CueAction> {
        let subjects = self.subjects.read();
        let Some(entry) = subjects.get(&event.subject) else {
            return Vec::new();
        };

        let mut actions = Vec::new();
        if let Some(message) = governing_message(&entry.messages, event) {
            if let Some(midi) = MidiMessage::for_cue(&message, event.is_opening()) {
                actions.push(CueAction::Midi(midi));
            }
        }
        actions.extend(
            entry
                .callbacks
                .iter()
                .filter(|(kind, _)| kind.map_or(true, |k| k == event.kind))
                .map(|(_, callback)| CueAction::Callback(callback.clone())),
        );
        actions
    }
}

/// Message configured for the pair an event belongs to
fn governing_message(messages: &CueMessages, event: &LifecycleEvent) -> Option<CueMessage> {
    match event.kind {
        EventKind::Entered | EventKind::Exited => messages.entered,
        EventKind::StartedOnBeat => messages.for_start(StartClass::OnBeat),
        EventKind::StartedLate => messages.for_start(StartClass::Late),
        EventKind::Ended => messages.for_start(event.class.unwrap_or(StartClass::OnBeat)),
    }
}
