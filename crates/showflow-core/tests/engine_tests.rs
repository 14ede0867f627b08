use showflow_core::{
    Cue, EnablementRule, EventKind, Exclusivity, LifecycleEvent, PhraseInfo, PhraseTrigger,
    PhraseType, PlayerObservation, SectionLayout, SequenceDraw, Show, ShowEngine, StartClass,
    Subject, Track,
};
use std::sync::Arc;
use std::thread;

const SIG: &str = "sig-opener";

fn engine() -> ShowEngine {
    ShowEngine::new(Box::new(SequenceDraw::new([0])))
}

fn track_show() -> Show {
    let track = Track::new(1, "Opener", SIG)
        .with_cue(Cue::new(7, "Drop", 17, 33).unwrap())
        .unwrap();
    Show::new(1, "Main").with_track(track)
}

fn trigger_show() -> Show {
    let trigger = PhraseTrigger::new(
        50,
        "Chorus strobe",
        Exclusivity::SoloGlobal,
        SectionLayout::new(1, 2, 1, 0).unwrap(),
    )
    .unwrap()
    .with_cue(Cue::new(1, "Loop bar 2", 9, 13).unwrap())
    .unwrap();
    Show::new(2, "Phrases").with_trigger(trigger)
}

fn kinds(events: &[LifecycleEvent]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

fn for_subject(events: &[LifecycleEvent], subject: Subject) -> Vec<(EventKind, Option<u32>)> {
    events
        .iter()
        .filter(|e| e.subject == subject)
        .map(|e| (e.kind, e.beat))
        .collect()
}

#[test]
fn test_continuous_play_through_track_cue() {
    let engine = engine();
    engine.open_show(track_show()).unwrap();

    let mut events = Vec::new();
    let mut sequence = 0;
    for beat in 1..=40 {
        sequence += 1;
        events.extend(engine.process(&PlayerObservation::beat(1, sequence, beat).with_track(SIG)));
        // Status reports between beats carry the same beat number
        sequence += 1;
        events.extend(
            engine.process(&PlayerObservation::status(1, sequence, true, Some(beat)).with_track(SIG)),
        );
    }

    assert_eq!(
        for_subject(&events, Subject::track_cue(1, 7)),
        vec![
            (EventKind::Entered, Some(17)),
            (EventKind::StartedOnBeat, Some(17)),
            (EventKind::Ended, Some(33)),
            (EventKind::Exited, Some(33)),
        ]
    );
}

#[test]
fn test_needle_jump_into_cue_is_late() {
    let engine = engine();
    engine.open_show(track_show()).unwrap();

    engine.process(&PlayerObservation::beat(1, 1, 3).with_track(SIG));
    let events = engine.process(&PlayerObservation::status(1, 2, true, Some(20)).with_track(SIG));
    assert_eq!(kinds(&events), vec![EventKind::Entered, EventKind::StartedLate]);
}

#[test]
fn test_loop_cue_plays_twice_in_long_phrase() {
    let engine = engine();
    engine.open_show(trigger_show()).unwrap();

    // Six-bar chorus: Start 1 bar, Loop 2 bars (played twice), End 1 bar
    let phrase = PhraseInfo::new(PhraseType::Chorus, 101, 125);
    let mut events = Vec::new();
    for (index, beat) in (97..=128).enumerate() {
        let mut obs = PlayerObservation::beat(3, index as u64 + 1, beat).with_track(SIG);
        if phrase.contains(beat) {
            obs = obs.with_phrase(phrase);
        }
        events.extend(engine.process(&obs));
    }

    assert_eq!(
        for_subject(&events, Subject::trigger_cue(50, 1)),
        vec![
            (EventKind::Entered, Some(9)),
            (EventKind::StartedOnBeat, Some(9)),
            (EventKind::Ended, Some(5)),
            (EventKind::Exited, Some(5)),
            (EventKind::Entered, Some(9)),
            (EventKind::StartedOnBeat, Some(9)),
            (EventKind::Ended, Some(13)),
            (EventKind::Exited, Some(13)),
        ]
    );

    // The trigger itself plays for the length of the phrase
    let trigger = for_subject(&events, Subject::Trigger(50));
    assert_eq!(
        trigger.iter().map(|(kind, _)| *kind).collect::<Vec<_>>(),
        vec![
            EventKind::Entered,
            EventKind::StartedOnBeat,
            EventKind::Ended,
            EventKind::Exited,
        ]
    );
    assert!(engine.bindings(3).is_empty());
    assert_eq!(engine.activation(3).unwrap().solo_global, Some(50));
}

#[test]
fn test_new_phrase_rebinds_same_trigger_on_beat() {
    let engine = engine();
    engine.open_show(trigger_show()).unwrap();

    let first = PhraseInfo::new(PhraseType::Chorus, 1, 17);
    let second = PhraseInfo::new(PhraseType::Chorus, 17, 33);
    let mut sequence = 0;
    let mut starts = Vec::new();
    for beat in 1..=32 {
        sequence += 1;
        let phrase = if first.contains(beat) { first } else { second };
        let events = engine.process(
            &PlayerObservation::beat(1, sequence, beat)
                .with_track(SIG)
                .with_phrase(phrase),
        );
        starts.extend(
            events
                .iter()
                .filter(|e| e.subject == Subject::Trigger(50) && e.kind == EventKind::StartedOnBeat)
                .map(|e| e.timestamp),
        );
    }
    assert_eq!(starts.len(), 2);
}

#[test]
fn test_close_show_synthesizes_terminal_events() {
    let engine = engine();
    engine.open_show(track_show()).unwrap();
    engine.process(&PlayerObservation::beat(2, 1, 17).with_track(SIG));
    engine.process(&PlayerObservation::status(1, 1, false, Some(20)).with_track(SIG));

    let events = engine.close_show(1).unwrap();
    assert_eq!(kinds(&events), vec![EventKind::Ended, EventKind::Exited]);
    // Attributed to the lowest-numbered occupant of each set
    assert_eq!(events[0].player, 2);
    assert_eq!(events[0].class, Some(StartClass::OnBeat));
    assert_eq!(events[1].player, 1);

    // Nothing left to react to
    assert!(engine
        .process(&PlayerObservation::beat(2, 2, 18).with_track(SIG))
        .is_empty());
}

#[test]
fn test_remove_cue_mid_occupancy() {
    let engine = engine();
    engine.open_show(track_show()).unwrap();
    engine.process(&PlayerObservation::status(1, 1, true, Some(25)).with_track(SIG));

    let events = engine.remove_track_cue(1, 7).unwrap();
    assert_eq!(kinds(&events), vec![EventKind::Ended, EventKind::Exited]);
    assert!(engine.snapshot(&Subject::track_cue(1, 7)).is_none());
}

#[test]
fn test_disable_and_enable_track() {
    let engine = engine();
    engine.open_show(track_show()).unwrap();
    engine.process(&PlayerObservation::beat(1, 1, 17).with_track(SIG));

    let events = engine.set_track_enabled(1, false).unwrap();
    assert_eq!(kinds(&events), vec![EventKind::Ended, EventKind::Exited]);
    assert!(engine
        .process(&PlayerObservation::beat(1, 2, 18).with_track(SIG))
        .is_empty());

    assert!(engine.set_track_enabled(1, true).unwrap().is_empty());
    let events = engine.process(&PlayerObservation::beat(1, 3, 19).with_track(SIG));
    assert_eq!(kinds(&events), vec![EventKind::Entered, EventKind::StartedLate]);
}

#[test]
fn test_disable_trigger_mid_phrase() {
    let engine = engine();
    engine.open_show(trigger_show()).unwrap();
    let phrase = PhraseInfo::new(PhraseType::Verse, 1, 33);
    engine.process(
        &PlayerObservation::beat(1, 1, 1)
            .with_track(SIG)
            .with_phrase(phrase),
    );

    let events = engine.set_trigger_enabled(50, false).unwrap();
    assert_eq!(kinds(&events), vec![EventKind::Ended, EventKind::Exited]);
    assert_eq!(events[0].subject, Subject::Trigger(50));

    // Still bound, but silent while disabled
    assert!(engine
        .process(
            &PlayerObservation::beat(1, 2, 2)
                .with_track(SIG)
                .with_phrase(phrase)
        )
        .is_empty());
}

#[test]
fn test_removed_trigger_leaves_future_elections() {
    let engine = engine();
    engine.open_show(trigger_show()).unwrap();
    let phrase = PhraseInfo::new(PhraseType::Verse, 1, 33);
    engine.process(
        &PlayerObservation::beat(1, 1, 1)
            .with_track(SIG)
            .with_phrase(phrase),
    );
    assert_eq!(engine.bindings(1).len(), 1);

    let events = engine.remove_trigger(50).unwrap();
    assert_eq!(kinds(&events), vec![EventKind::Ended, EventKind::Exited]);
    assert!(engine.bindings(1).is_empty());

    let next = PhraseInfo::new(PhraseType::Chorus, 33, 65);
    engine.process(
        &PlayerObservation::beat(1, 2, 33)
            .with_track(SIG)
            .with_phrase(next),
    );
    assert!(engine.activation(1).unwrap().is_empty());
}

#[test]
fn test_failing_rule_keeps_engine_live() {
    let engine = engine();
    let broken = PhraseTrigger::new(60, "Broken", Exclusivity::Blend, SectionLayout::default())
        .unwrap()
        .with_rule(EnablementRule::custom(|_| anyhow::bail!("undefined variable")));
    engine
        .open_show(trigger_show().with_trigger(broken))
        .unwrap();

    let phrase = PhraseInfo::new(PhraseType::Verse, 1, 33);
    let events = engine.process(
        &PlayerObservation::beat(1, 1, 1)
            .with_track(SIG)
            .with_phrase(phrase),
    );
    assert_eq!(events[0].subject, Subject::Trigger(50));
    let plan = engine.activation(1).unwrap();
    assert!(plan.blend.is_empty());
    assert_eq!(plan.solo_global, Some(50));
}

#[test]
fn test_player_lost_releases_everything() {
    let engine = engine();
    engine.open_show(track_show()).unwrap();
    engine.open_show(trigger_show()).unwrap();
    let phrase = PhraseInfo::new(PhraseType::Verse, 17, 49);
    engine.process(
        &PlayerObservation::beat(4, 10, 20)
            .with_track(SIG)
            .with_phrase(phrase),
    );

    let events = engine.player_lost(4);
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.player == 4));
    assert!(engine.activation(4).is_none());

    // The feed numbers a returning player from scratch
    let events = engine.process(&PlayerObservation::beat(4, 1, 17).with_track(SIG));
    assert_eq!(kinds(&events), vec![EventKind::Entered, EventKind::StartedOnBeat]);
}

#[test]
fn test_publisher_sees_events_in_causal_order() {
    let (tx, rx) = crossbeam_channel::bounded(64);
    let engine = ShowEngine::with_publisher(Box::new(SequenceDraw::new([0])), tx);
    engine.open_show(track_show()).unwrap();

    let returned = engine.process(&PlayerObservation::beat(1, 1, 17).with_track(SIG));
    let published: Vec<LifecycleEvent> = rx.try_iter().collect();
    assert_eq!(returned, published);
    assert_eq!(kinds(&published), vec![EventKind::Entered, EventKind::StartedOnBeat]);
}

#[test]
fn test_concurrent_players() {
    let engine = Arc::new(engine());
    engine.open_show(track_show()).unwrap();

    let handles: Vec<_> = (1..=4u8)
        .map(|player| {
            let engine = engine.clone();
            thread::spawn(move || {
                let mut events = Vec::new();
                for beat in 1..=40 {
                    let obs = PlayerObservation::beat(player, beat as u64, beat).with_track(SIG);
                    events.extend(engine.process(&obs));
                }
                events
            })
        })
        .collect();

    let events: Vec<LifecycleEvent> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let count = |kind: EventKind| events.iter().filter(|e| e.kind == kind).count();

    assert!(count(EventKind::Entered) >= 1);
    assert_eq!(count(EventKind::Entered), count(EventKind::Exited));
    assert_eq!(
        count(EventKind::StartedOnBeat) + count(EventKind::StartedLate),
        count(EventKind::Ended)
    );
    let snapshot = engine.snapshot(&Subject::track_cue(1, 7)).unwrap();
    assert!(snapshot.entered.is_empty());
}
