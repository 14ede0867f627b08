use proptest::prelude::*;
use showflow_core::{
    BeatRange, EventKind, LifecycleEvent, OccupancyTracker, PlayerId, PlayerObservation, Subject,
};

#[derive(Debug, Clone)]
struct Report {
    player: PlayerId,
    beat_report: bool,
    playing: bool,
    beat: Option<u32>,
}

fn report() -> impl Strategy<Value = Report> {
    (
        1u8..4,
        any::<bool>(),
        any::<bool>(),
        prop::option::weighted(0.9, 10u32..45),
    )
        .prop_map(|(player, beat_report, playing, beat)| Report {
            player,
            beat_report,
            playing,
            beat,
        })
}

fn observation(report: &Report, sequence: u64) -> PlayerObservation {
    match (report.beat_report, report.beat) {
        (true, Some(beat)) => PlayerObservation::beat(report.player, sequence, beat),
        _ => PlayerObservation::status(report.player, sequence, report.playing, report.beat),
    }
}

const CUE: Subject = Subject::Cue {
    owner: showflow_core::CueOwner::Track(1),
    cue: 1,
};

fn run(reports: &[Report], replay: bool) -> (OccupancyTracker, Vec<LifecycleEvent>) {
    let tracker = OccupancyTracker::new();
    let range = BeatRange::new(17, 33).unwrap();
    let mut events = Vec::new();
    for (index, report) in reports.iter().enumerate() {
        let obs = observation(report, index as u64 + 1);
        events.extend(tracker.observe(CUE, range, report.player, &obs.position()));
        if replay {
            let again = tracker.observe(CUE, range, report.player, &obs.position());
            assert!(again.is_empty(), "replayed observation produced {:?}", again);
        }
    }
    (tracker, events)
}

proptest! {
    #[test]
    fn prop_entered_exited_alternate(reports in prop::collection::vec(report(), 1..120)) {
        let (tracker, events) = run(&reports, false);
        let mut open = 0i32;
        for event in &events {
            match event.kind {
                EventKind::Entered => open += 1,
                EventKind::Exited => open -= 1,
                _ => {}
            }
            prop_assert!(open == 0 || open == 1, "entered balance {}", open);
        }
        let occupied = tracker
            .snapshot(&CUE)
            .map(|s| !s.entered.is_empty())
            .unwrap_or(false);
        prop_assert_eq!(open == 1, occupied);
    }

    #[test]
    fn prop_one_start_per_episode(reports in prop::collection::vec(report(), 1..120)) {
        let (tracker, events) = run(&reports, false);
        let mut episode_open = false;
        for event in &events {
            match event.kind {
                EventKind::StartedOnBeat | EventKind::StartedLate => {
                    prop_assert!(!episode_open, "second start inside one episode");
                    episode_open = true;
                }
                EventKind::Ended => {
                    prop_assert!(episode_open, "Ended without a start");
                    episode_open = false;
                }
                _ => {}
            }
        }
        let playing = tracker
            .snapshot(&CUE)
            .map(|s| !s.started.is_empty())
            .unwrap_or(false);
        prop_assert_eq!(episode_open, playing);
    }

    #[test]
    fn prop_ended_carries_episode_class(reports in prop::collection::vec(report(), 1..120)) {
        let (_, events) = run(&reports, false);
        let mut class = None;
        for event in &events {
            match event.kind {
                EventKind::StartedOnBeat | EventKind::StartedLate => class = event.class,
                EventKind::Ended => prop_assert_eq!(event.class, class),
                _ => {}
            }
        }
    }

    #[test]
    fn prop_replay_is_idempotent(reports in prop::collection::vec(report(), 1..80)) {
        let (_, once) = run(&reports, false);
        let (_, replayed) = run(&reports, true);
        let once: Vec<(EventKind, PlayerId)> = once.iter().map(|e| (e.kind, e.player)).collect();
        let replayed: Vec<(EventKind, PlayerId)> =
            replayed.iter().map(|e| (e.kind, e.player)).collect();
        prop_assert_eq!(once, replayed);
    }
}

#[test]
fn test_reconciliation_law() {
    let tracker = OccupancyTracker::new();
    let range = BeatRange::new(17, 33).unwrap();

    let on_beat = PlayerObservation::beat(1, 1, 17);
    let kinds: Vec<EventKind> = tracker
        .observe(CUE, range, 1, &on_beat.position())
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![EventKind::Entered, EventKind::StartedOnBeat]);

    // Same scenario with the start beat report dropped
    let tracker = OccupancyTracker::new();
    let status = PlayerObservation::status(1, 1, true, Some(18));
    let kinds: Vec<EventKind> = tracker
        .observe(CUE, range, 1, &status.position())
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![EventKind::Entered, EventKind::StartedLate]);
}
