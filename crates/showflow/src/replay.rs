//! Report log replay
//!
//! Feeds a JSON-lines log of device reports through the position feed
//! adapter, the show engine and the action dispatcher.

use anyhow::{Context, Result};
use serde::Serialize;
use showflow_control::{ActionDispatcher, ActionTable, DispatchStats, MidiSink};
use showflow_core::{
    DeviceReport, EngineConfig, LifecycleEvent, PlayerId, PositionFeedAdapter, ShowEngine,
    ShowFile, StaticMetadata,
};
use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a replay did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    /// Reports fed to the engine
    pub reports: u64,
    /// Lines that were not valid reports
    pub skipped_lines: u64,
    /// Lifecycle events by kind
    pub events: BTreeMap<String, u64>,
    /// Events the engine could not queue for dispatch
    pub dropped_events: u64,
    pub dispatch: DispatchStats,
}

impl ReplaySummary {
    fn count(&mut self, events: &[LifecycleEvent]) {
        for event in events {
            *self.events.entry(event.kind.to_string()).or_default() += 1;
        }
    }

    pub fn total_events(&self) -> u64 {
        self.events.values().sum()
    }
}

/// Engine, feed adapter and dispatcher wired together
pub struct Session {
    adapter: PositionFeedAdapter,
    engine: ShowEngine,
    table: Arc<ActionTable>,
    dispatcher: ActionDispatcher,
}

impl Session {
    /// Open every show in `file` and start dispatching
    pub fn start(file: ShowFile, config: &EngineConfig, sink: Box<dyn MidiSink>) -> Result<Self> {
        let table = Arc::new(ActionTable::new());
        let dispatcher = ActionDispatcher::spawn(&config.dispatcher, table.clone(), sink)
            .context("Failed to start action dispatcher")?;
        let engine = ShowEngine::with_publisher(config.draw_source(), dispatcher.sender());
        let adapter = PositionFeedAdapter::new(Arc::new(StaticMetadata::new(file.analysis)));

        for show in file.shows {
            let id = show.id;
            table.register_show(&show);
            engine
                .open_show(show)
                .with_context(|| format!("Failed to open show {}", id))?;
        }
        info!(
            shows = engine.with_registry(|r| r.show_ids().len()),
            actions = table.len(),
            "Session started"
        );

        Ok(Self {
            adapter,
            engine,
            table,
            dispatcher,
        })
    }

    pub fn engine(&self) -> &ShowEngine {
        &self.engine
    }

    pub fn actions(&self) -> &ActionTable {
        &self.table
    }

    /// Feed every report in `reader`; players still present at the end are released
    pub fn replay<R: BufRead>(&self, reader: R) -> Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();
        let mut players = BTreeSet::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read line {}", index + 1))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let report: DeviceReport = match serde_json::from_str(line) {
                Ok(report) => report,
                Err(e) => {
                    warn!(line = index + 1, error = %e, "Skipping malformed report");
                    summary.skipped_lines += 1;
                    continue;
                }
            };

            players.insert(report.player());
            let observation = self.adapter.ingest(report);
            let events = self.engine.process(&observation);
            debug!(
                player = observation.player,
                sequence = observation.sequence,
                events = events.len(),
                "Processed report"
            );
            summary.reports += 1;
            summary.count(&events);
        }

        for player in players {
            summary.count(&self.release_player(player));
        }
        Ok(summary)
    }

    /// Treat a player as vanished
    pub fn release_player(&self, player: PlayerId) -> Vec<LifecycleEvent> {
        self.adapter.forget_player(player);
        self.engine.player_lost(player)
    }

    /// Drain the dispatcher and fill in the counters
    pub fn finish(mut self, mut summary: ReplaySummary) -> ReplaySummary {
        self.dispatcher.shutdown();
        summary.dropped_events = self.engine.dropped_events();
        summary.dispatch = self.dispatcher.stats();
        summary
    }
}
