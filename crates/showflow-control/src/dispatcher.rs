//! Action Dispatcher
//!
//! Runs the actions registered for lifecycle events away from the engine.
//! The engine hands events to an unbounded queue and never waits on an
//! action; every event queued is dispatched exactly once.
//!
//! The dispatch worker sends MIDI itself and hands callbacks to a lane per
//! subject, so callbacks of one cue run in order without holding back any
//! other cue. Each callback runs under a time limit: one that fails, panics
//! or outlives the limit is logged with its event context, counted as
//! failed, and the lane moves on.

use crate::actions::{ActionTable, Callback, CueAction};
use crate::error::{ControlError, Result};
use crate::midi::{MidiMessage, MidiSink};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use showflow_core::{DispatcherSettings, LifecycleEvent, Subject};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Events taken off the queue
    pub dispatched: u64,
    /// Actions that completed
    pub executed: u64,
    /// Actions that returned an error, panicked or timed out
    pub failed: u64,
    /// Callbacks abandoned after the time limit
    pub timed_out: u64,
    /// Callbacks slower than the configured threshold
    pub slow: u64,
    /// Largest number of events seen waiting in the queue
    pub backlog_peak: u64,
}

/// Run a callback, turning errors and panics into `ActionFailed`
pub fn run_callback(event: &LifecycleEvent, callback: &Callback) -> Result<()> {
    match catch_unwind(AssertUnwindSafe(|| callback.call(event))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(action_failed(event, format!("{}: {:#}", callback.name(), e))),
        Err(panic) => Err(action_failed(
            event,
            format!("{} panicked: {}", callback.name(), panic_message(&panic)),
        )),
    }
}

/// Run a callback on a helper thread and wait at most `timeout` for it.
///
/// A callback that outlives the limit keeps its helper thread; nobody waits
/// on it again.
fn run_callback_with_timeout(
    event: &LifecycleEvent,
    callback: &Callback,
    timeout: Duration,
) -> Result<()> {
    let (tx, rx) = bounded(1);
    let job_event = event.clone();
    let job = callback.clone();
    thread::Builder::new()
        .name("callback-runner".to_string())
        .spawn(move || {
            let _ = tx.send(run_callback(&job_event, &job));
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(ControlError::CallbackTimeout {
            callback: callback.name().to_string(),
            subject: event.subject.to_string(),
            kind: event.kind.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(action_failed(
            event,
            format!("{} exited without a result", callback.name()),
        )),
    }
}

fn action_failed(event: &LifecycleEvent, reason: String) -> ControlError {
    ControlError::ActionFailed {
        subject: event.subject.to_string(),
        kind: event.kind.to_string(),
        reason,
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn log_failure(event: &LifecycleEvent, error: &ControlError) {
    error!(
        subject = %event.subject,
        kind = %event.kind,
        player = event.player,
        error = %error,
        "Cue action failed"
    );
}

/// Callbacks of one event, queued on its subject's lane
struct CallbackJob {
    event: LifecycleEvent,
    callbacks: Vec<Callback>,
}

/// Runs callback jobs for one subject, in arrival order
#[derive(Clone)]
struct LaneRunner {
    timeout: Duration,
    slow_callback: Duration,
    stats: Arc<RwLock<DispatchStats>>,
}

impl LaneRunner {
    fn run(self, rx: Receiver<CallbackJob>) {
        for job in rx.iter() {
            for callback in &job.callbacks {
                self.run_one(&job.event, callback);
            }
        }
    }

    fn run_one(&self, event: &LifecycleEvent, callback: &Callback) {
        let start = Instant::now();
        let result = run_callback_with_timeout(event, callback, self.timeout);
        let elapsed = start.elapsed();

        let mut stats = self.stats.write();
        match &result {
            Ok(()) => stats.executed += 1,
            Err(e) => {
                stats.failed += 1;
                if matches!(e, ControlError::CallbackTimeout { .. }) {
                    stats.timed_out += 1;
                }
                log_failure(event, e);
            }
        }
        if result.is_ok() && elapsed > self.slow_callback {
            stats.slow += 1;
            warn!(
                subject = %event.subject,
                kind = %event.kind,
                player = event.player,
                callback = callback.name(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow cue callback"
            );
        }
    }
}

struct Lane {
    tx: Sender<CallbackJob>,
    thread: JoinHandle<()>,
}

/// Worker-side state
struct Worker {
    table: Arc<ActionTable>,
    sink: Box<dyn MidiSink>,
    runner: LaneRunner,
    lanes: HashMap<Subject, Lane>,
    backlog_warning: usize,
    backlog_warned: bool,
    stats: Arc<RwLock<DispatchStats>>,
}

impl Worker {
    fn handle(&mut self, event: LifecycleEvent) {
        self.stats.write().dispatched += 1;

        let mut callbacks = Vec::new();
        for action in self.table.resolve(&event) {
            match action {
                CueAction::Midi(message) => self.send_midi(&event, &message),
                CueAction::Callback(callback) => callbacks.push(callback),
            }
        }
        if !callbacks.is_empty() {
            self.queue_callbacks(event, callbacks);
        }
    }

    fn send_midi(&mut self, event: &LifecycleEvent, message: &MidiMessage) {
        let result = self.sink.send(message);
        let mut stats = self.stats.write();
        match result {
            Ok(()) => stats.executed += 1,
            Err(e) => {
                stats.failed += 1;
                log_failure(event, &e);
            }
        }
    }

    fn queue_callbacks(&mut self, event: LifecycleEvent, callbacks: Vec<Callback>) {
        let subject = event.subject;
        let count = callbacks.len() as u64;
        let job = CallbackJob { event, callbacks };
        let sent = match self.lane(subject) {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        };
        if !sent {
            self.stats.write().failed += count;
            error!(%subject, callbacks = count, "Callback lane unavailable");
        }
    }

    fn lane(&mut self, subject: Subject) -> Option<&Sender<CallbackJob>> {
        if !self.lanes.contains_key(&subject) {
            let (tx, rx) = unbounded();
            let runner = self.runner.clone();
            match thread::Builder::new()
                .name("callback-lane".to_string())
                .spawn(move || runner.run(rx))
            {
                Ok(thread) => {
                    debug!(%subject, "Callback lane started");
                    self.lanes.insert(subject, Lane { tx, thread });
                }
                Err(e) => {
                    error!(%subject, error = %e, "Failed to start callback lane");
                    return None;
                }
            }
        }
        self.lanes.get(&subject).map(|lane| &lane.tx)
    }

    fn watch_backlog(&mut self, pending: usize) {
        {
            let mut stats = self.stats.write();
            stats.backlog_peak = stats.backlog_peak.max(pending as u64);
        }
        if pending > self.backlog_warning && !self.backlog_warned {
            self.backlog_warned = true;
            warn!(pending, "Dispatch backlog building up");
        } else if pending <= self.backlog_warning / 2 {
            self.backlog_warned = false;
        }
    }

    /// Let every lane finish its queued callbacks
    fn close_lanes(&mut self) {
        for (subject, lane) in self.lanes.drain() {
            drop(lane.tx);
            if lane.thread.join().is_err() {
                error!(%subject, "Callback lane panicked");
            }
        }
    }

    fn run(mut self, rx: Receiver<LifecycleEvent>, running: Arc<AtomicBool>) {
        info!(sink = self.sink.name(), "Dispatch thread started");
        while running.load(Ordering::Relaxed) {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => {
                    self.watch_backlog(rx.len());
                    self.handle(event);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Dispatch queue disconnected");
                    break;
                }
            }
        }
        // Finish what was queued before the stop
        for event in rx.try_iter() {
            self.handle(event);
        }
        self.close_lanes();
        info!("Dispatch thread stopped");
    }
}

/// Dispatcher with one worker thread and a callback lane per subject
pub struct ActionDispatcher {
    sender: Sender<LifecycleEvent>,
    running: Arc<AtomicBool>,
    stats: Arc<RwLock<DispatchStats>>,
    thread: Option<JoinHandle<()>>,
}

impl ActionDispatcher {
    /// Start the worker thread
    pub fn spawn(
        settings: &DispatcherSettings,
        table: Arc<ActionTable>,
        sink: Box<dyn MidiSink>,
    ) -> Result<Self> {
        let (sender, rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(RwLock::new(DispatchStats::default()));

        let worker = Worker {
            table,
            sink,
            runner: LaneRunner {
                timeout: settings.callback_timeout(),
                slow_callback: settings.slow_callback(),
                stats: stats.clone(),
            },
            lanes: HashMap::new(),
            backlog_warning: settings.backlog_warning,
            backlog_warned: false,
            stats: stats.clone(),
        };
        let worker_running = running.clone();
        let thread = thread::Builder::new()
            .name("dispatch-thread".to_string())
            .spawn(move || worker.run(rx, worker_running))?;

        Ok(Self {
            sender,
            running,
            stats,
            thread: Some(thread),
        })
    }

    /// Queue handle for the engine's publisher
    pub fn sender(&self) -> Sender<LifecycleEvent> {
        self.sender.clone()
    }

    /// Queue an event without blocking
    pub fn submit(&self, event: LifecycleEvent) -> Result<()> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(ControlError::DispatcherStopped);
        }
        self.sender
            .send(event)
            .map_err(|_| ControlError::DispatcherStopped)
    }

    pub fn stats(&self) -> DispatchStats {
        *self.stats.read()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop after dispatching queued events and letting lanes finish
    pub fn shutdown(&mut self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        info!("Stopping dispatcher");
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Dispatch thread panicked");
            }
        }
    }
}

impl Drop for ActionDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::RecordingSink;
    use chrono::Utc;
    use showflow_core::EventKind;

    fn event() -> LifecycleEvent {
        LifecycleEvent {
            kind: EventKind::Entered,
            subject: Subject::track_cue(2, 3),
            player: 1,
            beat: Some(5),
            class: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_run_callback_isolates_errors_and_panics() {
        let failing = Callback::new("fails", |_| anyhow::bail!("device offline"));
        let err = run_callback(&event(), &failing).unwrap_err();
        assert!(err.to_string().contains("device offline"));
        assert!(err.to_string().contains("track 2 cue 3"));

        let panicking = Callback::new("panics", |_| panic!("bad index"));
        let err = run_callback(&event(), &panicking).unwrap_err();
        assert!(err.to_string().contains("bad index"));

        let fine = Callback::new("fine", |_| Ok(()));
        assert!(run_callback(&event(), &fine).is_ok());
    }

    #[test]
    fn test_callback_time_limit() {
        let sleepy = Callback::new("sleepy", |_| {
            thread::sleep(Duration::from_millis(300));
            Ok(())
        });
        let err = run_callback_with_timeout(&event(), &sleepy, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, ControlError::CallbackTimeout { .. }));
        assert!(err.to_string().contains("sleepy"));

        let quick = Callback::new("quick", |_| Ok(()));
        assert!(run_callback_with_timeout(&event(), &quick, Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_submit_after_shutdown() {
        let mut dispatcher = ActionDispatcher::spawn(
            &DispatcherSettings::default(),
            Arc::new(ActionTable::new()),
            Box::new(RecordingSink::new()),
        )
        .unwrap();
        dispatcher.submit(event()).unwrap();
        dispatcher.shutdown();
        assert!(!dispatcher.is_running());
        assert!(matches!(
            dispatcher.submit(event()),
            Err(ControlError::DispatcherStopped)
        ));
        assert_eq!(dispatcher.stats().dispatched, 1);
    }
}
