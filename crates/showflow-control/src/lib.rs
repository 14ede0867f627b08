//! ShowFlow Control - Cue action output
//!
//! This crate turns lifecycle events from the show engine into actions:
//! - **Actions**: per-subject MIDI messages and user callbacks
//! - **Dispatcher**: worker thread and per-subject callback lanes that run them in order
//! - **MIDI**: message encoding and output sinks
//!
//! ## Feature Flags
//!
//! - `midi`: Enable hardware MIDI output (requires `midir`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use showflow_control::{ActionDispatcher, ActionTable, LoggingSink};
//! use showflow_core::{DispatcherSettings, RandomDraw, ShowEngine};
//! use std::sync::Arc;
//!
//! let table = Arc::new(ActionTable::new());
//! let dispatcher =
//!     ActionDispatcher::spawn(&DispatcherSettings::default(), table, Box::new(LoggingSink))
//!         .unwrap();
//! let engine = ShowEngine::with_publisher(Box::new(RandomDraw::new()), dispatcher.sender());
//! ```

pub mod actions;
pub mod dispatcher;
pub mod error;
pub mod midi;

pub use actions::{ActionTable, Callback, CallbackFn, CueAction};
pub use dispatcher::{run_callback, ActionDispatcher, DispatchStats};
pub use error::{ControlError, Result};
pub use midi::{LoggingSink, MidiMessage, MidiSink, RecordingSink, CUE_VELOCITY};

#[cfg(feature = "midi")]
pub use midi::MidiOutputSink;
