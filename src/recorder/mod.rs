//! Interaction recorder
//!
//! This module provides:
//! - Selector ranking for the elements a user touches
//! - Action capture with keystroke merging
//! - Change observation with quiescence detection
//! - The recording session coordinator

pub mod action_capture;
pub mod change_observer;
pub mod events;
pub mod network;
pub mod selector_ranker;
pub mod session;
pub mod state;
pub mod types;

pub use action_capture::{ActionCapture, PendingAction};
pub use change_observer::{ChangeObserver, Observation, SettleEnd};
pub use events::{ConsoleEventListener, EventEmitter, SessionEvent};
pub use selector_ranker::{rank, SelectorResult, SelectorTier};
pub use session::{
    start_recording, start_recording_with, stop_recording, Recording, SessionHandle, StopSignal,
};
pub use state::SessionState;
pub use types::{ActionKind, ElementDescriptor, ObservedChange, RecordedAction, WindowEnd};
