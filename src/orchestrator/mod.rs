//! Session-level orchestration.
//!
//! Owns the typed session state machine and command dispatch; presentation
//! layers send commands in and consume session events back.

mod controller;

pub(crate) use controller::{run_controller, SessionEvent, SessionState, UiCommand};
