//! Tap/hold state machine
//!
//! Three phases over the target key:
//! - Idle: target is up
//! - Armed: target is down alone, a release in time types the character
//! - Combo: target is down together with something else, acts as Super

mod machine;

pub use machine::{Action, Phase, TapMachine};
