//! X11 keyboard boundary
//!
//! Classifies the layout into key roles, intercepts key and button events
//! system-wide through RECORD and injects synthetic taps through XTEST.

mod event;
mod inject;
mod listener;
mod roles;
mod session;

pub use event::{EventKind, InputEvent};
pub use listener::KeyListener;
pub use roles::{keysyms, KeyCode, Keysym, Role, RoleSet, TapKey};
pub use session::Session;
