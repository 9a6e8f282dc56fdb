//! Synthetic tap injection through XTEST

use std::sync::Arc;

use x11rb::errors::{ConnectionError, ReplyError};
use x11rb::protocol::xproto::{KEY_PRESS_EVENT, KEY_RELEASE_EVENT};
use x11rb::protocol::xtest::ConnectionExt as _;
use x11rb::rust_connection::RustConnection;

use super::roles::KeyCode;

/// A rejected injection. Never fatal: the tap is dropped.
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("X connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("fake input rejected: {0}")]
    Rejected(#[from] ReplyError),
}

/// Emits a press and release of the dedicated tap key
pub trait TapInjector {
    fn inject_tap(&self) -> Result<(), InjectError>;
}

/// Injects on the control connection, never on the data connection
pub struct XTestInjector {
    control: Arc<RustConnection>,
    keycode: KeyCode,
}

impl XTestInjector {
    pub fn new(control: Arc<RustConnection>, keycode: KeyCode) -> Self {
        Self { control, keycode }
    }

    fn fake_key(&self, event_type: u8) -> Result<(), InjectError> {
        self.control
            .xtest_fake_input(
                event_type,
                self.keycode,
                x11rb::CURRENT_TIME,
                x11rb::NONE,
                0,
                0,
                0,
            )?
            .check()?;
        Ok(())
    }
}

impl TapInjector for XTestInjector {
    fn inject_tap(&self) -> Result<(), InjectError> {
        self.fake_key(KEY_PRESS_EVENT)?;
        self.fake_key(KEY_RELEASE_EVENT)
    }
}
