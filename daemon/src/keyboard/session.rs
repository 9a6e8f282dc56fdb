//! Connections to the X server
//!
//! RECORD wants two connections: one for control requests and one that is
//! dedicated to the blocking `RecordEnableContext` delivery. The control
//! connection is also used for keysym lookups and XTEST injection, so it is
//! shared behind an `Arc`.

use std::sync::Arc;

use tracing::{debug, info};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::record::{self, ConnectionExt as _};
use x11rb::protocol::xproto::ConnectionExt as _;
use x11rb::protocol::xtest::{self, ConnectionExt as _};
use x11rb::rust_connection::RustConnection;

use super::roles::{KeyCode, KeyboardMapping, Keysym};

/// Fatal startup errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not open display {display} (not running under X11?)")]
    Connect {
        display: String,
        #[source]
        source: ConnectError,
    },

    #[error("X connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("X request failed: {0}")]
    Reply(#[from] ReplyError),

    #[error("could not allocate an X resource id: {0}")]
    IdAllocation(#[from] ReplyOrIdError),

    #[error("the {name} extension has not been loaded by the X server{hint}")]
    ExtensionMissing {
        name: &'static str,
        hint: &'static str,
    },

    #[error(
        "keysym {keysym:#06x} is not bound to any keycode; \
         reserve a spare code for it first (e.g. `xmodmap -e 'keycode any = space'`)"
    )]
    TapKeysymUnmapped { keysym: Keysym },

    #[error("keycode {keycode} has no symbol in the current layout")]
    TargetUnmapped { keycode: KeyCode },

    #[error("keycode {keycode} is outside the server range {min}..={max}")]
    KeycodeOutOfRange { keycode: KeyCode, min: KeyCode, max: KeyCode },
}

const RECORD_HINT: &str = "; try adding `Load \"record\"` to the `Module` section of /etc/X11/xorg.conf";

/// The pair of connections to one X display
pub struct Session {
    control: Arc<RustConnection>,
    data: RustConnection,
}

impl Session {
    /// Connect twice to `display` (or `$DISPLAY`) and check for XTEST and RECORD
    pub fn open(display: Option<&str>) -> Result<Self, SessionError> {
        let control = connect(display)?;
        let data = connect(display)?;

        require_extension(&control, xtest::X11_EXTENSION_NAME, "")?;
        require_extension(&control, record::X11_EXTENSION_NAME, RECORD_HINT)?;

        let xtest_version = control.xtest_get_version(2, 2)?.reply()?;
        let record_version = control.record_query_version(1, 13)?.reply()?;
        info!(
            xtest = %format!("{}.{}", xtest_version.major_version, xtest_version.minor_version),
            record = %format!("{}.{}", record_version.major_version, record_version.minor_version),
            "X session opened"
        );

        Ok(Self {
            control: Arc::new(control),
            data,
        })
    }

    /// Read the core keyboard mapping for the server's whole keycode range
    pub fn keyboard_mapping(&self) -> Result<KeyboardMapping, SessionError> {
        let setup = self.control.setup();
        let (min_keycode, max_keycode) = (setup.min_keycode, setup.max_keycode);
        let count = max_keycode.saturating_sub(min_keycode).saturating_add(1);

        let reply = self
            .control
            .get_keyboard_mapping(min_keycode, count)?
            .reply()?;
        debug!(
            min_keycode,
            max_keycode,
            keysyms_per_keycode = reply.keysyms_per_keycode,
            "keyboard mapping read"
        );

        Ok(KeyboardMapping {
            min_keycode,
            max_keycode,
            keysyms_per_keycode: usize::from(reply.keysyms_per_keycode),
            keysyms: reply.keysyms,
        })
    }

    /// Split into the shared control connection and the data connection
    pub fn into_parts(self) -> (Arc<RustConnection>, RustConnection) {
        (self.control, self.data)
    }
}

fn connect(display: Option<&str>) -> Result<RustConnection, SessionError> {
    let (conn, _screen) = x11rb::connect(display).map_err(|source| SessionError::Connect {
        display: display.unwrap_or("$DISPLAY").to_string(),
        source,
    })?;
    Ok(conn)
}

fn require_extension(
    conn: &RustConnection,
    name: &'static str,
    hint: &'static str,
) -> Result<(), SessionError> {
    match conn.extension_information(name)? {
        Some(_) => Ok(()),
        None => Err(SessionError::ExtensionMissing { name, hint }),
    }
}
