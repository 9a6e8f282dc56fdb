//! Classification of intercepted protocol data into input events

use std::fmt;
use std::time::Instant;

use x11rb::protocol::xproto::{BUTTON_PRESS_EVENT, KEY_PRESS_EVENT, KEY_RELEASE_EVENT};

use super::roles::KeyCode;

/// RECORD reply categories (`XRecordFromServer` ... `XRecordEndOfData`)
pub mod category {
    pub const FROM_SERVER: u8 = 0;
    pub const START_OF_DATA: u8 = 4;
    pub const END_OF_DATA: u8 = 5;
}

/// Set on events delivered through `SendEvent`
const SEND_EVENT_MASK: u8 = 0x80;

/// Length of one core protocol event
const CORE_EVENT_LEN: usize = 32;

/// `element_header` bit: server data carries a 4-byte timestamp prefix
const FROM_SERVER_TIME: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    KeyDown,
    KeyUp,
    PointerDown,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::KeyDown => write!(f, "KeyDown"),
            EventKind::KeyUp => write!(f, "KeyUp"),
            EventKind::PointerDown => write!(f, "PointerDown"),
        }
    }
}

/// A classified input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: EventKind,
    /// Keycode, or button number for `PointerDown`
    pub code: KeyCode,
    /// Receipt time
    pub at: Instant,
}

impl InputEvent {
    pub fn key_down(code: KeyCode, at: Instant) -> Self {
        Self { kind: EventKind::KeyDown, code, at }
    }

    pub fn key_up(code: KeyCode, at: Instant) -> Self {
        Self { kind: EventKind::KeyUp, code, at }
    }

    pub fn pointer_down(button: u8, at: Instant) -> Self {
        Self { kind: EventKind::PointerDown, code: button, at }
    }
}

/// Classify every element of one intercepted reply, in order.
///
/// The server buffers protocol elements and flushes them together, so
/// `data` holds one or more 32-byte core events, each preceded by a
/// timestamp when `element_header` asks for it. Only data the server sent
/// is considered. Elements that are not a key press, key release or button
/// press are skipped, as is a truncated tail.
pub fn classify(
    category: u8,
    element_header: u8,
    data: &[u8],
    at: Instant,
) -> impl Iterator<Item = InputEvent> + '_ {
    let data = if category == category::FROM_SERVER { data } else { &[][..] };
    let prefix = if element_header & FROM_SERVER_TIME != 0 { 4 } else { 0 };

    data.chunks_exact(prefix + CORE_EVENT_LEN)
        .filter_map(move |element| classify_element(&element[prefix..], at))
}

fn classify_element(element: &[u8], at: Instant) -> Option<InputEvent> {
    let [event_type, detail, ..] = *element else {
        return None;
    };

    match event_type & !SEND_EVENT_MASK {
        KEY_PRESS_EVENT => Some(InputEvent::key_down(detail, at)),
        KEY_RELEASE_EVENT => Some(InputEvent::key_up(detail, at)),
        BUTTON_PRESS_EVENT => Some(InputEvent::pointer_down(detail, at)),
        _ => None,
    }
}
