//! System-wide key interception using the X RECORD extension
//!
//! A RECORD context covering key and button device events of all clients
//! is created on the control connection and enabled on the data
//! connection. Enabling blocks for as long as the context stays enabled,
//! so delivery runs on a dedicated thread that owns the state machine.
//! Each reply may carry several events; they are classified, processed and
//! acted on in order before the next reply is read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use x11rb::connection::Connection;
use x11rb::errors::{ConnectionError, ReplyError};
use x11rb::protocol::record::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{BUTTON_RELEASE_EVENT, KEY_PRESS_EVENT};
use x11rb::rust_connection::RustConnection;

use super::event::{self, category, InputEvent};
use super::inject::{TapInjector, XTestInjector};
use super::roles::KeyCode;
use super::session::{Session, SessionError};
use crate::state::{Action, TapMachine};

/// Errors that can occur in the key listener
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("could not create a record context: {0}")]
    ContextCreation(#[from] SessionError),

    #[error("failed to spawn engine thread: {0}")]
    ThreadSpawn(String),

    #[error("X connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("couldn't enable the record context: {0}")]
    Delivery(#[from] ReplyError),
}

/// Resolves once the delivery thread has finished
pub type ListenerExit = oneshot::Receiver<Result<(), ListenerError>>;

/// Handle to the running delivery thread
pub struct KeyListener {
    control: Arc<RustConnection>,
    context: record::Context,
    stopped: AtomicBool,
}

impl KeyListener {
    /// Start delivering events to `machine` on a dedicated thread.
    ///
    /// Taps are injected as `tap_keycode` on the control connection.
    pub fn start(
        session: Session,
        machine: TapMachine,
        tap_keycode: KeyCode,
    ) -> Result<(Self, ListenerExit), ListenerError> {
        let (control, data) = session.into_parts();
        let context = create_context(&control)?;
        let injector = XTestInjector::new(Arc::clone(&control), tap_keycode);
        let (exit_tx, exit_rx) = oneshot::channel();

        let spawned = thread::Builder::new()
            .name("space2super-engine".to_string())
            .spawn(move || {
                info!("engine thread started");

                let result = run_event_loop(&data, context, machine, &injector);
                if let Err(e) = &result {
                    error!(%e, "event delivery failed");
                }
                let _ = exit_tx.send(result);

                info!("engine thread stopped");
            });

        if let Err(e) = spawned {
            free_context(&control, context);
            return Err(ListenerError::ThreadSpawn(e.to_string()));
        }

        Ok((
            Self {
                control,
                context,
                stopped: AtomicBool::new(false),
            },
            exit_rx,
        ))
    }

    /// Disable and free the record context.
    ///
    /// The server answers a disable with an end-of-data reply, which
    /// unblocks the delivery thread. Safe to call more than once.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("stopping event delivery");
        match self.control.record_disable_context(self.context) {
            Ok(cookie) => {
                if let Err(e) = cookie.check() {
                    warn!(%e, "couldn't disable the record context");
                }
            }
            Err(e) => warn!(%e, "couldn't disable the record context"),
        }
        free_context(&self.control, self.context);
    }
}

fn create_context(control: &RustConnection) -> Result<record::Context, ListenerError> {
    let context = control.generate_id().map_err(SessionError::from)?;

    let range = record::Range {
        core_requests: empty_range8(),
        core_replies: empty_range8(),
        ext_requests: empty_ext_range(),
        ext_replies: empty_ext_range(),
        delivered_events: empty_range8(),
        device_events: record::Range8 {
            first: KEY_PRESS_EVENT,
            last: BUTTON_RELEASE_EVENT,
        },
        errors: empty_range8(),
        client_started: false,
        client_died: false,
    };
    let clients = [u32::from(record::CS::ALL_CLIENTS)];

    control
        .record_create_context(context, 0, &clients, &[range])
        .map_err(SessionError::from)?
        .check()
        .map_err(SessionError::from)?;

    debug!(context, "record context created");
    Ok(context)
}

fn empty_range8() -> record::Range8 {
    record::Range8 { first: 0, last: 0 }
}

fn empty_ext_range() -> record::ExtRange {
    record::ExtRange {
        major: empty_range8(),
        minor: record::Range16 { first: 0, last: 0 },
    }
}

fn free_context(control: &RustConnection, context: record::Context) {
    let freed = control
        .record_free_context(context)
        .map_err(ReplyError::from)
        .and_then(|cookie| cookie.check());
    if let Err(e) = freed {
        warn!(%e, "couldn't free the record context");
    }
}

/// Block on the data connection until the context is disabled
fn run_event_loop<I: TapInjector>(
    data: &RustConnection,
    context: record::Context,
    mut machine: TapMachine,
    injector: &I,
) -> Result<(), ListenerError> {
    let replies = data.record_enable_context(context)?;

    for reply in replies {
        let reply = reply?;
        let delivery = handle_reply(
            &mut machine,
            injector,
            reply.category,
            reply.element_header,
            &reply.data,
            Instant::now(),
        );
        if delivery == Delivery::Finished {
            break;
        }
    }

    Ok(())
}

/// Whether more replies follow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Continue,
    Finished,
}

/// Handle one record reply: every event it carries goes through the
/// machine in order, all stamped with the receipt time
pub(crate) fn handle_reply<I: TapInjector>(
    machine: &mut TapMachine,
    injector: &I,
    category: u8,
    element_header: u8,
    data: &[u8],
    at: Instant,
) -> Delivery {
    match category {
        category::START_OF_DATA => {
            info!("record context enabled, delivering events");
            Delivery::Continue
        }
        category::END_OF_DATA => {
            debug!("record context reported end of data");
            Delivery::Finished
        }
        _ => {
            for event in event::classify(category, element_header, data, at) {
                dispatch(machine, injector, &event);
            }
            Delivery::Continue
        }
    }
}

/// Run one event through the machine and carry out its action
pub(crate) fn dispatch<I: TapInjector>(machine: &mut TapMachine, injector: &I, event: &InputEvent) {
    if let Some(Action::InjectTap) = machine.process(event) {
        debug!("injecting synthetic tap");
        if let Err(e) = injector.inject_tap() {
            warn!(%e, "synthetic tap dropped");
        }
    }
}
