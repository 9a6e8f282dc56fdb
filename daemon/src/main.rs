//! space2super: Space when tapped, Super when held
//!
//! The layout has already been rewritten so the Space key sends Super and
//! a spare keycode sends space. This daemon watches every key and button
//! event of the X session and, when Space was pressed and released alone
//! within the timeout, injects the spare keycode so a space is typed.
//!
//! - Key roles are read once from the live layout
//! - Events arrive through the RECORD extension on a dedicated thread
//! - Taps are injected through XTEST on the control connection
//! - SIGINT/SIGTERM disable the record context and exit cleanly

mod config;
mod keyboard;
mod lifecycle;
mod state;

use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Args, Config};
use crate::keyboard::{KeyListener, Role, Session};
use crate::lifecycle::ShutdownSignal;
use crate::state::TapMachine;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "space2super starting"
    );

    match run(args).await {
        Ok(()) => {
            info!("space2super stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args).context("failed to load configuration")?;
    info!(?config, "configuration loaded");

    // Register before connecting so an early signal is not lost
    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    let session = Session::open(config.display.as_deref()).context("failed to open the X session")?;
    let mapping = session
        .keyboard_mapping()
        .context("failed to read the keyboard mapping")?;
    let (roles, tap_keycode) = mapping
        .resolve(config.target_keycode, config.tap)
        .context("failed to resolve key roles")?;

    info!(
        target = roles.target(),
        tap = tap_keycode,
        modifiers = ?roles.codes(Role::Modifier),
        supers = ?roles.codes(Role::Super),
        "key roles classified"
    );

    let machine = TapMachine::new(roles, config.timeout(), config.eager_super);
    let (listener, mut exited) =
        KeyListener::start(session, machine, tap_keycode).context("failed to start the key listener")?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        reason = shutdown.wait() => {
            info!(%reason, "shutdown signal received");
        }

        result = &mut exited => {
            return match result {
                Ok(Ok(())) => {
                    warn!("event delivery ended without a shutdown request");
                    Ok(())
                }
                Ok(Err(e)) => Err(e).context("event delivery failed"),
                Err(_) => Err(anyhow!("engine thread exited without reporting")),
            };
        }
    }

    // Cleanup
    info!("shutting down...");

    listener.stop();
    match exited.await {
        Ok(Ok(())) | Err(_) => {}
        Ok(Err(e)) => warn!(%e, "event delivery ended with an error during shutdown"),
    }

    Ok(())
}
