//! Signal forwarding
//!
//! Signals arrive on arbitrary runtime threads and are not allowed to touch
//! scheduler state: each handler only posts a control event into the
//! engine's queue. `HUP` reloads the catalog, `USR1` dumps scheduler state,
//! `TERM` and `INT` request an orderly shutdown. Child exits reach the
//! engine through the supervisor's waiter tasks, which the runtime feeds
//! from `CHLD`.

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::UnboundedSender;

use crate::application::engine::events::{ControlEvent, EngineEvent};

/// Installs the signal handlers and spawns the forwarder tasks.
pub fn spawn_signal_forwarders(events: UnboundedSender<EngineEvent>) -> Result<()> {
    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    let mut dump =
        signal(SignalKind::user_defined1()).context("failed to install SIGUSR1 handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    let reload_tx = events.clone();
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            if reload_tx
                .send(EngineEvent::Control(ControlEvent::Reload))
                .is_err()
            {
                break;
            }
        }
    });

    let dump_tx = events.clone();
    tokio::spawn(async move {
        while dump.recv().await.is_some() {
            if dump_tx
                .send(EngineEvent::Control(ControlEvent::DumpState))
                .is_err()
            {
                break;
            }
        }
    });

    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = terminate.recv() => if received.is_none() { break },
                received = interrupt.recv() => if received.is_none() { break },
            }
            if events
                .send(EngineEvent::Control(ControlEvent::Shutdown))
                .is_err()
            {
                break;
            }
        }
    });

    Ok(())
}
