//! Background reseed worker.
//!
//! The event hot path must never drain the pool or touch the cipher
//! backend itself; it only wins the reseed guard and pushes a token here.
//! A dedicated thread performs the actual drain-and-inject pass and the
//! staggered seeding of the secondary instances.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

use crate::subsystem::Shared;

pub(crate) fn spawn(
    shared: Arc<Shared>,
    trigger: Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    Builder::new()
        .name("noisepool-reseed".into())
        .spawn(move || run(shared, trigger))
}

fn run(shared: Arc<Shared>, trigger: Receiver<()>) {
    // The channel closes when the subsystem is dropped.
    while trigger.recv().is_ok() {
        if shared.is_shutdown() {
            break;
        }
        shared.seed_pass();
    }
    log::debug!("reseed worker exiting");
}
