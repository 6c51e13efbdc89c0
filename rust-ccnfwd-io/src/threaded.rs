//! Runs the whole forwarder on a dedicated thread.
//!
//! The wrapper owns a current-thread runtime hosting the dispatcher;
//! `start` blocks until the event loop is live, `stop` shuts it down and
//! joins the thread. No concurrency is added inside the forwarder; this
//! only moves the single event-loop thread out of the caller's way.

use crate::dispatcher::Dispatcher;
use crate::handle::ForwarderHandle;
use anyhow::{anyhow, Context, Result};
use rust_ccnfwd_core::Forwarder;
use std::thread::JoinHandle;
use tracing::debug;

pub struct ThreadedForwarder {
    handle: ForwarderHandle,
    thread: Option<JoinHandle<()>>,
}

impl ThreadedForwarder {
    /// Spawn the forwarder thread and wait for its event loop to start.
    pub fn start(forwarder: Forwarder) -> Result<Self> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("ccnfwd".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        debug!(%err, "runtime construction failed");
                        return;
                    }
                };
                runtime.block_on(async move {
                    let (dispatcher, handle) = Dispatcher::new(forwarder);
                    if ready_tx.send(handle).is_err() {
                        return;
                    }
                    dispatcher.run().await;
                });
            })
            .context("spawning forwarder thread")?;

        let handle = ready_rx
            .recv()
            .map_err(|_| anyhow!("forwarder thread died during startup"))?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// The configuration handle of the running forwarder.
    pub fn handle(&self) -> ForwarderHandle {
        self.handle.clone()
    }

    /// Stop the event loop and join the thread.
    pub fn stop(mut self) -> Result<()> {
        self.handle.shutdown_blocking()?;
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow!("forwarder thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ThreadedForwarder {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.shutdown_blocking();
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_serves_and_stops() {
        let threaded = ThreadedForwarder::start(Forwarder::new(4)).unwrap();
        let handle = threaded.handle();

        // Drive a command through the forwarder thread from outside any
        // runtime.
        let probe_rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let routes = probe_rt.block_on(handle.routes()).unwrap();
        assert!(routes.is_empty());

        threaded.stop().unwrap();
    }
}
