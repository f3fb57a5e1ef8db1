// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for the acquisition loop
//!
//! The loop body runs on a dedicated, named thread and owns its state. The
//! state is dropped on that thread when the loop exits, so device sessions
//! and worker pools held by it are released before `join` returns.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

/// Action returned by the loop body to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a loop running in a separate thread
pub struct CaptureLoopController {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Cooperative stop flag, checked once per iteration
    stop_signal: Arc<AtomicBool>,
    /// Name for logging
    name: String,
}

impl CaptureLoopController {
    /// Start a loop that owns `state`
    ///
    /// `loop_fn` is called repeatedly until it returns `LoopAction::Stop` or
    /// `stop_signal` is raised. The stop signal is shared so other handles
    /// can request a stop without access to the controller.
    pub fn start<S, F>(
        name: &str,
        stop_signal: Arc<AtomicBool>,
        mut state: S,
        mut loop_fn: F,
    ) -> io::Result<Self>
    where
        S: Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        info!(name = %name, "Starting capture loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %name_clone, "Capture loop thread started");

                loop {
                    // Check stop signal first
                    if stop_signal_clone.load(Ordering::SeqCst) {
                        debug!(name = %name_clone, "Stop signal received");
                        break;
                    }

                    match loop_fn(&mut state) {
                        LoopAction::Continue => {}
                        LoopAction::Stop => {
                            debug!(name = %name_clone, "Loop requested stop");
                            break;
                        }
                    }
                }

                drop(state);
                info!(name = %name_clone, "Capture loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "Waiting for capture loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Capture loop thread finished");
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn test_basic_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start(
            "test-loop",
            Arc::new(AtomicBool::new(false)),
            (),
            move |_| {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                if count >= 10 {
                    LoopAction::Stop
                } else {
                    LoopAction::Continue
                }
            },
        )
        .unwrap();

        // Wait for loop to finish itself
        controller.join();

        assert_eq!(counter.load(Ordering::SeqCst), 11); // 0-10 inclusive
    }

    #[test]
    fn test_shared_stop_signal() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let stop = Arc::new(AtomicBool::new(false));

        let mut controller =
            CaptureLoopController::start("test-loop", Arc::clone(&stop), (), move |_| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                LoopAction::Continue
            })
            .unwrap();

        thread::sleep(Duration::from_millis(50));

        // Raised from outside the controller
        stop.store(true, Ordering::SeqCst);
        controller.join();
        assert!(counter.load(Ordering::SeqCst) > 0);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_state_dropped_on_loop_thread() {
        struct Probe(Arc<AtomicBool>);
        impl Drop for Probe {
            fn drop(&mut self) {
                let name = thread::current().name().map(str::to_owned);
                self.0
                    .store(name.as_deref() == Some("test-drop"), Ordering::SeqCst);
            }
        }

        let dropped_on_loop = Arc::new(AtomicBool::new(false));
        let mut controller = CaptureLoopController::start(
            "test-drop",
            Arc::new(AtomicBool::new(false)),
            Probe(Arc::clone(&dropped_on_loop)),
            |_| LoopAction::Stop,
        )
        .unwrap();

        controller.join();
        assert!(dropped_on_loop.load(Ordering::SeqCst));
    }

    #[test]
    fn test_is_running() {
        let controller = CaptureLoopController::start(
            "test-running",
            Arc::new(AtomicBool::new(false)),
            (),
            |_| {
                thread::sleep(Duration::from_millis(100));
                LoopAction::Continue
            },
        )
        .unwrap();

        assert!(controller.is_running());

        // Drop will stop it
        drop(controller);
    }
}
