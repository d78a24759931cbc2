//! The dedicated thread that drives an [`InputDispatcher`].

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use crate::application::dispatcher::InputDispatcher;

/// Runs [`InputDispatcher::dispatch_once`] in a loop on a thread named
/// `InputDispatcher` until stopped.  Dropping the handle stops and joins it.
pub struct InputDispatcherThread {
    dispatcher: Arc<InputDispatcher>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl InputDispatcherThread {
    /// Spawns the thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be created.
    pub fn start(dispatcher: Arc<InputDispatcher>) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let dispatcher = Arc::clone(&dispatcher);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("InputDispatcher".to_string())
                .spawn(move || dispatch_loop(&dispatcher, &running))?
        };
        info!("input dispatcher thread started");

        Ok(Self {
            dispatcher,
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Asks the thread to exit after its current iteration.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
        self.dispatcher.wake();
    }

    /// Stops the thread and waits for it to exit.
    pub fn join(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.request_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("input dispatcher thread panicked");
            }
            info!("input dispatcher thread stopped");
        }
    }
}

impl Drop for InputDispatcherThread {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn dispatch_loop(dispatcher: &InputDispatcher, running: &AtomicBool) {
    while running.load(Ordering::Acquire) {
        dispatcher.dispatch_once();
    }
}
