use super::driver::{Driver, RunSummary};
use crate::error::{AfResult, ArrayForgeError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Paused,
    Stopping,
}

/// Cooperative pause / resume / stop flag, checked by the driver before
/// each generation.
#[derive(Debug)]
pub struct RunControl {
    state: Mutex<State>,
    changed: Condvar,
}

impl Default for RunControl {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::Running),
            changed: Condvar::new(),
        }
    }
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, next: State) {
        let mut state = self.lock();
        // Stopping is terminal
        if *state != State::Stopping {
            *state = next;
        }
        self.changed.notify_all();
    }

    pub fn pause(&self) {
        self.set(State::Paused);
    }

    pub fn resume(&self) {
        self.set(State::Running);
    }

    pub fn stop(&self) {
        self.set(State::Stopping);
    }

    pub fn is_paused(&self) -> bool {
        *self.lock() == State::Paused
    }

    pub fn is_stopping(&self) -> bool {
        *self.lock() == State::Stopping
    }

    /// Blocks while paused. Returns false once a stop has been requested.
    pub fn wait_if_paused(&self) -> bool {
        let mut state = self.lock();
        while *state == State::Paused {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        *state == State::Running
    }
}

/// Called on the optimiser thread once the run has finished.
pub type ExitHook = Box<dyn FnOnce(&AfResult<RunSummary>) + Send>;

/// A driver running on a background thread.
pub struct OptimiserThread {
    control: Arc<RunControl>,
    handle: JoinHandle<AfResult<RunSummary>>,
}

impl OptimiserThread {
    pub fn spawn(driver: Driver) -> AfResult<Self> {
        Self::spawn_with_hook(driver, None)
    }

    pub fn spawn_with_hook(mut driver: Driver, hook: Option<ExitHook>) -> AfResult<Self> {
        let control = Arc::new(RunControl::new());
        let shared = Arc::clone(&control);

        let handle = thread::Builder::new()
            .name("arrayforge-optimiser".to_string())
            .spawn(move || {
                let outcome = driver.run(Some(&shared));
                if let Err(e) = &outcome {
                    error!("Optimiser thread failed: {}", e);
                }
                // Releases the worker pool and the violation log
                drop(driver);
                if let Some(hook) = hook {
                    hook(&outcome);
                }
                outcome
            })?;

        Ok(Self { control, handle })
    }

    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    pub fn pause(&self) {
        info!("Pausing optimiser after the current generation");
        self.control.pause();
    }

    pub fn resume(&self) {
        info!("Resuming optimiser");
        self.control.resume();
    }

    pub fn stop(&self) {
        info!("Stopping optimiser after the current generation");
        self.control.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> AfResult<RunSummary> {
        self.handle.join().map_err(|_| {
            ArrayForgeError::Simulation("Optimiser thread panicked".to_string())
        })?
    }
}
