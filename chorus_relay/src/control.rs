// Poll-loop lifecycle shared by the server and client background threads.
//
// Both loops follow the same state machine:
//
//   Running --close()--> Stopping --loop observes it--> Stopped
//   Running --peer closed (client only)--------------> Stopped
//
// `LoopControl` holds that state behind a mutex and a condvar. The loop checks
// `is_running()` at the top of every iteration and waits out the poll interval
// with `sleep()`, which returns early when `request_stop()` is called, so
// `close()` never has to wait for a full tick. `wait_stopped()` lets the
// closing thread block until the loop has actually exited.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Lifecycle of a server or client poll loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopping,
    Stopped,
}

pub(crate) struct LoopControl {
    state: Mutex<LoopState>,
    changed: Condvar,
}

impl LoopControl {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(LoopState::Running),
            changed: Condvar::new(),
        }
    }

    // A panicking handler must not wedge `close()`, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> LoopState {
        *self.lock()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    /// `Running -> Stopping`. Returns false if the loop was not running.
    pub(crate) fn request_stop(&self) -> bool {
        let mut state = self.lock();
        if *state != LoopState::Running {
            return false;
        }
        *state = LoopState::Stopping;
        self.changed.notify_all();
        true
    }

    pub(crate) fn mark_stopped(&self) {
        *self.lock() = LoopState::Stopped;
        self.changed.notify_all();
    }

    /// Wait for one poll interval, or less if a stop is requested meanwhile.
    pub(crate) fn sleep(&self, interval: Duration) {
        let guard = self.lock();
        let _ = self
            .changed
            .wait_timeout_while(guard, interval, |state| *state == LoopState::Running)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Marks the loop `Stopped` when the polling thread exits, including by panic.
pub(crate) struct StoppedOnDrop<'a>(pub(crate) &'a LoopControl);

impl Drop for StoppedOnDrop<'_> {
    fn drop(&mut self) {
        self.0.mark_stopped();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn starts_running() {
        let control = LoopControl::new();
        assert_eq!(control.state(), LoopState::Running);
        assert!(control.is_running());
    }

    #[test]
    fn stop_request_only_transitions_once() {
        let control = LoopControl::new();
        assert!(control.request_stop());
        assert_eq!(control.state(), LoopState::Stopping);
        assert!(!control.request_stop());

        control.mark_stopped();
        assert_eq!(control.state(), LoopState::Stopped);
        assert!(!control.request_stop());
    }

    #[test]
    fn sleep_runs_full_interval_while_running() {
        let control = LoopControl::new();
        let start = Instant::now();
        control.sleep(Duration::from_millis(30));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn stop_request_cuts_sleep_short() {
        let control = Arc::new(LoopControl::new());
        let sleeper = {
            let control = Arc::clone(&control);
            thread::spawn(move || {
                let start = Instant::now();
                control.sleep(Duration::from_secs(30));
                start.elapsed()
            })
        };
        thread::sleep(Duration::from_millis(20));
        control.request_stop();
        let slept = sleeper.join().unwrap();
        assert!(slept < Duration::from_secs(5), "slept {slept:?}");
    }

    #[test]
    fn guard_marks_stopped_on_drop() {
        let control = LoopControl::new();
        {
            let _guard = StoppedOnDrop(&control);
        }
        assert_eq!(control.state(), LoopState::Stopped);
    }
}
