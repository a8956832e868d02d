//! Per-run suspend/resume/step control.
//!
//! A [`DebugController`] is shared between the executing script and operator
//! commands. The script calls [`DebugController::await_continue`] before each
//! observable step; operators call [`pause`](DebugController::pause),
//! [`resume`](DebugController::resume), [`step_next`](DebugController::step_next)
//! or [`stop`](DebugController::stop) from any thread.
//!
//! ```text
//! Running ⇄ Paused
//!    └───────┴──→ Stopped (terminal)
//! ```
//!
//! `await_continue` is the only place a running script blocks. State changes
//! are published through a `tokio::sync::watch` channel, so a waiter never
//! misses a resume that lands between its check and its wait.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

/// Reason recorded when a run is held at its first checkpoint.
pub const WAITING_FOR_START_REASON: &str = "waiting for start";

/// Debug mode of a running script.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DebugState {
    #[default]
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for DebugState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Raised by [`DebugController::await_continue`] once the controller is stopped.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DebugError {
    #[error("script execution stopped")]
    Stopped,
}

/// Receives pause/resume notifications from a waiting script.
pub trait DebugListener: Send + Sync {
    /// The script blocked at a checkpoint.
    fn on_paused(&self, reason: Option<&str>, timeout: Option<Duration>, description: &str);

    /// A pause reported through `on_paused` ended, whether or not the
    /// script is still blocked at the checkpoint.
    fn on_resumed(&self);
}

#[derive(Clone, Debug, Default)]
struct ControlState {
    mode: DebugState,
    reason: Option<String>,
    timeout: Option<Duration>,
    pending_steps: u32,
}

/// Suspend/resume/step synchronization for one run.
pub struct DebugController {
    state: watch::Sender<ControlState>,
    listener: Mutex<Option<Arc<dyn DebugListener>>>,
    /// Set while the listener has seen `on_paused` without a matching `on_resumed`.
    announced: AtomicBool,
}

impl Default for DebugController {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugController {
    /// Creates a controller in the `Running` state.
    pub fn new() -> Self {
        Self::with_state(ControlState::default())
    }

    /// Creates a controller that holds the script at its first checkpoint.
    pub fn paused(reason: impl Into<String>) -> Self {
        Self::with_state(ControlState {
            mode: DebugState::Paused,
            reason: Some(reason.into()),
            ..ControlState::default()
        })
    }

    fn with_state(initial: ControlState) -> Self {
        let (state, _rx) = watch::channel(initial);
        Self {
            state,
            listener: Mutex::new(None),
            announced: AtomicBool::new(false),
        }
    }

    /// Installs the listener notified when the script blocks or continues.
    pub fn set_listener(&self, listener: Arc<dyn DebugListener>) {
        *self.listener.lock() = Some(listener);
    }

    /// Removes the installed listener.
    pub fn clear_listener(&self) {
        self.listener.lock().take();
    }

    /// Returns the current mode.
    pub fn state(&self) -> DebugState {
        self.state.borrow().mode
    }

    /// Returns the reason of the current pause, if paused.
    pub fn pause_reason(&self) -> Option<String> {
        self.state.borrow().reason.clone()
    }

    /// Returns the timeout of the current pause, if any.
    pub fn pause_timeout(&self) -> Option<Duration> {
        self.state.borrow().timeout
    }

    /// Operator pause without timeout. Returns true if the mode changed.
    pub fn pause(&self) -> bool {
        self.enter_pause(None, None)
    }

    /// Engine-initiated pause that continues on its own once `timeout` elapses.
    pub fn pause_with_timeout(&self, timeout: Duration, reason: impl Into<String>) -> bool {
        self.enter_pause(Some(reason.into()), Some(timeout))
    }

    fn enter_pause(&self, reason: Option<String>, timeout: Option<Duration>) -> bool {
        self.state.send_if_modified(|s| {
            if s.mode != DebugState::Running {
                return false;
            }
            s.mode = DebugState::Paused;
            s.reason = reason;
            s.timeout = timeout;
            s.pending_steps = 0;
            true
        })
    }

    /// Leaves `Paused`. Returns true if the mode changed.
    ///
    /// The listener hears `on_resumed` right away, even if the script is
    /// between checkpoints after a step.
    pub fn resume(&self) -> bool {
        let resumed = self.state.send_if_modified(|s| {
            if s.mode != DebugState::Paused {
                return false;
            }
            s.mode = DebugState::Running;
            s.reason = None;
            s.timeout = None;
            s.pending_steps = 0;
            true
        });
        if resumed {
            self.announce_resumed();
        }
        resumed
    }

    /// Lets exactly one waiting checkpoint through while staying `Paused`.
    pub fn step_next(&self) -> bool {
        self.state.send_if_modified(|s| {
            if s.mode != DebugState::Paused {
                return false;
            }
            s.pending_steps += 1;
            true
        })
    }

    /// Moves to the terminal `Stopped` mode.
    pub fn stop(&self) {
        self.state.send_if_modified(|s| {
            if s.mode == DebugState::Stopped {
                return false;
            }
            s.mode = DebugState::Stopped;
            s.reason = None;
            s.timeout = None;
            s.pending_steps = 0;
            true
        });
    }

    fn take_step(&self) -> bool {
        self.state.send_if_modified(|s| {
            if s.mode == DebugState::Paused && s.pending_steps > 0 {
                s.pending_steps -= 1;
                true
            } else {
                false
            }
        })
    }

    fn expire_pause(&self) {
        let expired = self.state.send_if_modified(|s| {
            if s.mode != DebugState::Paused {
                return false;
            }
            s.mode = DebugState::Running;
            s.reason = None;
            s.timeout = None;
            true
        });
        if expired {
            self.announce_resumed();
        }
    }

    fn current_listener(&self) -> Option<Arc<dyn DebugListener>> {
        self.listener.lock().clone()
    }

    fn announce_paused(&self, reason: Option<&str>, timeout: Option<Duration>, description: &str) {
        self.announced.store(true, Ordering::SeqCst);
        if let Some(listener) = self.current_listener() {
            listener.on_paused(reason, timeout, description);
        }
    }

    /// Pairs an earlier `on_paused` with exactly one `on_resumed`.
    fn announce_resumed(&self) {
        if !self.announced.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(listener) = self.current_listener() {
            listener.on_resumed();
        }
    }

    /// Checkpoint called by the executing script before an observable step.
    ///
    /// Returns immediately while `Running`. While `Paused` it notifies the
    /// listener, then blocks until resumed, stepped, stopped, or until the
    /// pause timeout elapses. Returns [`DebugError::Stopped`] once stopped.
    pub async fn await_continue(&self, description: &str) -> Result<(), DebugError> {
        let mut rx = self.state.subscribe();

        let (reason, timeout) = {
            let current = rx.borrow_and_update();
            match current.mode {
                DebugState::Running => return Ok(()),
                DebugState::Stopped => return Err(DebugError::Stopped),
                DebugState::Paused => (current.reason.clone(), current.timeout),
            }
        };
        if self.take_step() {
            debug!(step = %description, "Single step");
            return Ok(());
        }

        self.announce_paused(reason.as_deref(), timeout, description);

        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let result = loop {
            let changed = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, rx.changed()).await,
                None => Ok(rx.changed().await),
            };
            match changed {
                Ok(Ok(())) => {}
                Ok(Err(_)) => break Err(DebugError::Stopped),
                Err(_elapsed) => {
                    debug!(step = %description, "Pause timeout elapsed, continuing");
                    self.expire_pause();
                }
            }

            let mode = rx.borrow_and_update().mode;
            match mode {
                DebugState::Running => break Ok(true),
                DebugState::Stopped => break Err(DebugError::Stopped),
                DebugState::Paused if self.take_step() => break Ok(false),
                DebugState::Paused => {}
            }
        };

        match result {
            Ok(true) => {
                self.announce_resumed();
                Ok(())
            }
            Ok(false) => {
                debug!(step = %description, "Single step");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for DebugController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("DebugController")
            .field("mode", &state.mode)
            .field("reason", &state.reason)
            .field("timeout", &state.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener {
        paused: AtomicUsize,
        resumed: AtomicUsize,
    }

    impl DebugListener for CountingListener {
        fn on_paused(&self, _reason: Option<&str>, _timeout: Option<Duration>, _description: &str) {
            self.paused.fetch_add(1, Ordering::SeqCst);
        }

        fn on_resumed(&self) {
            self.resumed.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_running_returns_immediately() {
        let controller = DebugController::new();
        assert_eq!(controller.await_continue("step").await, Ok(()));
    }

    #[tokio::test]
    async fn test_stopped_raises() {
        let controller = DebugController::new();
        controller.stop();
        assert_eq!(controller.state(), DebugState::Stopped);
        assert_eq!(controller.await_continue("step").await, Err(DebugError::Stopped));
    }

    #[test]
    fn test_transitions() {
        let controller = DebugController::new();
        assert!(!controller.resume());
        assert!(!controller.step_next());
        assert!(controller.pause());
        assert!(!controller.pause());
        assert!(controller.step_next());
        assert!(controller.resume());
        controller.stop();
        assert!(!controller.pause());
        assert!(!controller.resume());
        assert_eq!(controller.state(), DebugState::Stopped);
    }

    #[tokio::test]
    async fn test_pause_then_resume_unblocks_waiter() {
        let controller = Arc::new(DebugController::new());
        let listener = Arc::new(CountingListener::default());
        controller.set_listener(listener.clone());
        controller.pause_with_timeout(Duration::from_secs(60), "operator");
        assert_eq!(controller.pause_reason().as_deref(), Some("operator"));

        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.await_continue("send order").await })
        };
        settle().await;
        assert!(!waiter.is_finished());
        assert_eq!(listener.paused.load(Ordering::SeqCst), 1);

        assert!(controller.resume());
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert_eq!(result, Ok(()));
        assert_eq!(controller.state(), DebugState::Running);
        assert!(controller.pause_reason().is_none());
        assert_eq!(listener.resumed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_step_passes_one_checkpoint() {
        let controller = Arc::new(DebugController::paused(WAITING_FOR_START_REASON));
        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.await_continue("first").await })
        };
        settle().await;
        assert!(controller.step_next());

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("step should wake the waiter")
            .unwrap();
        assert_eq!(result, Ok(()));
        assert_eq!(controller.state(), DebugState::Paused);

        let second = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.await_continue("second").await })
        };
        settle().await;
        assert!(!second.is_finished());
        controller.stop();
        let result = tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(DebugError::Stopped));
    }

    #[tokio::test]
    async fn test_resume_after_step_reports_resumed() {
        let controller = Arc::new(DebugController::paused(WAITING_FOR_START_REASON));
        let listener = Arc::new(CountingListener::default());
        controller.set_listener(listener.clone());

        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.await_continue("first").await })
        };
        settle().await;
        assert_eq!(listener.paused.load(Ordering::SeqCst), 1);
        assert!(controller.step_next());
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Ok(()));
        assert_eq!(listener.resumed.load(Ordering::SeqCst), 0);

        // Resumed while the script is between checkpoints.
        assert!(controller.resume());
        assert_eq!(listener.resumed.load(Ordering::SeqCst), 1);

        assert_eq!(controller.await_continue("second").await, Ok(()));
        assert!(controller.pause());
        assert!(controller.resume());
        assert_eq!(listener.paused.load(Ordering::SeqCst), 1);
        assert_eq!(listener.resumed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pending_step_consumed_without_blocking() {
        let controller = DebugController::paused("hold");
        controller.step_next();
        assert_eq!(controller.await_continue("step").await, Ok(()));
        assert_eq!(controller.state(), DebugState::Paused);
    }

    #[tokio::test]
    async fn test_timeout_continues_on_its_own() {
        let controller = DebugController::new();
        controller.pause_with_timeout(Duration::from_millis(40), "ask for continue");
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            controller.await_continue("checkpoint"),
        )
        .await
        .expect("timeout should release the waiter");
        assert_eq!(result, Ok(()));
        assert_eq!(controller.state(), DebugState::Running);
        assert!(controller.pause_timeout().is_none());
    }
}
