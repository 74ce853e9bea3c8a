//! Watch mode.
//!
//! An explicit state machine ([`WatchController`]) decides what to do with
//! each event; [`WatchSession`] executes the resulting actions against a
//! [`Bundler`] and the system's file watches. Bursts of filesystem events
//! are coalesced by a 250 ms debounce window, and a pass whose bundle is
//! byte-identical to the previous one emits no `BundleUpdated`.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::bundle::Bundle;
use crate::bundler::{Bundler, Options};
use crate::error::CompilerError;
use crate::frontend::Diagnostic;
use crate::paths;
use crate::system::{FsEvent, System};

/// Quiet period after the last change before a rebundle starts.
pub const DEBOUNCE: Duration = Duration::from_millis(250);

const IDLE_POLL: Duration = Duration::from_millis(500);

/// Controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Waiting for changes.
    Idle,
    /// Changes seen; the debounce timer is running.
    Debouncing,
    /// A bundling pass is in flight.
    Bundling,
    /// A change arrived while bundling; another pass follows.
    BundlingDirty,
    /// The session has been cancelled.
    Cancelled,
}

/// Events fed to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A watched file changed or disappeared.
    FileChanged(String),
    /// The debounce timer ran out.
    DebounceElapsed,
    /// The front-end produced a fresh program.
    ProgramCreated,
    /// The current bundling pass finished.
    PassDone,
    /// External cancellation.
    Cancel,
}

/// Actions the session must carry out in response to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    /// Drop the bundler's cached state for a path.
    Invalidate(String),
    /// Start or reset the debounce timer.
    StartDebounce,
    /// Run a bundling pass.
    Rebundle,
    /// Release all file watches and timers.
    StopWatching,
}

/// The dirty/clean state machine behind watch mode.
#[derive(Debug)]
pub struct WatchController {
    state: WatchState,
}

impl Default for WatchController {
    fn default() -> Self {
        WatchController::new()
    }
}

impl WatchController {
    /// A controller in the idle state.
    pub fn new() -> Self {
        WatchController {
            state: WatchState::Idle,
        }
    }

    /// The current state.
    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Feed one event, yielding the actions to perform, in order.
    pub fn on_event(&mut self, event: WatchEvent) -> Vec<WatchAction> {
        let (next, actions) = match (self.state, event) {
            (WatchState::Cancelled, _) => (WatchState::Cancelled, vec![]),
            (_, WatchEvent::Cancel) => {
                (WatchState::Cancelled, vec![WatchAction::StopWatching])
            }
            (WatchState::Idle, WatchEvent::FileChanged(path)) => (
                WatchState::Debouncing,
                vec![WatchAction::Invalidate(path), WatchAction::StartDebounce],
            ),
            (WatchState::Debouncing, WatchEvent::FileChanged(path)) => (
                WatchState::Debouncing,
                vec![WatchAction::Invalidate(path), WatchAction::StartDebounce],
            ),
            (WatchState::Bundling | WatchState::BundlingDirty, WatchEvent::FileChanged(path)) => {
                (WatchState::BundlingDirty, vec![WatchAction::Invalidate(path)])
            }
            (WatchState::Debouncing, WatchEvent::DebounceElapsed) => {
                (WatchState::Bundling, vec![WatchAction::Rebundle])
            }
            // A stale timer firing outside the debounce window is ignored.
            (state, WatchEvent::DebounceElapsed) => (state, vec![]),
            (WatchState::Idle | WatchState::Debouncing, WatchEvent::ProgramCreated) => {
                (WatchState::Bundling, vec![WatchAction::Rebundle])
            }
            (state, WatchEvent::ProgramCreated) => (state, vec![]),
            (WatchState::Bundling, WatchEvent::PassDone) => (WatchState::Idle, vec![]),
            (WatchState::BundlingDirty, WatchEvent::PassDone) => {
                (WatchState::Bundling, vec![WatchAction::Rebundle])
            }
            (state, WatchEvent::PassDone) => (state, vec![]),
        };
        self.state = next;
        actions
    }
}

/// Notifications emitted while watching.
#[derive(Debug, Clone)]
pub enum WatchNotification {
    /// A bundling pass is starting.
    CompilationStarting,
    /// A bundling pass finished, successfully or not.
    CompilationFinished,
    /// A pass produced a bundle that differs from the previous one.
    BundleUpdated(Bundle),
    /// A front-end diagnostic was reported during a pass.
    Diagnostic(Diagnostic),
}

/// Incremental recompilation atop a [`Bundler`].
///
/// The session keeps the last successfully emitted bundle and suppresses
/// no-op updates; failures are logged and leave the previous bundle intact.
pub struct WatchSession<'a> {
    sys: &'a dyn System,
    bundler: Bundler<'a>,
    controller: WatchController,
    previous: Option<Bundle>,
    watched: BTreeSet<String>,
}

impl<'a> WatchSession<'a> {
    /// Create a session over the given system and options.
    pub fn new(sys: &'a dyn System, options: Options) -> Self {
        WatchSession {
            sys,
            bundler: Bundler::new(sys, options),
            controller: WatchController::new(),
            previous: None,
            watched: BTreeSet::new(),
        }
    }

    /// The controller's current state.
    pub fn state(&self) -> WatchState {
        self.controller.state()
    }

    /// The last successfully emitted bundle.
    pub fn previous_bundle(&self) -> Option<&Bundle> {
        self.previous.as_ref()
    }

    /// Run the initial bundling pass.
    pub fn start(&mut self, sink: &mut dyn FnMut(WatchNotification)) {
        self.dispatch(WatchEvent::ProgramCreated, sink);
    }

    /// Cancel the session, releasing watches.
    pub fn cancel(&mut self, sink: &mut dyn FnMut(WatchNotification)) {
        self.dispatch(WatchEvent::Cancel, sink);
    }

    /// Feed one event through the controller and execute its actions.
    ///
    /// Returns true when the debounce timer was started or reset.
    pub fn dispatch(
        &mut self,
        event: WatchEvent,
        sink: &mut dyn FnMut(WatchNotification),
    ) -> bool {
        let mut debounce_started = false;
        let mut pending = self.controller.on_event(event);
        while !pending.is_empty() {
            let mut follow_ups = Vec::new();
            for action in pending {
                match action {
                    WatchAction::Invalidate(path) => self.bundler.invalidate(&path),
                    WatchAction::StartDebounce => debounce_started = true,
                    WatchAction::Rebundle => {
                        self.rebundle(sink);
                        follow_ups.extend(self.controller.on_event(WatchEvent::PassDone));
                    }
                    WatchAction::StopWatching => self.clear_watches(),
                }
            }
            pending = follow_ups;
        }
        debounce_started
    }

    /// Drain all pending events without blocking, then run any due pass.
    ///
    /// Used by embedded hosts and tests, where events are injected rather
    /// than delivered by a real file watcher.
    pub fn pump(&mut self, sink: &mut dyn FnMut(WatchNotification)) {
        while let Some(event) = self.sys.next_event(Duration::ZERO) {
            self.handle_fs_event(event, sink);
        }
        if self.controller.state() == WatchState::Debouncing {
            self.dispatch(WatchEvent::DebounceElapsed, sink);
        }
    }

    /// Block on filesystem events until cancelled.
    pub fn run(
        &mut self,
        sink: &mut dyn FnMut(WatchNotification),
    ) -> Result<(), CompilerError> {
        self.start(sink);
        let mut deadline: Option<Instant> = None;
        loop {
            match self.controller.state() {
                WatchState::Cancelled => return Ok(()),
                WatchState::Debouncing => {
                    let due = deadline.unwrap_or_else(|| Instant::now() + DEBOUNCE);
                    let remaining = due.saturating_duration_since(Instant::now());
                    match self.sys.next_event(remaining) {
                        Some(event) => {
                            if self.handle_fs_event(event, sink) {
                                deadline = Some(Instant::now() + DEBOUNCE);
                            }
                        }
                        None => {
                            deadline = None;
                            self.dispatch(WatchEvent::DebounceElapsed, sink);
                        }
                    }
                }
                _ => {
                    if let Some(event) = self.sys.next_event(IDLE_POLL) {
                        if self.handle_fs_event(event, sink) {
                            deadline = Some(Instant::now() + DEBOUNCE);
                        }
                    }
                }
            }
        }
    }

    fn handle_fs_event(
        &mut self,
        event: FsEvent,
        sink: &mut dyn FnMut(WatchNotification),
    ) -> bool {
        let path = paths::to_posix(event.path());
        if !self.watched.contains(&path) {
            return false;
        }
        self.dispatch(WatchEvent::FileChanged(path), sink)
    }

    fn rebundle(&mut self, sink: &mut dyn FnMut(WatchNotification)) {
        sink(WatchNotification::CompilationStarting);
        let result = self
            .bundler
            .bundle(&mut |diagnostic| sink(WatchNotification::Diagnostic(diagnostic)));
        match result {
            Ok(bundle) => {
                if self.previous.as_ref() != Some(&bundle) {
                    sink(WatchNotification::BundleUpdated(bundle.clone()));
                    self.previous = Some(bundle);
                }
            }
            Err(error) => {
                log::error!("bundling failed: {}", error);
            }
        }
        sink(WatchNotification::CompilationFinished);
        self.update_watches();
    }

    fn update_watches(&mut self) {
        let mut desired: BTreeSet<String> =
            self.bundler.external_files().into_iter().collect();
        desired.extend(self.bundler.project_files());

        let stale: Vec<String> = self.watched.difference(&desired).cloned().collect();
        for path in stale {
            if let Err(error) = self.sys.unwatch(&paths::from_posix(&path)) {
                log::warn!("unable to unwatch {}: {}", path, error);
            }
        }
        let fresh: Vec<String> = desired.difference(&self.watched).cloned().collect();
        for path in fresh {
            if let Err(error) = self.sys.watch(&paths::from_posix(&path)) {
                log::warn!("unable to watch {}: {}", path, error);
            }
        }
        self.watched = desired;
    }

    fn clear_watches(&mut self) {
        for path in std::mem::take(&mut self.watched) {
            if let Err(error) = self.sys.unwatch(&paths::from_posix(&path)) {
                log::warn!("unable to unwatch {}: {}", path, error);
            }
        }
    }
}
