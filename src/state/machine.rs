//! Pure transition table and its owner.

use std::fmt::Debug;

use super::{ConnectionKind, Disconnected, Event, State};

/// Callback invoked for every event the current state does not declare.
pub type UnhandledHook = Box<dyn Fn(&State, &Event) + Send + Sync>;

/// Declared next state for `(state, event)`, `None` when the pair is not declared.
fn next(state: &State, event: &Event) -> Option<State> {
    use ConnectionKind::*;
    use Disconnected as D;
    use State as S;

    // states that still own (or are about to own) a connection attempt
    let live = matches!(
        state,
        S::RestartConnection
            | S::Connecting(..)
            | S::Connected(_)
            | S::Disconnected(D::NetworkDisconnected)
            | S::Disconnected(D::WebSocketEventLost)
            | S::Disconnected(D::Temporarily(_))
    );

    let next = match (state, event) {
        // user disconnect, permanent failure and background never resurrect automatically
        (
            S::Disconnected(D::ByRequest | D::Permanently(_) | D::Stopped),
            Event::Connect(_, AutomaticReconnect),
        ) => state.clone(),
        (S::Connected(_), Event::Connect(..)) => return None,
        (_, Event::Connect(config, kind)) => S::Connecting(config.clone(), *kind),

        (_, Event::ConnectionEstablished(info)) if live => S::Connected(info.clone()),

        (
            S::RestartConnection
            | S::Connecting(..)
            | S::Connected(_)
            | S::Disconnected(D::Temporarily(_)),
            Event::WebSocketEventLost,
        ) => S::Disconnected(D::WebSocketEventLost),

        (
            S::RestartConnection
            | S::Connecting(..)
            | S::Connected(_)
            | S::Disconnected(D::WebSocketEventLost | D::Temporarily(_)),
            Event::NetworkNotAvailable,
        ) => S::Disconnected(D::NetworkDisconnected),

        (S::Disconnected(D::NetworkDisconnected), Event::NetworkAvailable) => S::RestartConnection,

        (_, Event::UnrecoverableError(err)) if live => S::Disconnected(D::Permanently(err.clone())),
        (_, Event::NetworkError(err)) if live => S::Disconnected(D::Temporarily(err.clone())),
        (_, Event::RequiredDisconnection) => S::Disconnected(D::ByRequest),
        (_, Event::Stop) if live => S::Disconnected(D::Stopped),

        (S::Disconnected(D::Stopped), Event::Resume) => S::RestartConnection,

        // not declared for this state
        _ => return None,
    };

    Some(next)
}

/// Compute the next state. Undeclared pairs keep the current state.
pub fn transition(state: &State, event: &Event) -> State {
    next(state, event).unwrap_or_else(|| {
        log::error!(
            "Cannot handle event {} while being in inappropriate state {}",
            event.name(),
            state
        );
        state.clone()
    })
}

/// Sole owner of the current [`State`].
pub struct StateMachine {
    state: State,
    on_unhandled: Option<UnhandledHook>,
}

impl Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.state)
            .field("on_unhandled", &self.on_unhandled.is_some())
            .finish()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new(State::default())
    }
}

impl StateMachine {
    /// Create a machine in the given state.
    pub fn new(initial: State) -> Self {
        Self {
            state: initial,
            on_unhandled: None,
        }
    }

    /// Register a diagnostic hook for undeclared `(state, event)` pairs.
    pub fn set_unhandled_hook(&mut self, hook: UnhandledHook) {
        self.on_unhandled.replace(hook);
    }

    /// Current state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Feed one event.
    ///
    /// Returns the new state only when it differs from the previous one,
    /// so consumers never observe the same state twice in a row.
    pub fn handle(&mut self, event: &Event) -> Option<&State> {
        match next(&self.state, event) {
            None => {
                log::error!(
                    "Cannot handle event {} while being in inappropriate state {}",
                    event.name(),
                    self.state
                );
                if let Some(ref hook) = self.on_unhandled {
                    hook(&self.state, event);
                }
                None
            }
            Some(state) if state == self.state => {
                log::trace!("Event {} keeps state {}", event.name(), self.state);
                None
            }
            Some(state) => {
                log::debug!("{} --{}--> {}", self.state, event.name(), state);
                self.state = state;
                Some(&self.state)
            }
        }
    }
}
