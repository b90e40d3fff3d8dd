//! Element states and transitions.

use thiserror::Error;

/// Lifecycle state of an element.
///
/// States are ordered: `Null < Ready < Paused < Playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum State {
    /// Initial state, no resources held.
    #[default]
    Null,
    /// Resources allocated (devices opened), no data flowing.
    Ready,
    /// Pads active and data accepted, but sinks hold it back.
    Paused,
    /// Data flowing.
    Playing,
}

impl State {
    /// The adjacent state one step toward `target`, or `None` if already there.
    pub fn next_toward(self, target: State) -> Option<State> {
        use State::*;
        match self.cmp(&target) {
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Less => Some(match self {
                Null => Ready,
                Ready => Paused,
                Paused | Playing => Playing,
            }),
            std::cmp::Ordering::Greater => Some(match self {
                Playing => Paused,
                Paused => Ready,
                Ready | Null => Null,
            }),
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Null => "NULL",
            State::Ready => "READY",
            State::Paused => "PAUSED",
            State::Playing => "PLAYING",
        };
        f.write_str(name)
    }
}

/// A single step between adjacent states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChange {
    /// NULL to READY.
    NullToReady,
    /// READY to PAUSED.
    ReadyToPaused,
    /// PAUSED to PLAYING.
    PausedToPlaying,
    /// PLAYING to PAUSED.
    PlayingToPaused,
    /// PAUSED to READY.
    PausedToReady,
    /// READY to NULL.
    ReadyToNull,
}

impl StateChange {
    /// The transition between two adjacent states, or `None` if they are
    /// equal or not adjacent.
    pub fn new(from: State, to: State) -> Option<Self> {
        use State::*;
        Some(match (from, to) {
            (Null, Ready) => Self::NullToReady,
            (Ready, Paused) => Self::ReadyToPaused,
            (Paused, Playing) => Self::PausedToPlaying,
            (Playing, Paused) => Self::PlayingToPaused,
            (Paused, Ready) => Self::PausedToReady,
            (Ready, Null) => Self::ReadyToNull,
            _ => return None,
        })
    }

    /// State before the transition.
    pub fn current(self) -> State {
        match self {
            Self::NullToReady => State::Null,
            Self::ReadyToPaused | Self::ReadyToNull => State::Ready,
            Self::PausedToPlaying | Self::PausedToReady => State::Paused,
            Self::PlayingToPaused => State::Playing,
        }
    }

    /// State after the transition.
    pub fn next(self) -> State {
        match self {
            Self::ReadyToNull => State::Null,
            Self::NullToReady | Self::PausedToReady => State::Ready,
            Self::ReadyToPaused | Self::PlayingToPaused => State::Paused,
            Self::PausedToPlaying => State::Playing,
        }
    }

    /// True for transitions toward PLAYING.
    pub fn is_upward(self) -> bool {
        self.next() > self.current()
    }
}

/// Successful outcome of a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChangeSuccess {
    /// The transition completed.
    Success,
    /// The transition continues in the background and is committed later.
    Async,
    /// Completed, but the element cannot produce data in PAUSED (live source).
    NoPreroll,
    /// The element was already in the requested state or is locked.
    NoChange,
}

/// A state change was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{element} failed to change state ({transition:?})")]
pub struct StateChangeError {
    /// Name of the element that failed.
    pub element: String,
    /// The step that failed.
    pub transition: StateChange,
}

/// Outcome of a single transition or of a whole `set_state` call.
pub type StateChangeResult = Result<StateChangeSuccess, StateChangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_are_adjacent() {
        let mut state = State::Null;
        let mut seen = Vec::new();
        while let Some(next) = state.next_toward(State::Playing) {
            seen.push(StateChange::new(state, next).unwrap());
            state = next;
        }
        assert_eq!(
            seen,
            vec![
                StateChange::NullToReady,
                StateChange::ReadyToPaused,
                StateChange::PausedToPlaying
            ]
        );
    }

    #[test]
    fn test_non_adjacent_is_not_a_transition() {
        assert_eq!(StateChange::new(State::Null, State::Playing), None);
        assert_eq!(StateChange::new(State::Ready, State::Ready), None);
    }

    #[test]
    fn test_direction() {
        assert!(StateChange::ReadyToPaused.is_upward());
        assert!(!StateChange::PausedToReady.is_upward());
        assert_eq!(StateChange::PlayingToPaused.next(), State::Paused);
        assert_eq!(State::Ready.next_toward(State::Null), Some(State::Null));
    }
}
