//! Bin state walks: ordering, asynchronous children, locked children and
//! failures.

use sluice::element::{StateChangeError, StateChangeResult};
use sluice::elements::{FakeSink, FakeSrc};
use sluice::prelude::*;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

fn poll_state(element: &Element, state: State) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while element.current_state() != state {
        assert!(Instant::now() < deadline, "{} never reached {state}", element.name());
        thread::sleep(Duration::from_millis(5));
    }
}

/// Finishes READY to PAUSED from another thread after a delay.
struct Prerolling {
    delay: Duration,
}

impl ElementImpl for Prerolling {
    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        if transition == StateChange::ReadyToPaused {
            let element = element.clone();
            let delay = self.delay;
            thread::spawn(move || {
                thread::sleep(delay);
                let _ = element.continue_state(Ok(StateChangeSuccess::Success));
            });
            return Ok(StateChangeSuccess::Async);
        }
        Ok(StateChangeSuccess::Success)
    }
}

/// Refuses one transition and records all it was asked for.
struct Refusing {
    refuse: StateChange,
    seen: Arc<Mutex<Vec<StateChange>>>,
}

impl ElementImpl for Refusing {
    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        self.seen.lock().unwrap().push(transition);
        if transition == self.refuse {
            return Err(StateChangeError {
                element: element.name().to_string(),
                transition,
            });
        }
        Ok(StateChangeSuccess::Success)
    }
}

fn simple_pipeline(name: &str) -> (Pipeline, Element, Element) {
    let pipeline = Pipeline::new(name);
    let src = FakeSrc::new().build("src");
    let sink = FakeSink::new().build("sink");
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();
    (pipeline, src, sink)
}

#[test]
fn test_steps_are_posted_in_order() {
    let (pipeline, src, sink) = simple_pipeline("steps");
    let bus = pipeline.bus();
    pipeline.set_state(State::Paused).unwrap();

    let mut own = Vec::new();
    while let Some(msg) = bus.pop_filtered(MessageType::StateChanged.into()) {
        if let MessageKind::StateChanged { old, new, pending } = msg.kind() {
            if msg.src() == Some("steps") {
                own.push((*old, *new, *pending));
            }
        }
    }
    assert_eq!(
        own,
        [
            (State::Null, State::Ready, Some(State::Paused)),
            (State::Ready, State::Paused, None),
        ]
    );
    assert_eq!(src.current_state(), State::Paused);
    assert_eq!(sink.current_state(), State::Paused);

    pipeline.set_state(State::Null).unwrap();
    assert_eq!(src.current_state(), State::Null);
    assert_eq!(sink.current_state(), State::Null);
}

#[test]
fn test_async_child_completes_bin() {
    let pipeline = Pipeline::new("prerolling");
    let slow = Element::new(
        "slow",
        Prerolling {
            delay: Duration::from_millis(50),
        },
    );
    pipeline.add(&slow).unwrap();
    let bus = pipeline.bus();

    assert_eq!(pipeline.set_state(State::Playing), Ok(StateChangeSuccess::Async));
    assert_eq!(pipeline.pending_state(), Some(State::Playing));
    assert!(bus.have_pending(MessageType::AsyncStart.into()));

    let done = bus
        .timed_pop_filtered(TIMEOUT, MessageType::AsyncDone.into())
        .expect("no async-done");
    assert_eq!(done.src(), Some("prerolling"));

    poll_state(&pipeline, State::Playing);
    poll_state(&slow, State::Playing);
    let (result, current, pending) = pipeline.get_state(TIMEOUT);
    assert_eq!(result, Ok(StateChangeSuccess::Success));
    assert_eq!(current, State::Playing);
    assert_eq!(pending, None);

    pipeline.set_state(State::Null).unwrap();
    assert_eq!(slow.current_state(), State::Null);
}

#[test]
fn test_locked_child_is_skipped() {
    let (pipeline, _src, sink) = simple_pipeline("locked");
    let spare = FakeSink::new().build("spare");
    pipeline.add(&spare).unwrap();
    assert!(!spare.set_locked_state(true));

    pipeline.set_state(State::Paused).unwrap();
    assert_eq!(sink.current_state(), State::Paused);
    assert_eq!(spare.current_state(), State::Null);

    // Direct changes are ignored too.
    assert_eq!(spare.set_state(State::Ready), Ok(StateChangeSuccess::NoChange));
    assert_eq!(spare.current_state(), State::Null);

    pipeline.set_state(State::Null).unwrap();
    spare.set_locked_state(false);
    pipeline.set_state(State::Ready).unwrap();
    assert_eq!(spare.current_state(), State::Ready);
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_failing_child_stops_walk() {
    let (pipeline, _src, _sink) = simple_pipeline("failing");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let refusing = Element::new(
        "refusing",
        Refusing {
            refuse: StateChange::PausedToPlaying,
            seen: Arc::clone(&seen),
        },
    );
    pipeline.add(&refusing).unwrap();

    let err = pipeline.set_state(State::Playing).unwrap_err();
    assert_eq!(err.element, "failing");
    assert_eq!(err.transition, StateChange::PausedToPlaying);
    assert_eq!(pipeline.current_state(), State::Paused);
    assert_eq!(refusing.current_state(), State::Paused);
    assert_eq!(
        *seen.lock().unwrap(),
        [
            StateChange::NullToReady,
            StateChange::ReadyToPaused,
            StateChange::PausedToPlaying,
        ]
    );

    pipeline.set_state(State::Null).unwrap();
    assert_eq!(refusing.current_state(), State::Null);
}

#[test]
fn test_setting_current_state_is_no_change() {
    let (pipeline, _src, _sink) = simple_pipeline("same");
    pipeline.set_state(State::Ready).unwrap();
    assert_eq!(pipeline.set_state(State::Ready), Ok(StateChangeSuccess::NoChange));
    pipeline.set_state(State::Null).unwrap();
}
