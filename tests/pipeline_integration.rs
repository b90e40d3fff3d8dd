//! End-to-end push pipelines.

use sluice::caps::parse_caps;
use sluice::element::PadLinkError;
use sluice::elements::{AppSrc, FakeSink, FakeSrc, FileSrc, Identity, Queue, StreamItem};
use sluice::event::EventType;
use sluice::prelude::*;
use std::thread;
use std::time::Duration;

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

fn wait_for(bus: &Bus, ty: MessageType) -> Message {
    bus.timed_pop_filtered(TIMEOUT, MessageTypeMask::of(ty))
        .unwrap_or_else(|| panic!("no {ty:?} message"))
}

#[test]
fn test_three_element_chain_posts_one_eos() {
    let pipeline = Pipeline::new("chain");
    let src = FakeSrc::new().with_num_buffers(8).with_size(32).build("src");
    let identity = Identity::new();
    let id_stats = identity.stats();
    let identity = identity.build("identity");
    let sink = FakeSink::new();
    let stats = sink.stats();
    let sink = sink.build("sink");

    pipeline.add_many(&[&src, &identity, &sink]).unwrap();
    Element::link_many(&[&src, &identity, &sink]).unwrap();

    let bus = pipeline.bus();
    pipeline.set_state(State::Playing).unwrap();
    let eos = wait_for(&bus, MessageType::Eos);
    assert_eq!(eos.src(), Some("chain"));

    assert_eq!(stats.buffers(), 8);
    assert_eq!(stats.bytes(), 8 * 32);
    assert_eq!(stats.eos_count(), 1);
    assert_eq!(id_stats.buffers(), 8);

    pipeline.set_state(State::Paused).unwrap();
    pipeline.set_state(State::Ready).unwrap();
    assert_eq!(stats.eos_count(), 1);
    assert!(!bus.have_pending(MessageTypeMask::of(MessageType::Eos)));

    pipeline.set_state(State::Null).unwrap();
    assert_eq!(sink.current_state(), State::Null);
}

#[test]
fn test_events_stay_ordered_with_buffers() {
    let pipeline = Pipeline::new("order");
    let src = FakeSrc::new().with_num_buffers(5).with_size(4).build("src");
    let identity = Identity::new().build("identity");
    let sink = FakeSink::new();
    let stats = sink.stats();
    let sink = sink.build("sink");
    pipeline.add_many(&[&src, &identity, &sink]).unwrap();
    Element::link_many(&[&src, &identity, &sink]).unwrap();

    pipeline.run(TIMEOUT).unwrap();

    let items = stats.items();
    let first_buffer = items
        .iter()
        .position(|item| matches!(item, StreamItem::Buffer { .. }))
        .unwrap();
    let position = |ty| items.iter().position(|item| *item == StreamItem::Event(ty));
    assert!(position(EventType::Caps).unwrap() < first_buffer);
    assert!(position(EventType::Segment).unwrap() < first_buffer);
    assert_eq!(items.last(), Some(&StreamItem::Event(EventType::Eos)));

    let sequences: Vec<u64> = items
        .iter()
        .filter_map(|item| match item {
            StreamItem::Buffer { sequence, .. } => Some(*sequence),
            StreamItem::Event(_) => None,
        })
        .collect();
    assert_eq!(sequences, [1, 2, 3, 4, 5]);
}

#[test]
fn test_identity_drops_and_stamps() {
    let pipeline = Pipeline::new("dropper");
    let src = FakeSrc::new().with_num_buffers(9).with_size(1).build("src");
    let identity = Identity::new()
        .with_drop_every(3)
        .with_stamp_sequence(true)
        .build("identity");
    let sink = FakeSink::new();
    let stats = sink.stats();
    let sink = sink.build("sink");
    pipeline.add_many(&[&src, &identity, &sink]).unwrap();
    Element::link_many(&[&src, &identity, &sink]).unwrap();

    pipeline.run(TIMEOUT).unwrap();

    let sequences: Vec<u64> = stats
        .items()
        .into_iter()
        .filter_map(|item| match item {
            StreamItem::Buffer { sequence, .. } => Some(sequence),
            StreamItem::Event(_) => None,
        })
        .collect();
    assert_eq!(sequences, [1, 2, 4, 5, 7, 8]);
    assert_eq!(stats.eos_count(), 1);
}

#[test]
fn test_queue_crosses_threads_in_order() {
    let pipeline = Pipeline::new("queued");
    let src = FakeSrc::new().with_num_buffers(50).with_size(16).build("src");
    let queue = Queue::new().with_max_buffers(4);
    let queue_stats = queue.stats();
    let queue = queue.build("queue");
    let sink = FakeSink::new();
    let stats = sink.stats();
    let sink = sink.build("sink");
    pipeline.add_many(&[&src, &queue, &sink]).unwrap();
    Element::link_many(&[&src, &queue, &sink]).unwrap();

    pipeline.run(TIMEOUT).unwrap();

    assert_eq!(stats.buffers(), 50);
    assert_eq!(stats.eos_count(), 1);
    assert_eq!(queue_stats.pushed(), 50);
    assert_eq!(queue_stats.popped(), 50);
    let sequences: Vec<u64> = stats
        .items()
        .into_iter()
        .filter_map(|item| match item {
            StreamItem::Buffer { sequence, .. } => Some(sequence),
            StreamItem::Event(_) => None,
        })
        .collect();
    assert_eq!(sequences, (1..=50).collect::<Vec<_>>());
}

#[test]
fn test_appsrc_feeds_pipeline() {
    let pipeline = Pipeline::new("app");
    let appsrc = AppSrc::new().with_max_buffers(2);
    let handle = appsrc.handle();
    let appsrc = appsrc.build("app");
    let sink = FakeSink::new();
    let stats = sink.stats();
    let sink = sink.build("sink");
    pipeline.add_many(&[&appsrc, &sink]).unwrap();
    appsrc.link(&sink).unwrap();

    let feeder = thread::spawn(move || {
        for i in 0..10u8 {
            handle.push_buffer(Buffer::from_vec(vec![i; 3])).unwrap();
        }
        handle.end_of_stream();
    });

    pipeline.run(TIMEOUT).unwrap();
    feeder.join().unwrap();
    assert_eq!(stats.buffers(), 10);
    assert_eq!(stats.bytes(), 30);
}

#[test]
fn test_blocked_create_released_by_shutdown() {
    let pipeline = Pipeline::new("idle");
    let appsrc = AppSrc::new().build("app");
    let sink = FakeSink::new().build("sink");
    pipeline.add_many(&[&appsrc, &sink]).unwrap();
    appsrc.link(&sink).unwrap();

    pipeline.set_state(State::Playing).unwrap();
    thread::sleep(Duration::from_millis(50));
    // The source task sits in create() waiting for data.
    pipeline.set_state(State::Null).unwrap();
    assert_eq!(appsrc.current_state(), State::Null);
}

#[test]
fn test_negotiation_picks_common_format() {
    let pipeline = Pipeline::new("negotiate");
    let src = FakeSrc::new()
        .with_num_buffers(3)
        .with_caps(parse_caps("audio/x-raw, rate=(int){44100, 48000}, channels=(int)[1, 8]").unwrap())
        .build("src");
    let sink = FakeSink::new()
        .with_caps(parse_caps("audio/x-raw, rate=(int)48000, channels=(int)2").unwrap())
        .build("sink");
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();

    let bus = pipeline.bus();
    pipeline.set_state(State::Playing).unwrap();
    wait_for(&bus, MessageType::Eos);

    let caps = sink.static_pad("sink").unwrap().current_caps().unwrap();
    assert!(caps.is_fixed());
    let structure = caps.structure(0).unwrap();
    assert_eq!(structure.get_int("rate"), Some(48000));
    assert_eq!(structure.get_int("channels"), Some(2));
    pipeline.set_state(State::Null).unwrap();
    assert!(sink.static_pad("sink").unwrap().current_caps().is_none());
}

#[test]
fn test_link_refused_without_common_format() {
    let src = FakeSrc::new()
        .with_caps(parse_caps("audio/x-raw, rate=(int)44100").unwrap())
        .build("src");
    let sink = FakeSink::new()
        .with_caps(parse_caps("audio/x-raw, rate=(int)48000").unwrap())
        .build("sink");
    let err = src.link(&sink).unwrap_err();
    assert!(matches!(err, Error::Link(PadLinkError::NoFormat)));
    assert!(!src.static_pad("src").unwrap().is_linked());
}

#[test]
fn test_missing_file_fails_state_change() {
    let pipeline = Pipeline::new("broken");
    let src = FileSrc::new("/i/do/not/exist").build("file");
    let sink = FakeSink::new().build("sink");
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();

    let bus = pipeline.bus();
    assert!(pipeline.set_state(State::Playing).is_err());
    let error = wait_for(&bus, MessageType::Error);
    assert_eq!(error.src(), Some("file"));
    match error.kind() {
        MessageKind::Error { description, debug } => {
            assert_eq!(description, "Could not start source");
            assert!(debug.is_some());
        }
        other => panic!("unexpected {other:?}"),
    }
    pipeline.set_state(State::Null).unwrap();
}
