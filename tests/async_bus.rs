//! Consuming pipeline messages from async code and sync handlers.

use futures::StreamExt;
use sluice::elements::{FakeSink, FakeSrc, Queue};
use sluice::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn build(name: &str, buffers: u64) -> (Pipeline, Arc<sluice::elements::FakeSinkStats>) {
    let pipeline = Pipeline::new(name);
    let src = FakeSrc::new().with_num_buffers(buffers).with_size(8).build("src");
    let queue = Queue::new().build("queue");
    let sink = FakeSink::new();
    let stats = sink.stats();
    let sink = sink.build("sink");
    pipeline.add_many(&[&src, &queue, &sink]).unwrap();
    Element::link_many(&[&src, &queue, &sink]).unwrap();
    (pipeline, stats)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_async_until_eos() {
    let (pipeline, stats) = build("async-run", 20);
    tokio::time::timeout(Duration::from_secs(10), pipeline.run_async())
        .await
        .expect("pipeline did not finish")
        .unwrap();
    assert_eq!(stats.buffers(), 20);
    assert_eq!(pipeline.current_state(), State::Null);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stream_sees_pipeline_transitions() {
    let (pipeline, _stats) = build("async-stream", 4);
    let name = pipeline.name().to_string();
    let transitions = pipeline
        .bus()
        .stream()
        .filter_map(move |msg| {
            let own = msg.src() == Some(name.as_str());
            async move {
                match msg.kind() {
                    MessageKind::StateChanged { old, new, .. } if own => Some((*old, *new)),
                    _ => None,
                }
            }
        })
        .take(3)
        .collect::<Vec<_>>();

    pipeline.set_state(State::Playing).unwrap();
    let transitions = tokio::time::timeout(Duration::from_secs(10), transitions)
        .await
        .expect("missing transitions");
    assert_eq!(
        transitions,
        [
            (State::Null, State::Ready),
            (State::Ready, State::Paused),
            (State::Paused, State::Playing),
        ]
    );

    let eos = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.bus().pop_async(MessageType::Eos.into()),
    )
    .await
    .expect("no EOS");
    assert_eq!(eos.src(), Some("async-stream"));
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_sync_handler_filters_in_posting_thread() {
    let (pipeline, _stats) = build("sync", 4);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    pipeline.bus().set_sync_handler(move |_, msg| {
        counter.fetch_add(1, Ordering::SeqCst);
        match msg.message_type() {
            MessageType::StateChanged => BusSyncReply::Drop,
            _ => BusSyncReply::Pass,
        }
    });

    pipeline.run(Some(Duration::from_secs(10))).unwrap();

    let bus = pipeline.bus();
    assert!(seen.load(Ordering::SeqCst) > 0);
    assert!(!bus.have_pending(MessageType::StateChanged.into()));
    bus.unset_sync_handler();
}
