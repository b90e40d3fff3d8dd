//! Pipelines whose streaming tasks share one cooperative worker.

use sluice::elements::{FakeSink, FakeSrc, Queue};
use sluice::prelude::*;
use sluice::scheduler::Scheduler;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

type Log = Arc<Mutex<Vec<(&'static str, ThreadId)>>>;

fn cooperative(name: &str) -> Pipeline {
    Pipeline::with_config(
        PipelineConfig::default()
            .with_name(name)
            .with_scheduling(SchedulingMode::Cooperative),
    )
}

fn logging_sink(branch: &'static str, log: &Log) -> FakeSink {
    let log = Arc::clone(log);
    FakeSink::new().on_handoff(move |_| {
        log.lock().unwrap().push((branch, thread::current().id()));
    })
}

fn worker_of(pipeline: &Pipeline) -> Option<ThreadId> {
    match pipeline.scheduler() {
        Scheduler::Cooperative(coop) => coop.worker_thread(),
        Scheduler::Threaded => None,
    }
}

#[test]
fn test_branches_share_worker_thread() {
    let pipeline = cooperative("coop");
    let log: Log = Arc::default();

    let a_src = FakeSrc::new().with_num_buffers(20).with_size(4).build("a_src");
    let a_sink = logging_sink("a", &log);
    let a_stats = a_sink.stats();
    let a_sink = a_sink.build("a_sink");
    let b_src = FakeSrc::new().with_num_buffers(30).with_size(4).build("b_src");
    let b_sink = logging_sink("b", &log);
    let b_stats = b_sink.stats();
    let b_sink = b_sink.build("b_sink");

    pipeline.add_many(&[&a_src, &a_sink, &b_src, &b_sink]).unwrap();
    a_src.link(&a_sink).unwrap();
    b_src.link(&b_sink).unwrap();

    let bus = pipeline.bus();
    pipeline.set_state(State::Playing).unwrap();
    let eos = bus
        .timed_pop_filtered(TIMEOUT, MessageType::Eos.into())
        .expect("no EOS");
    assert_eq!(eos.src(), Some("coop"));
    assert_eq!(a_stats.buffers(), 20);
    assert_eq!(b_stats.buffers(), 30);
    assert_eq!(a_stats.eos_count(), 1);
    assert_eq!(b_stats.eos_count(), 1);

    let worker = worker_of(&pipeline).expect("worker never started");
    assert_ne!(worker, thread::current().id());
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 50);
    assert!(log.iter().all(|(_, id)| *id == worker));
    drop(log);

    pipeline.set_state(State::Null).unwrap();
    match pipeline.scheduler() {
        Scheduler::Cooperative(coop) => assert_eq!(coop.task_count(), 0),
        Scheduler::Threaded => unreachable!(),
    }
}

#[test]
fn test_queue_keeps_its_own_thread() {
    let pipeline = cooperative("coop-queue");
    let log: Log = Arc::default();

    let src = FakeSrc::new().with_num_buffers(10).build("src");
    let queue = Queue::new().with_max_buffers(2).build("queue");
    let sink = logging_sink("out", &log);
    let stats = sink.stats();
    let sink = sink.build("sink");
    pipeline.add_many(&[&src, &queue, &sink]).unwrap();
    Element::link_many(&[&src, &queue, &sink]).unwrap();

    pipeline.set_state(State::Playing).unwrap();
    pipeline
        .bus()
        .timed_pop_filtered(TIMEOUT, MessageType::Eos.into())
        .expect("no EOS");
    assert_eq!(stats.buffers(), 10);

    let worker = worker_of(&pipeline).expect("worker never started");
    let log = log.lock().unwrap();
    let sink_thread = log[0].1;
    assert_ne!(sink_thread, worker);
    assert!(log.iter().all(|(_, id)| *id == sink_thread));
    drop(log);

    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_cooperative_restart_after_ready() {
    let pipeline = cooperative("coop-restart");
    let src = FakeSrc::new().with_num_buffers(5).build("src");
    let sink = FakeSink::new();
    let stats = sink.stats();
    let sink = sink.build("sink");
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();

    pipeline.run(TIMEOUT).unwrap();
    pipeline.run(TIMEOUT).unwrap();
    assert_eq!(stats.buffers(), 10);
    assert_eq!(stats.eos_count(), 2);
}
