//! Sinks driving seekable sources in pull mode.

use sluice::element::{BaseSrc, BaseSrcConfig, PadMode, Source};
use sluice::elements::{FakeSink, FileSrc, MemorySrc};
use sluice::prelude::*;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

fn poll_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Shared between a [`Stalling`] source and the test driving it.
#[derive(Default)]
struct Stall {
    unlocked: Mutex<bool>,
    cond: Condvar,
    waiting: AtomicUsize,
}

impl Stall {
    fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

/// Seekable source that serves `data` and then blocks every read past it
/// until unlocked, the way a network or device source stalls.
struct Stalling {
    data: Vec<u8>,
    stall: Arc<Stall>,
}

impl Source for Stalling {
    fn is_seekable(&self) -> bool {
        true
    }

    fn size(&self) -> Option<u64> {
        Some(1 << 20)
    }

    fn create(&self, offset: u64, len: usize) -> FlowResult<Buffer> {
        let start = usize::try_from(offset).map_err(|_| FlowError::Eos)?;
        if start < self.data.len() {
            let end = start.saturating_add(len).min(self.data.len());
            return Ok(Buffer::new(
                self.data[start..end].to_vec(),
                Metadata::new().with_byte_range(offset, end - start),
            ));
        }
        let mut unlocked = self.stall.unlocked.lock().unwrap();
        self.stall.waiting.fetch_add(1, Ordering::SeqCst);
        while !*unlocked {
            unlocked = self.stall.cond.wait(unlocked).unwrap();
        }
        self.stall.waiting.fetch_sub(1, Ordering::SeqCst);
        Err(FlowError::Flushing)
    }

    fn unlock(&self) {
        *self.stall.unlocked.lock().unwrap() = true;
        self.stall.cond.notify_all();
    }

    fn unlock_stop(&self) {
        *self.stall.unlocked.lock().unwrap() = false;
    }
}

fn stalling_src(name: &str, data: &[u8]) -> (Element, Arc<Stall>) {
    let stall = Arc::new(Stall::default());
    let source = Stalling {
        data: data.to_vec(),
        stall: Arc::clone(&stall),
    };
    (BaseSrc::new_element(name, source, BaseSrcConfig::default()), stall)
}

/// A standalone sink pad pulling from `src`, both active in pull mode.
fn pulling_from(src: &Element) -> Pad {
    let srcpad = src.static_pad("src").unwrap();
    let sinkpad = Pad::builder(PadTemplate::sink(Caps::any())).name("reader").build();
    srcpad.link(&sinkpad).unwrap();
    src.set_state(State::Paused).unwrap();
    assert!(sinkpad.activate_mode(PadMode::Pull, true));
    sinkpad
}

fn digits_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"0123456789").unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_sink_pulls_memory_in_blocks() {
    let pipeline = Pipeline::new("pull");
    let src = MemorySrc::new(vec![7u8; 100]).build("mem");
    let sink = FakeSink::new().with_prefer_pull(true).with_blocksize(16);
    let stats = sink.stats();
    let sink = sink.build("sink");
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();

    pipeline.run(TIMEOUT).unwrap();

    assert_eq!(sink.static_pad("sink").unwrap().mode(), PadMode::None);
    assert_eq!(stats.buffers(), 7);
    assert_eq!(stats.bytes(), 100);
    assert_eq!(stats.eos_count(), 1);
}

#[test]
fn test_sink_pulls_file() {
    let file = digits_file();
    let pipeline = Pipeline::new("pull-file");
    let src = FileSrc::new(file.path()).build("file");
    let sink = FakeSink::new().with_prefer_pull(true).with_blocksize(3);
    let stats = sink.stats();
    let sink = sink.build("sink");
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();

    pipeline.set_state(State::Paused).unwrap();
    assert_eq!(sink.static_pad("sink").unwrap().mode(), PadMode::Pull);
    assert_eq!(src.static_pad("src").unwrap().mode(), PadMode::Pull);

    pipeline.set_state(State::Playing).unwrap();
    let bus = pipeline.bus();
    bus.timed_pop_filtered(TIMEOUT, MessageTypeMask::of(MessageType::Eos))
        .expect("no EOS");
    assert_eq!(stats.buffers(), 4);
    assert_eq!(stats.bytes(), 10);
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_get_range_rules() {
    let file = digits_file();
    let src = FileSrc::new(file.path()).build("file");
    let srcpad = src.static_pad("src").unwrap();
    let sinkpad = Pad::builder(PadTemplate::sink(Caps::any())).name("reader").build();
    srcpad.link(&sinkpad).unwrap();

    // Inactive pads are flushing.
    assert_eq!(sinkpad.pull_range(0, 4).unwrap_err(), FlowError::Flushing);

    src.set_state(State::Paused).unwrap();
    assert!(sinkpad.activate_mode(PadMode::Pull, true));
    assert_eq!(srcpad.mode(), PadMode::Pull);

    let head = sinkpad.pull_range(0, 4).unwrap();
    assert_eq!(head.as_bytes(), b"0123");
    assert_eq!(head.offset(), Some(0));

    let tail = sinkpad.pull_range(8, 4).unwrap();
    assert_eq!(tail.as_bytes(), b"89");
    assert_eq!(tail.offset(), Some(8));

    let empty = sinkpad.pull_range(3, 0).unwrap();
    assert!(empty.is_empty());

    assert_eq!(sinkpad.pull_range(10, 4).unwrap_err(), FlowError::Eos);
    assert_eq!(sinkpad.pull_range(1000, 1).unwrap_err(), FlowError::Eos);

    // Going backwards reads the right bytes again.
    assert_eq!(sinkpad.pull_range(2, 3).unwrap().as_bytes(), b"234");

    assert!(sinkpad.activate_mode(PadMode::Pull, false));
    assert_eq!(srcpad.mode(), PadMode::None);
    assert_eq!(sinkpad.pull_range(0, 1).unwrap_err(), FlowError::Flushing);
    src.set_state(State::Null).unwrap();
}

#[test]
fn test_pull_seek_restarts_loop() {
    let pipeline = Pipeline::new("pull-seek");
    let src = MemorySrc::new((0..100u8).collect::<Vec<_>>()).build("mem");
    let sink = FakeSink::new().with_prefer_pull(true).with_blocksize(32);
    let stats = sink.stats();
    let sink = sink.build("sink");
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();

    pipeline.set_state(State::Playing).unwrap();
    poll_until(|| stats.eos_count() == 1);
    assert_eq!(stats.bytes(), 100);

    assert!(pipeline.send_event(Event::seek(SeekEvent::new_bytes(90))));
    poll_until(|| stats.eos_count() == 2);
    assert_eq!(stats.bytes(), 110);
    assert_eq!(stats.buffers(), 5);

    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_unseekable_source_falls_back_to_push() {
    use sluice::elements::AppSrc;

    let pipeline = Pipeline::new("fallback");
    let appsrc = AppSrc::new();
    let handle = appsrc.handle();
    let appsrc = appsrc.build("app");
    let sink = FakeSink::new().with_prefer_pull(true);
    let stats = sink.stats();
    let sink = sink.build("sink");
    pipeline.add_many(&[&appsrc, &sink]).unwrap();
    appsrc.link(&sink).unwrap();

    pipeline.set_state(State::Paused).unwrap();
    assert_eq!(sink.static_pad("sink").unwrap().mode(), PadMode::Push);

    handle.push_buffer(Buffer::from_slice(b"abc")).unwrap();
    handle.end_of_stream();
    pipeline.set_state(State::Playing).unwrap();
    pipeline
        .bus()
        .timed_pop_filtered(TIMEOUT, MessageTypeMask::of(MessageType::Eos))
        .expect("no EOS");
    assert_eq!(stats.bytes(), 3);
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_repeated_range_is_identical() {
    let (src, _stall) = stalling_src("stall", b"abcdefgh");
    let sinkpad = pulling_from(&src);

    let first = sinkpad.pull_range(2, 4).unwrap();
    let second = sinkpad.pull_range(2, 4).unwrap();
    assert_eq!(first.as_bytes(), b"cdef");
    assert_eq!(first.as_bytes(), second.as_bytes());
    assert_eq!(first.offset(), Some(2));
    assert_eq!(second.offset(), Some(2));

    // A short read at the edge of the served data repeats as well.
    let edge = sinkpad.pull_range(6, 4).unwrap();
    assert_eq!(edge.as_bytes(), b"gh");
    assert_eq!(sinkpad.pull_range(6, 4).unwrap().as_bytes(), edge.as_bytes());

    assert!(sinkpad.activate_mode(PadMode::Pull, false));
    src.set_state(State::Null).unwrap();
}

#[test]
fn test_flush_interrupts_blocked_pull() {
    let (src, stall) = stalling_src("stall", b"abcdefgh");
    let sinkpad = pulling_from(&src);

    let (tx, rx) = mpsc::channel();
    let reader = sinkpad.clone();
    let handle = thread::spawn(move || {
        let _ = tx.send(reader.pull_range(8, 4));
    });
    poll_until(|| stall.waiting() == 1);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    sinkpad.push_event(Event::flush_start());
    let result = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("pull still blocked after flush-start");
    assert_eq!(result.unwrap_err(), FlowError::Flushing);
    handle.join().unwrap();
    assert_eq!(stall.waiting(), 0);

    // Flushing refuses new pulls until flush-stop.
    assert_eq!(sinkpad.pull_range(0, 2).unwrap_err(), FlowError::Flushing);
    sinkpad.push_event(Event::flush_stop(true));
    assert_eq!(sinkpad.pull_range(0, 2).unwrap().as_bytes(), b"ab");

    assert!(sinkpad.activate_mode(PadMode::Pull, false));
    src.set_state(State::Null).unwrap();
}

#[test]
fn test_teardown_while_pull_blocked_upstream() {
    let pipeline = Pipeline::new("pull-stall");
    let (src, stall) = stalling_src("stall", b"abcdefgh");
    let sink = FakeSink::new().with_prefer_pull(true).with_blocksize(4);
    let stats = sink.stats();
    let sink = sink.build("sink");
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();

    pipeline.set_state(State::Playing).unwrap();
    assert_eq!(sink.static_pad("sink").unwrap().mode(), PadMode::Pull);
    poll_until(|| stall.waiting() == 1);
    assert_eq!(stats.bytes(), 8);

    let (tx, rx) = mpsc::channel();
    let stopping = pipeline.clone();
    let handle = thread::spawn(move || {
        let _ = tx.send(stopping.set_state(State::Null));
    });
    let result = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("teardown blocked behind the pending pull");
    assert!(result.is_ok());
    handle.join().unwrap();

    assert_eq!(stall.waiting(), 0);
    assert_eq!(sink.static_pad("sink").unwrap().mode(), PadMode::None);
    assert_eq!(src.static_pad("src").unwrap().mode(), PadMode::None);
    assert_eq!(stats.eos_count(), 0);
}
