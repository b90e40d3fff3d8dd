//! AppSrc element for injecting data from application code.
//!
//! Allows applications to push buffers into a pipeline programmatically.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{BaseSrc, BaseSrcConfig, Element, Source};
use crate::error::{Error, Result};
use crate::flow::{FlowError, FlowResult};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

/// Default capacity of the application queue.
pub const DEFAULT_MAX_BUFFERS: usize = 64;

/// A source element that allows applications to inject buffers into a
/// pipeline.
///
/// The streaming thread blocks in `create` until the application pushes a
/// buffer, signals end of stream, or a flush unlocks it.
///
/// # Example
///
/// ```rust
/// use sluice::buffer::Buffer;
/// use sluice::elements::AppSrc;
///
/// let app_src = AppSrc::new();
/// let handle = app_src.handle();
/// let element = app_src.build("feeder");
///
/// // In another thread or async task:
/// handle.push_buffer(Buffer::from_slice(b"hello")).unwrap();
///
/// // Signal end of stream when done:
/// handle.end_of_stream();
/// assert_eq!(handle.queue_len(), 1);
/// # drop(element);
/// ```
#[derive(Debug)]
pub struct AppSrc {
    caps: Caps,
    config: BaseSrcConfig,
    inner: Arc<AppSrcInner>,
}

#[derive(Debug)]
struct AppSrcInner {
    state: Mutex<AppSrcState>,
    data_available: Condvar,
    space_available: Condvar,
}

#[derive(Debug)]
struct AppSrcState {
    queue: VecDeque<Buffer>,
    max_buffers: usize,
    eos: bool,
    flushing: bool,
    total_pushed: u64,
    total_produced: u64,
}

impl AppSrcInner {
    fn state(&self) -> MutexGuard<'_, AppSrcState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle for pushing data into an [`AppSrc`].
///
/// This handle can be cloned and sent to other threads.
#[derive(Debug, Clone)]
pub struct AppSrcHandle {
    inner: Arc<AppSrcInner>,
}

impl AppSrc {
    /// Create a new AppSrc with default settings.
    pub fn new() -> Self {
        Self {
            caps: Caps::any(),
            config: BaseSrcConfig::default(),
            inner: Arc::new(AppSrcInner {
                state: Mutex::new(AppSrcState {
                    queue: VecDeque::with_capacity(DEFAULT_MAX_BUFFERS),
                    max_buffers: DEFAULT_MAX_BUFFERS,
                    eos: false,
                    flushing: false,
                    total_pushed: 0,
                    total_produced: 0,
                }),
                data_available: Condvar::new(),
                space_available: Condvar::new(),
            }),
        }
    }

    /// Bound the application queue. Pushing into a full queue blocks.
    pub fn with_max_buffers(self, max_buffers: usize) -> Self {
        self.inner.state().max_buffers = max_buffers.max(1);
        self
    }

    /// Formats offered on the source pad.
    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.caps = caps;
        self
    }

    /// Stamp buffers with the running time.
    pub fn with_do_timestamp(mut self, do_timestamp: bool) -> Self {
        self.config = self.config.with_do_timestamp(do_timestamp);
        self
    }

    /// Get a handle for pushing data.
    pub fn handle(&self) -> AppSrcHandle {
        AppSrcHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Get statistics.
    pub fn stats(&self) -> AppSrcStats {
        self.handle().stats()
    }

    /// Create the element.
    pub fn build(self, name: impl Into<String>) -> Element {
        let config = self.config.clone();
        BaseSrc::new_element(name, self, config)
    }
}

impl Default for AppSrc {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for AppSrc {
    fn caps(&self) -> Caps {
        self.caps.clone()
    }

    fn stop(&self) -> Result<()> {
        let mut state = self.inner.state();
        state.queue.clear();
        state.eos = false;
        self.inner.space_available.notify_all();
        Ok(())
    }

    fn create(&self, _offset: u64, _len: usize) -> FlowResult<Buffer> {
        let mut state = self.inner.state();

        while state.queue.is_empty() && !state.eos && !state.flushing {
            trace!("waiting for application data");
            state = self
                .inner
                .data_available
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }

        if state.flushing {
            return Err(FlowError::Flushing);
        }

        match state.queue.pop_front() {
            Some(buffer) => {
                state.total_produced += 1;
                self.inner.space_available.notify_one();
                Ok(buffer)
            }
            None => {
                debug!(produced = state.total_produced, "application ended the stream");
                Err(FlowError::Eos)
            }
        }
    }

    fn unlock(&self) {
        self.inner.state().flushing = true;
        self.inner.data_available.notify_all();
        self.inner.space_available.notify_all();
    }

    fn unlock_stop(&self) {
        self.inner.state().flushing = false;
    }
}

impl AppSrcHandle {
    /// Push a buffer into the source.
    ///
    /// This blocks while the internal queue is full.
    pub fn push_buffer(&self, buffer: Buffer) -> Result<()> {
        self.push_buffer_timeout(buffer, None)
    }

    /// Push a buffer, giving up after `timeout` if the queue stays full.
    pub fn push_buffer_timeout(&self, buffer: Buffer, timeout: Option<Duration>) -> Result<()> {
        let mut state = self.inner.state();

        if state.eos {
            return Err(Error::Element("appsrc is at EOS".into()));
        }

        while state.queue.len() >= state.max_buffers && !state.flushing {
            state = match timeout {
                Some(t) => {
                    let (s, result) = self
                        .inner
                        .space_available
                        .wait_timeout(state, t)
                        .unwrap_or_else(|e| e.into_inner());
                    if result.timed_out() {
                        return Err(Error::Element("appsrc push timeout".into()));
                    }
                    s
                }
                None => self
                    .inner
                    .space_available
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner()),
            };
        }

        if state.flushing {
            return Err(Error::Flow(FlowError::Flushing));
        }

        state.queue.push_back(buffer);
        state.total_pushed += 1;
        self.inner.data_available.notify_one();
        Ok(())
    }

    /// Signal end of stream.
    ///
    /// Buffers already queued are still delivered. After this, no more
    /// buffers can be pushed until the element is stopped.
    pub fn end_of_stream(&self) {
        self.inner.state().eos = true;
        self.inner.data_available.notify_all();
    }

    /// Get the current queue length.
    pub fn queue_len(&self) -> usize {
        self.inner.state().queue.len()
    }

    /// Check if the queue is full.
    pub fn is_full(&self) -> bool {
        let state = self.inner.state();
        state.queue.len() >= state.max_buffers
    }

    /// Get statistics.
    pub fn stats(&self) -> AppSrcStats {
        let state = self.inner.state();
        AppSrcStats {
            queued_buffers: state.queue.len(),
            total_pushed: state.total_pushed,
            total_produced: state.total_produced,
            eos: state.eos,
        }
    }
}

/// Statistics about AppSrc operation.
#[derive(Debug, Clone, Copy)]
pub struct AppSrcStats {
    /// Number of buffers currently queued.
    pub queued_buffers: usize,
    /// Total buffers pushed by the application.
    pub total_pushed: u64,
    /// Total buffers produced to the pipeline.
    pub total_produced: u64,
    /// Whether EOS has been signaled.
    pub eos: bool,
}
