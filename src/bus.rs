//! Decoupled delivery of status messages to the application.
//!
//! Elements post [`Message`]s from any thread; one consumer drains them in
//! FIFO order, either blocking ([`Bus::timed_pop_filtered`]) or from async
//! code ([`Bus::pop_async`], [`Bus::stream`]).
//!
//! A sync handler runs in the posting thread and decides per message whether
//! it is dropped, queued, or queued with the poster blocked until the
//! consumer releases it.

use crate::message::{Message, MessageTypeMask};
use futures::Stream;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Decision of a bus sync handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSyncReply {
    /// Discard the message.
    Drop,
    /// Queue the message.
    Pass,
    /// Queue the message and block the poster until it is released.
    Async,
}

type SyncHandler = dyn Fn(&Bus, &Message) -> BusSyncReply + Send + Sync;

struct BusState {
    queue: VecDeque<Message>,
    flushing: bool,
}

struct BusInner {
    state: Mutex<BusState>,
    cond: Condvar,
    notify: Notify,
    sync_handler: RwLock<Option<Arc<SyncHandler>>>,
}

/// Thread-safe unbounded message queue.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState {
                    queue: VecDeque::new(),
                    flushing: false,
                }),
                cond: Condvar::new(),
                notify: Notify::new(),
                sync_handler: RwLock::new(None),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Post a message.
    ///
    /// Returns false if the bus is flushing and the message was dropped.
    pub fn post(&self, message: Message) -> bool {
        if self.lock().flushing {
            debug!(kind = ?message.message_type(), "bus flushing, dropping message");
            return false;
        }

        let handler = self
            .inner
            .sync_handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let reply = match handler {
            Some(handler) => handler(self, &message),
            None => BusSyncReply::Pass,
        };

        match reply {
            BusSyncReply::Drop => {
                trace!(kind = ?message.message_type(), "sync handler dropped message");
                true
            }
            BusSyncReply::Pass => self.enqueue(message),
            BusSyncReply::Async => {
                let (message, ack) = message.into_acknowledged();
                if !self.enqueue(message) {
                    return false;
                }
                trace!("waiting for message to be released");
                ack.wait();
                true
            }
        }
    }

    fn enqueue(&self, message: Message) -> bool {
        {
            let mut state = self.lock();
            if state.flushing {
                return false;
            }
            state.queue.push_back(message);
            self.inner.cond.notify_all();
        }
        self.inner.notify.notify_one();
        true
    }

    /// Take the next message without waiting.
    pub fn pop(&self) -> Option<Message> {
        self.timed_pop(Some(Duration::ZERO))
    }

    /// Take the next message matching `mask` without waiting.
    ///
    /// Non-matching messages in front of it are discarded.
    pub fn pop_filtered(&self, mask: MessageTypeMask) -> Option<Message> {
        self.timed_pop_filtered(Some(Duration::ZERO), mask)
    }

    /// Clone of the next message, leaving it queued.
    pub fn peek(&self) -> Option<Message> {
        self.lock().queue.front().cloned()
    }

    /// True if a queued message matches `mask`.
    pub fn have_pending(&self, mask: MessageTypeMask) -> bool {
        self.lock()
            .queue
            .iter()
            .any(|m| mask.contains(m.message_type()))
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `timeout` for the next message. `None` waits forever.
    pub fn timed_pop(&self, timeout: Option<Duration>) -> Option<Message> {
        self.timed_pop_filtered(timeout, MessageTypeMask::ANY)
    }

    /// Wait up to `timeout` for a message matching `mask`. `None` waits
    /// forever.
    ///
    /// Non-matching messages are discarded as they are reached. Returns
    /// `None` on timeout or when the bus is flushing.
    pub fn timed_pop_filtered(
        &self,
        timeout: Option<Duration>,
        mask: MessageTypeMask,
    ) -> Option<Message> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        loop {
            while let Some(message) = state.queue.pop_front() {
                if mask.contains(message.message_type()) {
                    return Some(message);
                }
                trace!(kind = ?message.message_type(), "discarding unmatched message");
            }
            if state.flushing {
                return None;
            }
            state = match deadline {
                None => self
                    .inner
                    .cond
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.inner
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
    }

    /// Await a message matching `mask` without blocking the thread.
    pub async fn pop_async(&self, mask: MessageTypeMask) -> Message {
        loop {
            if let Some(message) = self.pop_filtered(mask) {
                return message;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Endless stream of every posted message.
    pub fn stream(&self) -> impl Stream<Item = Message> + Send + 'static {
        futures::stream::unfold(self.clone(), |bus| async move {
            let message = bus.pop_async(MessageTypeMask::ANY).await;
            Some((message, bus))
        })
    }

    /// While flushing, queued and newly posted messages are dropped.
    pub fn set_flushing(&self, flushing: bool) {
        let dropped: Vec<Message> = {
            let mut state = self.lock();
            state.flushing = flushing;
            self.inner.cond.notify_all();
            if flushing {
                state.queue.drain(..).collect()
            } else {
                Vec::new()
            }
        };
        debug!(flushing, dropped = dropped.len(), "bus flushing changed");
    }

    /// Install a handler run in the posting thread for every message.
    pub fn set_sync_handler<F>(&self, handler: F)
    where
        F: Fn(&Bus, &Message) -> BusSyncReply + Send + Sync + 'static,
    {
        *self
            .inner
            .sync_handler
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    /// Remove the sync handler.
    pub fn unset_sync_handler(&self) {
        *self
            .inner
            .sync_handler
            .write()
            .unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus").field("queued", &self.len()).finish()
    }
}
