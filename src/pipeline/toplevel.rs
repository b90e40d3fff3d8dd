//! The top-level bin.

use super::bin::Bin;
use crate::bus::Bus;
use crate::element::State;
use crate::error::{Error, Result};
use crate::message::{MessageKind, MessageType, MessageTypeMask};
use crate::observability::pipeline_span;
use crate::scheduler::{Scheduler, SchedulingMode};
use std::ops::Deref;
use std::time::Duration;
use tracing::{info, warn};

/// Settings of a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How streaming tasks run.
    pub scheduling: SchedulingMode,
    /// Name of the pipeline element.
    pub name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scheduling: SchedulingMode::Threaded,
            name: "pipeline".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Set the scheduling mode.
    pub fn with_scheduling(mut self, scheduling: SchedulingMode) -> Self {
        self.scheduling = scheduling;
        self
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// A bin that owns the [`Bus`] and the [`Scheduler`] of everything inside
/// it.
///
/// ```rust
/// use sluice::prelude::*;
/// use sluice::elements::{FakeSink, FakeSrc};
///
/// let pipeline = Pipeline::new("demo");
/// let src = FakeSrc::new().with_num_buffers(4).build("src");
/// let sink = FakeSink::new();
/// let stats = sink.stats();
/// let sink = sink.build("sink");
/// pipeline.add_many(&[&src, &sink]).unwrap();
/// src.link(&sink).unwrap();
///
/// pipeline.run(Some(std::time::Duration::from_secs(5))).unwrap();
/// assert_eq!(stats.buffers(), 4);
/// assert_eq!(stats.eos_count(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct Pipeline {
    bin: Bin,
    bus: Bus,
    scheduler: Scheduler,
}

impl Deref for Pipeline {
    type Target = Bin;

    fn deref(&self) -> &Bin {
        &self.bin
    }
}

impl Pipeline {
    /// Threaded pipeline called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(PipelineConfig::default().with_name(name))
    }

    /// Pipeline built from `config`.
    pub fn with_config(config: PipelineConfig) -> Self {
        let bin = Bin::new(config.name);
        let bus = Bus::new();
        let scheduler = Scheduler::from_mode(config.scheduling);
        bin.set_bus(bus.clone());
        bin.set_scheduler(scheduler.clone());
        Self {
            bin,
            bus,
            scheduler,
        }
    }

    /// The pipeline bus.
    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    /// The scheduler shared by every task in the pipeline.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The pipeline as a bin.
    pub fn as_bin(&self) -> &Bin {
        &self.bin
    }

    fn finish(&self, message: Option<crate::message::Message>) -> Result<()> {
        match message.as_ref().map(|m| m.kind()) {
            Some(MessageKind::Eos) => {
                info!(pipeline = %self.name(), "finished");
                Ok(())
            }
            Some(MessageKind::Error { description, debug: detail }) => {
                warn!(pipeline = %self.name(), %description, ?detail, "stopped on error");
                Err(Error::Element(description.clone()))
            }
            _ => Err(Error::Element("timed out waiting for end of stream".to_string())),
        }
    }

    fn stop_mask() -> MessageTypeMask {
        MessageTypeMask::of(MessageType::Eos).with(MessageType::Error)
    }

    /// Play until end of stream or an error, then return to NULL.
    ///
    /// `timeout` bounds the wait for EOS; `None` waits forever.
    pub fn run(&self, timeout: Option<Duration>) -> Result<()> {
        let _span = pipeline_span(self.name()).entered();
        self.set_state(State::Playing)?;
        let message = self.bus.timed_pop_filtered(timeout, Self::stop_mask());
        let outcome = self.finish(message);
        self.set_state(State::Null)?;
        outcome
    }

    /// Like [`run`](Self::run), awaiting the bus instead of blocking on it.
    pub async fn run_async(&self) -> Result<()> {
        self.set_state(State::Playing)?;
        let message = self.bus.pop_async(Self::stop_mask()).await;
        let outcome = self.finish(Some(message));
        self.set_state(State::Null)?;
        outcome
    }
}
