//! Element factories by name.
//!
//! The registry is an ordinary value: create one at startup, register the
//! factories the application needs and pass it where elements are made.
//!
//! ```rust
//! use sluice::registry::ElementRegistry;
//!
//! let registry = ElementRegistry::with_core_elements();
//! let a = registry.make("fakesrc", None).unwrap();
//! let b = registry.make("fakesrc", None).unwrap();
//! let c = registry.make("fakesink", Some("out")).unwrap();
//! assert_eq!((a.name(), b.name(), c.name()), ("fakesrc0", "fakesrc1", "out"));
//! ```

use crate::element::Element;
use crate::elements::{AppSrc, FakeSink, FakeSrc, Identity, MemorySrc, Queue};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Constructor of an element given its instance name.
pub type ElementConstructor = Arc<dyn Fn(&str) -> Element + Send + Sync>;

/// A named way of creating one kind of element.
#[derive(Clone)]
pub struct ElementFactory {
    name: String,
    description: String,
    constructor: ElementConstructor,
    instances: Arc<AtomicU64>,
}

impl fmt::Debug for ElementFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementFactory")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl ElementFactory {
    /// Create a factory.
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&str) -> Element + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            constructor: Arc::new(constructor),
            instances: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Factory name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-line description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Create an instance. Without a name one is generated as
    /// `<factory><n>`.
    pub fn create(&self, name: Option<&str>) -> Element {
        let generated;
        let name = match name {
            Some(name) => name,
            None => {
                let n = self.instances.fetch_add(1, Ordering::Relaxed);
                generated = format!("{}{}", self.name, n);
                &generated
            }
        };
        (self.constructor)(name)
    }
}

/// Registry of element factories.
#[derive(Debug, Clone, Default)]
pub struct ElementRegistry {
    factories: HashMap<String, ElementFactory>,
}

impl ElementRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in elements that need no parameters.
    pub fn with_core_elements() -> Self {
        let mut registry = Self::new();
        let core = [
            ElementFactory::new("fakesrc", "Unlimited source of zeroed buffers", |name| {
                FakeSrc::new().build(name)
            }),
            ElementFactory::new("fakesink", "Counts and discards everything", |name| {
                FakeSink::new().build(name)
            }),
            ElementFactory::new("identity", "Passes buffers through unchanged", |name| {
                Identity::new().build(name)
            }),
            ElementFactory::new("queue", "Thread boundary with a bounded FIFO", |name| {
                Queue::new().build(name)
            }),
            ElementFactory::new("appsrc", "Source fed by the application", |name| {
                AppSrc::new().build(name)
            }),
            ElementFactory::new("memsrc", "Seekable source over an empty byte array", |name| {
                MemorySrc::new(Vec::new()).build(name)
            }),
        ];
        for factory in core {
            registry.factories.insert(factory.name.clone(), factory);
        }
        registry
    }

    /// Add a factory. Names must be unique.
    pub fn register(&mut self, factory: ElementFactory) -> Result<()> {
        if self.factories.contains_key(factory.name()) {
            return Err(Error::DuplicateName(factory.name().to_string()));
        }
        debug!(factory = %factory.name(), "registered");
        self.factories.insert(factory.name().to_string(), factory);
        Ok(())
    }

    /// Create an element from the factory called `factory`.
    pub fn make(&self, factory: &str, name: Option<&str>) -> Result<Element> {
        let found = self
            .factories
            .get(factory)
            .ok_or_else(|| Error::UnknownFactory(factory.to_string()))?;
        Ok(found.create(name))
    }

    /// The factory called `name`.
    pub fn factory(&self, name: &str) -> Option<&ElementFactory> {
        self.factories.get(name)
    }

    /// Names of all factories, sorted.
    pub fn factories(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_elements() {
        let registry = ElementRegistry::with_core_elements();
        assert_eq!(
            registry.factories(),
            ["appsrc", "fakesink", "fakesrc", "identity", "memsrc", "queue"]
        );
        let queue = registry.make("queue", None).unwrap();
        assert_eq!(queue.name(), "queue0");
        assert_eq!(queue.pads().len(), 2);
    }

    #[test]
    fn test_unknown_and_duplicate() {
        let mut registry = ElementRegistry::with_core_elements();
        assert!(matches!(
            registry.make("nosuch", None),
            Err(Error::UnknownFactory(name)) if name == "nosuch"
        ));
        let dup = ElementFactory::new("identity", "again", |name| Identity::new().build(name));
        assert!(matches!(registry.register(dup), Err(Error::DuplicateName(_))));
    }

    #[test]
    fn test_custom_factory() {
        let mut registry = ElementRegistry::new();
        registry
            .register(ElementFactory::new("tiny", "Four-byte buffers", |name| {
                FakeSrc::new().with_size(4).with_num_buffers(1).build(name)
            }))
            .unwrap();
        assert_eq!(registry.factory("tiny").unwrap().description(), "Four-byte buffers");
        assert_eq!(registry.make("tiny", None).unwrap().name(), "tiny0");
        assert_eq!(registry.make("tiny", Some("x")).unwrap().name(), "x");
        assert_eq!(registry.make("tiny", None).unwrap().name(), "tiny1");
    }
}
