use crate::sink::{LockedSink, TracingSink};
use rdt_abstract::LogSink;
use std::sync::Arc;
use tracing::debug;

/// Process-wide transport handle.
///
/// Cheap to clone. The first handle brings the transport subsystem up and
/// dropping the last one tears it down. Every engine and server built from a
/// context logs through its sink.
#[derive(Clone)]
pub struct NetContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    sink: Arc<dyn LogSink>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        debug!("network context released");
    }
}

impl NetContext {
    /// A context that logs protocol events through `tracing`.
    pub fn new() -> Self {
        Self::from_shared(Arc::new(TracingSink))
    }

    /// A context whose sink is serialized behind a mutex.
    pub fn with_sink(sink: impl LogSink + 'static) -> Self {
        Self::from_shared(Arc::new(LockedSink::new(sink)))
    }

    fn from_shared(sink: Arc<dyn LogSink>) -> Self {
        debug!("network context initialised");
        Self {
            inner: Arc::new(ContextInner { sink }),
        }
    }

    pub fn sink(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.inner.sink)
    }

    pub fn log(&self, line: &str) {
        self.inner.sink.log(line);
    }

    /// Number of live handles sharing this context.
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Default for NetContext {
    fn default() -> Self {
        Self::new()
    }
}
