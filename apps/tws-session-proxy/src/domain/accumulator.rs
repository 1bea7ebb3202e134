//! Response Accumulator
//!
//! Buffers partial response fragments per request id until the request's
//! terminal signal arrives. Not internally synchronized: callers hold the
//! session lock.

use std::collections::HashMap;

use super::request::RequestId;

/// Ordered, append-only fragment buffers keyed by request id.
#[derive(Debug)]
pub struct ResponseAccumulator<T> {
    buffers: HashMap<RequestId, Vec<T>>,
}

impl<T> Default for ResponseAccumulator<T> {
    fn default() -> Self {
        Self {
            buffers: HashMap::new(),
        }
    }
}

impl<T> ResponseAccumulator<T> {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment for `id`, creating its buffer on first use.
    pub fn append_partial(&mut self, id: RequestId, fragment: T) {
        self.buffers.entry(id).or_default().push(fragment);
    }

    /// Remove and return everything buffered for `id` in arrival order.
    ///
    /// Returns an empty list when nothing was buffered, including on a second
    /// call for the same id.
    pub fn retrieve_and_clear(&mut self, id: RequestId) -> Vec<T> {
        self.buffers.remove(&id).unwrap_or_default()
    }

    /// Number of fragments buffered for `id`.
    #[must_use]
    pub fn fragment_count(&self, id: RequestId) -> usize {
        self.buffers.get(&id).map_or(0, Vec::len)
    }

    /// Number of ids with buffered fragments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Drop every buffer.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}
