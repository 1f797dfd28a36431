//! Bounded output buffer.

use std::collections::VecDeque;

/// FIFO of decoded output chunks with a fixed capacity.
///
/// When full, pushing a chunk evicts the oldest one. Draining returns all
/// buffered chunks concatenated in arrival order and leaves the buffer empty.
#[derive(Debug)]
pub struct OutputBuffer {
    chunks: VecDeque<String>,
    capacity: usize,
    dropped: u64,
}

impl OutputBuffer {
    /// Creates an empty buffer holding at most `capacity` chunks.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chunks: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            dropped: 0,
        }
    }

    /// Appends a chunk, returning the evicted oldest chunk if the buffer was
    /// full. Empty chunks are ignored.
    pub fn push(&mut self, chunk: String) -> Option<String> {
        if chunk.is_empty() {
            return None;
        }

        let evicted = if self.chunks.len() >= self.capacity {
            self.dropped += 1;
            self.chunks.pop_front()
        } else {
            None
        };
        self.chunks.push_back(chunk);
        evicted
    }

    /// Removes every chunk and returns them joined.
    pub fn drain_all(&mut self) -> String {
        let total = self.chunks.iter().map(String::len).sum();
        let mut output = String::with_capacity(total);
        for chunk in self.chunks.drain(..) {
            output.push_str(&chunk);
        }
        output
    }

    /// Number of buffered chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Maximum number of chunks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks evicted since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
