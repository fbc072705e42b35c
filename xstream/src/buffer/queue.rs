//! Ordered chunk queue with size accounting.
//!
//! This module provides the FIFO that holds chunks a role has taken
//! ownership of but not yet handed on.

use std::collections::VecDeque;

use crate::chunk::Chunk;

/// A FIFO of chunks that tracks the total [`Chunk::size`] it holds.
///
/// Chunks leave in exactly the order they entered. Zero-sized chunks are
/// stored and counted like any other.
#[derive(Debug)]
pub struct ChunkQueue<T> {
    /// Queued chunks, oldest first.
    chunks: VecDeque<T>,

    /// Sum of the sizes of queued chunks.
    size: usize,
}

impl<T: Chunk> ChunkQueue<T> {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self {
            chunks: VecDeque::new(),
            size: 0,
        }
    }

    /// Returns the number of chunks in the queue.
    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if the queue holds no chunks.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Returns the total size of queued chunks.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Appends a chunk at the back.
    pub fn push(&mut self, chunk: T) {
        self.size += chunk.size();
        self.chunks.push_back(chunk);
    }

    /// Removes the oldest chunk.
    pub fn pop(&mut self) -> Option<T> {
        let chunk = self.chunks.pop_front()?;
        self.size -= chunk.size();
        Some(chunk)
    }

    /// Drops every queued chunk, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.chunks.len();
        self.chunks.clear();
        self.size = 0;
        dropped
    }
}

impl<T: Chunk> Default for ChunkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_and_size() {
        let mut queue: ChunkQueue<Vec<u8>> = ChunkQueue::new();
        queue.push(b"Hello".to_vec());
        queue.push(b", ".to_vec());
        queue.push(b"World".to_vec());

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.size(), 12);

        assert_eq!(queue.pop().unwrap(), b"Hello");
        assert_eq!(queue.size(), 7);
        assert_eq!(queue.pop().unwrap(), b", ");
        assert_eq!(queue.pop().unwrap(), b"World");
        assert!(queue.pop().is_none());
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_zero_sized_chunks_are_kept() {
        let mut queue: ChunkQueue<&'static str> = ChunkQueue::new();
        queue.push("");
        queue.push("");

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.size(), 0);
        assert!(!queue.is_empty());
        assert_eq!(queue.pop(), Some(""));
    }

    #[test]
    fn test_clear_resets_size() {
        let mut queue: ChunkQueue<String> = ChunkQueue::new();
        queue.push("a".to_string());
        queue.push("bc".to_string());
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.size(), 0);

        queue.push("x".to_string());
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.pop().as_deref(), Some("x"));
    }
}
