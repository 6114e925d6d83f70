//! Growable byte buffer with separate read and write cursors.
//!
//! Decoders hand out blocks of arbitrary size while callers ask for
//! arbitrary amounts; [`ByteBuffer`] sits between the two. Pushed bytes are
//! always appended after the unconsumed ones and popped in order.

/// Initial capacity used by [`ByteBuffer::default`].
const DEFAULT_CAPACITY: usize = 16 * 1024;

/// A resizable byte buffer with a read cursor and a write cursor.
///
/// `read <= write <= data.len()` holds at all times.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    read: usize,
    write: usize,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ByteBuffer {
    /// Creates an empty buffer with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            read: 0,
            write: 0,
        }
    }

    /// Appends `bytes` after any unconsumed data.
    ///
    /// Consumed space is compacted to the front first; if the bytes still
    /// do not fit, capacity doubles until they do.
    pub fn push(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if self.read > 0 {
            self.data.copy_within(self.read..self.write, 0);
            self.write -= self.read;
            self.read = 0;
        }
        let needed = self.write + bytes.len();
        if needed > self.data.len() {
            let mut capacity = self.data.len().max(1);
            while capacity < needed {
                capacity *= 2;
            }
            self.data.resize(capacity, 0);
        }
        self.data[self.write..needed].copy_from_slice(bytes);
        self.write = needed;
    }

    /// Copies up to `target.len()` bytes out and returns how many were copied.
    pub fn pop(&mut self, target: &mut [u8]) -> usize {
        let count = target.len().min(self.available());
        target[..count].copy_from_slice(&self.data[self.read..self.read + count]);
        self.consume(count);
        count
    }

    /// Unconsumed bytes, oldest first.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    /// Marks `count` bytes as consumed.
    pub fn consume(&mut self, count: usize) {
        self.read = (self.read + count).min(self.write);
        if self.read == self.write {
            self.read = 0;
            self.write = 0;
        }
    }

    /// Number of bytes waiting to be popped.
    pub fn available(&self) -> usize {
        self.write - self.read
    }

    /// Returns `true` when nothing is waiting to be popped.
    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Current allocated capacity.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Drops all unconsumed bytes, keeping the allocation.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }
}
