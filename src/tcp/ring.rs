use crate::error::Error;

/// Fixed capacity byte queue.
#[derive(Debug, Clone)]
pub struct RingBuffer<const N: usize> {
    buf: [u8; N],
    head: usize,
    len: usize,
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RingBuffer<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            head: 0,
            len: 0,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn free(&self) -> usize {
        N - self.len
    }

    /// Append `data` as a whole or not at all.
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() > self.free() {
            return Err(Error::RingBufferFull);
        }
        let tail = (self.head + self.len) % N.max(1);
        let first = data.len().min(N - tail);
        let (a, b) = data.split_at(first);
        self.buf[tail..tail + first].copy_from_slice(a);
        self.buf[..b.len()].copy_from_slice(b);
        self.len += data.len();
        Ok(())
    }

    /// The contiguous run of queued bytes starting `offset` bytes after the
    /// read position.
    #[must_use]
    pub fn linear_block(&self, offset: usize) -> &[u8] {
        if offset >= self.len {
            return &[];
        }
        let start = (self.head + offset) % N;
        let end = (start + self.len - offset).min(N);
        &self.buf[start..end]
    }

    /// Drop up to `n` bytes from the front.
    pub fn skip(&mut self, n: usize) -> usize {
        let n = n.min(self.len);
        if n > 0 {
            self.head = (self.head + n) % N;
            self.len -= n;
        }
        n
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}
