//! Relay Buffer
//!
//! Fixed-capacity byte queue staging data between two endpoints.

use std::io;

use tokio::net::TcpStream;

/// Default buffer capacity in bytes
pub const DEFAULT_CAPACITY: usize = 512;

/// Non-blocking byte I/O used by the relay buffers
pub trait TryIo {
    /// Attempt a single read without waiting
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Attempt a single write without waiting
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

impl TryIo for TcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}

/// Result of a single fill or drain attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Bytes were moved
    Moved(usize),
    /// Nothing was attempted, or the endpoint was not ready
    Idle,
    /// The endpoint reached end of stream
    Closed,
}

/// Fixed-capacity FIFO of bytes
///
/// Reads append at the tail and writes consume from the head. Consumed bytes
/// are shifted out so pending data always starts at index 0.
#[derive(Debug)]
pub struct Buffer {
    data: Box<[u8]>,
    len: usize,
}

impl Buffer {
    /// Create an empty buffer holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    /// Bytes still waiting to be written
    pub fn pending(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Read once from `source` into the free region.
    ///
    /// Does not touch `source` when the buffer is full.
    pub fn try_fill<S: TryIo + ?Sized>(&mut self, source: &S) -> io::Result<Progress> {
        if self.is_full() {
            return Ok(Progress::Idle);
        }

        match source.try_read(&mut self.data[self.len..]) {
            Ok(0) => Ok(Progress::Closed),
            Ok(n) => {
                self.len += n;
                Ok(Progress::Moved(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Progress::Idle),
            Err(e) => Err(e),
        }
    }

    /// Write once from the head of the buffer to `sink`.
    ///
    /// Unsent bytes are moved to the head afterwards.
    pub fn try_drain<S: TryIo + ?Sized>(&mut self, sink: &S) -> io::Result<Progress> {
        if self.is_empty() {
            return Ok(Progress::Idle);
        }

        match sink.try_write(&self.data[..self.len]) {
            Ok(0) => Ok(Progress::Closed),
            Ok(n) => {
                self.consume(n);
                Ok(Progress::Moved(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Progress::Idle),
            Err(e) => Err(e),
        }
    }

    fn consume(&mut self, n: usize) {
        let n = n.min(self.len);
        self.data.copy_within(n..self.len, 0);
        self.len -= n;
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
