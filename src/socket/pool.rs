//! Recycled read buffers for the shared ICMP reader

use std::sync::Mutex;

/// Size of one read buffer; large enough for any frame on a 1500-byte MTU
pub const FRAME_BUFFER_SIZE: usize = 1500;

/// Idle buffers kept beyond this count are freed instead of pooled
const MAX_IDLE_BUFFERS: usize = 64;

/// Pool of fixed-size byte buffers
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
}

impl BufferPool {
    /// Create an empty pool handing out buffers of `buffer_size` bytes
    pub fn new(buffer_size: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            buffer_size,
        }
    }

    /// Take a buffer, allocating when none is idle
    pub fn get(&self) -> Vec<u8> {
        self.idle
            .lock()
            .expect("mutex poisoned")
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size])
    }

    /// Return a buffer to the pool
    pub fn put(&self, mut buffer: Vec<u8>) {
        buffer.resize(self.buffer_size, 0);
        let mut idle = self.idle.lock().expect("mutex poisoned");
        if idle.len() < MAX_IDLE_BUFFERS {
            idle.push(buffer);
        }
    }

    /// Number of idle buffers
    pub fn idle_count(&self) -> usize {
        self.idle.lock().expect("mutex poisoned").len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(FRAME_BUFFER_SIZE)
    }
}
