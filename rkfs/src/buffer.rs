//! Read buffers sized to the largest single read.
//!
//! A buffer is checked out for the duration of one call and returned on drop,
//! so concurrent reads never share backing storage.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

pub struct BufferPool {
    size: usize,
    max_idle: usize,
    free: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl BufferPool {
    pub fn new(size: usize, max_idle: usize) -> Self {
        Self {
            size,
            max_idle,
            free: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn acquire(&self) -> PooledBuffer {
        let reused = self.free.lock().ok().and_then(|mut free| free.pop());
        let buf = reused.unwrap_or_else(|| vec![0u8; self.size]);
        PooledBuffer {
            buf: Some(buf),
            max_idle: self.max_idle,
            free: self.free.clone(),
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().map(|f| f.len()).unwrap_or(0)
    }
}

pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    max_idle: usize,
    free: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let (Some(buf), Ok(mut free)) = (self.buf.take(), self.free.lock()) {
            if free.len() < self.max_idle {
                free.push(buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_not_shared_while_checked_out() {
        let pool = BufferPool::new(16, 4);
        let mut a = pool.acquire();
        let mut b = pool.acquire();
        a[0] = 1;
        b[0] = 2;
        assert_eq!(a[0], 1);
        assert_ne!(a.as_ptr(), b.as_ptr());
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_buffers_are_reused_up_to_max_idle() {
        let pool = BufferPool::new(8, 1);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
        let _c = pool.acquire();
        assert_eq!(pool.idle(), 0);
    }
}
