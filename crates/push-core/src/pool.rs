use bytes::BytesMut;
use tokio::sync::Mutex;

/// A bounded free-list of reusable write buffers, sized by `write_buf_num` in
/// config. Amortizes allocation on the fan-out hot path: callers acquire a
/// buffer, fill it, and release it back; once the pool is full, released
/// buffers are simply dropped instead of growing the pool further.
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    capacity: usize,
    buf_size: usize,
}

impl BufferPool {
    pub fn new(capacity: usize, buf_size: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            buf_size,
        }
    }

    pub async fn acquire(&self) -> BytesMut {
        let mut free = self.free.lock().await;
        free.pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buf_size))
    }

    pub async fn release(&self, mut buf: BytesMut) {
        buf.clear();
        let mut free = self.free.lock().await;
        if free.len() < self.capacity {
            free.push(buf);
        }
    }
}
