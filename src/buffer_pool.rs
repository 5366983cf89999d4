use tokio::sync::Mutex;

const MAX_POOL_SIZE: usize = 100;

/// Free list of fixed-size copy buffers shared by all tunnel tasks.
///
/// Every checked-out buffer has exactly the configured size; reuse only
/// amortizes allocation under load, correctness never depends on it.
#[derive(Debug)]
pub struct BufferPool {
    buffer_size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create a pool handing out buffers of `buffer_size` bytes
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            free: Mutex::new(Vec::with_capacity(MAX_POOL_SIZE)),
        }
    }

    /// The fixed size of every buffer this pool hands out
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Check a buffer out of the pool, allocating a fresh one when empty
    pub async fn get(&self) -> Vec<u8> {
        let mut free = self.free.lock().await;
        match free.pop() {
            Some(buffer) => {
                debug_assert_eq!(buffer.len(), self.buffer_size);
                buffer
            }
            None => vec![0u8; self.buffer_size],
        }
    }

    /// Return a buffer for reuse
    ///
    /// Buffers whose capacity no longer fits the fixed-size contract are
    /// dropped instead of pooled. Contents are zeroed so no bytes leak
    /// between checkouts.
    pub async fn put(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() < self.buffer_size || buffer.capacity() > self.buffer_size * 2 {
            return;
        }

        buffer.clear();
        buffer.resize(self.buffer_size, 0);

        let mut free = self.free.lock().await;
        if free.len() < MAX_POOL_SIZE {
            free.push(buffer);
        }
    }

    /// Number of buffers currently idle in the free list
    pub async fn idle(&self) -> usize {
        self.free.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn get_honors_configured_size() {
        let pool = BufferPool::new(4096);
        let buffer = pool.get().await;
        assert_eq!(buffer.len(), 4096);
        assert_eq!(pool.buffer_size(), 4096);
    }

    #[tokio::test]
    async fn returned_buffers_are_reused() {
        let pool = BufferPool::new(1024);

        let buffer = pool.get().await;
        pool.put(buffer).await;
        assert_eq!(pool.idle().await, 1);

        let reused = pool.get().await;
        assert_eq!(reused.len(), 1024);
        assert_eq!(pool.idle().await, 0);
    }

    #[tokio::test]
    async fn free_list_is_bounded() {
        let pool = BufferPool::new(64);

        for _ in 0..(MAX_POOL_SIZE + 50) {
            pool.put(vec![0u8; 64]).await;
        }

        assert_eq!(pool.idle().await, MAX_POOL_SIZE);
    }

    #[tokio::test]
    async fn wrong_size_buffers_are_rejected() {
        let pool = BufferPool::new(8192);

        pool.put(vec![0u8; 16]).await;
        pool.put(Vec::with_capacity(8192 * 4)).await;

        assert_eq!(pool.idle().await, 0);
    }

    #[tokio::test]
    async fn reused_buffers_are_zeroed_and_resized() {
        let pool = BufferPool::new(512);

        let mut buffer = pool.get().await;
        buffer.fill(0xAA);
        buffer.truncate(17);
        pool.put(buffer).await;

        let reused = pool.get().await;
        assert_eq!(reused.len(), 512);
        assert!(reused.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn concurrent_checkout_is_safe() {
        let pool = Arc::new(BufferPool::new(256));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let buffer = pool.get().await;
                    assert_eq!(buffer.len(), 256);
                    pool.put(buffer).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(pool.idle().await <= MAX_POOL_SIZE);
    }
}
