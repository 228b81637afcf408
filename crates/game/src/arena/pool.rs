/// Per-tick bump arena for transient byte scratch. `alloc` hands out
/// offsets into one growing buffer; `reset` at the top of the tick
/// reclaims everything without freeing.
#[derive(Debug, Default)]
pub struct ScratchArena {
    buf: Vec<u8>,
    used: usize,
    high_water: usize,
}

impl ScratchArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            used: 0,
            high_water: 0,
        }
    }

    pub fn alloc(&mut self, len: usize) -> usize {
        let offset = self.used;
        self.used += len;
        if self.used > self.buf.len() {
            self.buf.resize(self.used.max(self.buf.len() * 2), 0);
        }
        self.high_water = self.high_water.max(self.used);
        offset
    }

    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.buf[offset..offset + len]
    }

    pub fn slice_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.buf[offset..offset + len]
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }
}

/// Types a [`Pool`] can recycle in place.
pub trait Reset {
    fn reset(&mut self);
}

impl<T> Reset for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// Object pool: release keeps capacity, acquire reuses it. Packets and
/// per-tick entity lists cycle through here instead of the allocator.
#[derive(Debug)]
pub struct Pool<T: Reset + Default> {
    free: Vec<T>,
    max_retained: usize,
    created: u64,
    reused: u64,
}

impl<T: Reset + Default> Pool<T> {
    pub fn new(max_retained: usize) -> Self {
        Self {
            free: Vec::with_capacity(max_retained),
            max_retained,
            created: 0,
            reused: 0,
        }
    }

    pub fn acquire(&mut self) -> T {
        match self.free.pop() {
            Some(item) => {
                self.reused += 1;
                item
            }
            None => {
                self.created += 1;
                T::default()
            }
        }
    }

    pub fn release(&mut self, mut item: T) {
        if self.free.len() < self.max_retained {
            item.reset();
            self.free.push(item);
        }
    }

    pub fn retained(&self) -> usize {
        self.free.len()
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn reused(&self) -> u64 {
        self.reused
    }
}

/// Pool of wire buffers pre-sized to the MTU.
pub type BufferPool = Pool<Vec<u8>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_reuses_storage_across_resets() {
        let mut arena = ScratchArena::with_capacity(64);

        let a = arena.alloc(32);
        arena.slice_mut(a, 32).fill(0xAB);
        assert_eq!(arena.used(), 32);

        arena.reset();
        assert_eq!(arena.used(), 0);

        let b = arena.alloc(16);
        assert_eq!(b, 0);
        assert_eq!(arena.high_water(), 32);
    }

    #[test]
    fn arena_grows_on_demand() {
        let mut arena = ScratchArena::with_capacity(8);
        let offset = arena.alloc(100);
        arena.slice_mut(offset, 100).fill(1);
        assert_eq!(arena.slice(offset, 100)[99], 1);
    }

    #[test]
    fn pool_recycles_capacity() {
        let mut pool: BufferPool = Pool::new(8);

        let mut buf = pool.acquire();
        buf.extend_from_slice(&[0u8; 1200]);
        let capacity = buf.capacity();
        pool.release(buf);

        let reused = pool.acquire();
        assert!(reused.is_empty());
        assert_eq!(reused.capacity(), capacity);
        assert_eq!(pool.reused(), 1);
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn pool_caps_retention() {
        let mut pool: Pool<Vec<u8>> = Pool::new(2);
        for _ in 0..5 {
            let buf = pool.acquire();
            pool.release(buf);
        }
        let extra: Vec<Vec<u8>> = (0..5).map(|_| pool.acquire()).collect();
        for buf in extra {
            pool.release(buf);
        }
        assert_eq!(pool.retained(), 2);
    }
}
