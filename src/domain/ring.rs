//! Fixed-capacity ring buffer with O(1) insert and eviction of the oldest entry

/// Ring of at most `N` values. Once full, each push evicts the oldest value.
#[derive(Debug, Clone)]
pub struct Ring<T, const N: usize> {
    slots: [T; N],
    /// Index of the oldest value
    head: usize,
    len: usize,
}

impl<T: Copy + Default, const N: usize> Ring<T, N> {
    pub fn new() -> Self {
        Self { slots: [T::default(); N], head: 0, len: 0 }
    }

    /// Push a value, returning the evicted oldest value if the ring was full
    pub fn push(&mut self, value: T) -> Option<T> {
        if self.len < N {
            let idx = (self.head + self.len) % N;
            self.slots[idx] = value;
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head];
            self.slots[self.head] = value;
            self.head = (self.head + 1) % N;
            Some(evicted)
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == N
    }

    pub fn oldest(&self) -> Option<T> {
        (self.len > 0).then(|| self.slots[self.head])
    }

    pub fn newest(&self) -> Option<T> {
        (self.len > 0).then(|| self.slots[(self.head + self.len - 1) % N])
    }

    /// Values from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).map(move |i| self.slots[(self.head + i) % N])
    }

    /// Copy of the current contents in oldest-to-newest order
    pub fn to_array(&self) -> [T; N] {
        let mut out = [T::default(); N];
        for (slot, value) in out.iter_mut().zip(self.iter()) {
            *slot = value;
        }
        out
    }
}

impl<T: Copy + Default, const N: usize> Default for Ring<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
