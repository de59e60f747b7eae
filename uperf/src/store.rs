//! The payload served by READ and carried by WRITE.

use std::sync::{Arc, PoisonError, RwLock};

use log::trace;

/// Fixed-size payload buffer of one member. WRITEs are accepted and
/// discarded, READs return the current buffer.
#[derive(Debug)]
pub struct PayloadStore {
    buffer: RwLock<Arc<[u8]>>,
}

impl PayloadStore {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            buffer: RwLock::new(vec![0u8; size].into()),
        }
    }

    /// Replaces the buffer with a zeroed one of `size` bytes.
    pub fn resize(&self, size: usize) {
        let fresh: Arc<[u8]> = vec![0u8; size].into();
        *self.buffer.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    }

    #[must_use]
    pub fn get(&self, key: i64) -> Arc<[u8]> {
        trace!("get({key})");
        self.buffer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn put(&self, key: i64, payload: &[u8]) {
        trace!("put({key}, {} bytes)", payload.len());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize() {
        let store = PayloadStore::new(4);
        let before = store.get(0);
        store.resize(16);
        assert_eq!(before.len(), 4);
        assert_eq!(store.get(0).len(), 16);

        store.put(1, &[1, 2, 3]);
        assert_eq!(store.len(), 16);
    }
}
