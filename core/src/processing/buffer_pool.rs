use crate::prelude::StageError;

/// Bounded pool of scratch line buffers.
///
/// At most `max_capacity` buffers may be checked out at once; released
/// buffers are kept for reuse.
pub struct BufferPool<T> {
    buffers: Vec<Vec<T>>,
    max_capacity: usize,
    outstanding: usize,
}

impl<T: Clone + Default> BufferPool<T> {
    pub fn with_capacity(max_capacity: usize) -> Self {
        Self {
            buffers: Vec::with_capacity(max_capacity),
            max_capacity,
            outstanding: 0,
        }
    }

    /// Hands out a zeroed buffer of `length` elements.
    pub fn checkout(&mut self, length: usize) -> Result<Vec<T>, StageError> {
        if self.outstanding >= self.max_capacity {
            return Err(StageError::BufferExhaustion(format!(
                "all {} scratch buffers in use",
                self.max_capacity
            )));
        }
        let mut buffer = self.buffers.pop().unwrap_or_default();
        buffer.clear();
        buffer.resize(length, T::default());
        self.outstanding += 1;
        Ok(buffer)
    }

    /// Returns a buffer back to the pool for reuse.
    pub fn release(&mut self, buffer: Vec<T>) {
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.buffers.len() < self.max_capacity {
            self.buffers.push(buffer);
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn reset(&mut self) {
        self.buffers.clear();
        self.outstanding = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_is_reported_until_a_buffer_returns() {
        let mut pool = BufferPool::<f32>::with_capacity(2);
        let a = pool.checkout(4).unwrap();
        let _b = pool.checkout(4).unwrap();
        assert!(matches!(
            pool.checkout(4),
            Err(StageError::BufferExhaustion(_))
        ));
        pool.release(a);
        let reused = pool.checkout(8).unwrap();
        assert_eq!(reused, vec![0.0; 8]);
        assert_eq!(pool.outstanding(), 2);
    }
}
