// rf2_import/src/buffers.rs

/// Write-behind buffer for one entity kind. `save` hands back a full batch
/// once the flush interval is reached; the owning factory persists it.
/// Access is single-writer within one import job.
#[derive(Debug)]
pub struct PersistBuffer<E> {
    entities: Vec<E>,
}

/// Entities are persisted in batches of this size.
pub const FLUSH_INTERVAL: usize = 5000;

impl<E> PersistBuffer<E> {
    pub fn new() -> Self {
        PersistBuffer {
            entities: Vec::new(),
        }
    }

    /// Append an entity; returns the buffered batch when it is time to
    /// flush.
    #[must_use]
    pub fn save(&mut self, entity: E) -> Option<Vec<E>> {
        self.entities.push(entity);
        if self.entities.len() >= FLUSH_INTERVAL {
            Some(self.drain())
        } else {
            None
        }
    }

    /// Take everything currently buffered.
    pub fn drain(&mut self) -> Vec<E> {
        std::mem::take(&mut self.entities)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl<E> Default for PersistBuffer<E> {
    fn default() -> Self {
        PersistBuffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_returns_a_batch_at_the_flush_interval() {
        let mut buffer = PersistBuffer::new();
        for i in 0..FLUSH_INTERVAL - 1 {
            assert!(buffer.save(i).is_none());
        }
        let batch = buffer.save(FLUSH_INTERVAL - 1).expect("flush expected");
        assert_eq!(batch.len(), FLUSH_INTERVAL);
        assert!(buffer.is_empty());
    }
}
