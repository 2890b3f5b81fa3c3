use super::RenderCommand;

pub const DEFAULT_COMMAND_CAPACITY: usize = 256;

/// Per-frame command storage.
///
/// Append-only within a cycle. The logical capacity doubles whenever it is
/// exhausted and is never given back, so a steady-state frame records without
/// allocating.
#[derive(Debug)]
pub struct CommandBufferPool {
    slots: Vec<RenderCommand>,
    len: usize,
    capacity: usize,
}

impl CommandBufferPool {
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = initial_capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            len: 0,
            capacity,
        }
    }

    pub fn record(&mut self, command: RenderCommand) {
        if self.len == self.capacity {
            self.capacity *= 2;
            self.slots.reserve_exact(self.capacity - self.slots.len());
            log::debug!("command buffer grew to {}", self.capacity);
        }
        if self.len < self.slots.len() {
            self.slots[self.len] = command;
        } else {
            self.slots.push(command);
        }
        self.len += 1;
    }

    /// Commands recorded in the current cycle, in record order.
    pub fn commands(&self) -> &[RenderCommand] {
        &self.slots[..self.len]
    }

    /// Starts a new cycle. With `clear_refs` the stale commands (and the
    /// buffers they own) are dropped too; the capacity is kept either way.
    pub fn reset(&mut self, clear_refs: bool) {
        self.len = 0;
        if clear_refs {
            self.slots.clear();
        }
    }

    /// Drops the commands recorded after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for CommandBufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_keeps_every_entry() {
        let mut pool = CommandBufferPool::new(2);
        for i in 0..9 {
            pool.record(RenderCommand::Clear([i as f32, 0.0, 0.0, 0.0]));
        }
        assert_eq!(pool.len(), 9);
        assert_eq!(pool.capacity(), 16);
        for (i, command) in pool.commands().iter().enumerate() {
            assert_eq!(*command, RenderCommand::Clear([i as f32, 0.0, 0.0, 0.0]));
        }
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut pool = CommandBufferPool::new(1);
        pool.record(RenderCommand::Clear([0.0; 4]));
        pool.record(RenderCommand::Clear([1.0; 4]));
        pool.reset(false);
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 2);

        pool.record(RenderCommand::Clear([2.0; 4]));
        assert_eq!(pool.commands(), &[RenderCommand::Clear([2.0; 4])]);

        pool.reset(true);
        assert!(pool.commands().is_empty());
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn truncate_discards_the_tail_only() {
        let mut pool = CommandBufferPool::new(4);
        for i in 0..3 {
            pool.record(RenderCommand::Clear([i as f32; 4]));
        }
        pool.truncate(1);
        assert_eq!(pool.commands(), &[RenderCommand::Clear([0.0; 4])]);
        pool.truncate(5);
        assert_eq!(pool.len(), 1);

        pool.record(RenderCommand::Clear([9.0; 4]));
        assert_eq!(pool.commands()[1], RenderCommand::Clear([9.0; 4]));
    }
}
