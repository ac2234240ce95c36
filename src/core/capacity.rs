use std::collections::HashSet;
use parking_lot::Mutex;
use super::types::TaskId;

/// Fixed-ceiling set of task ids currently holding an upload slot.
pub struct CapacityLimiter {
    ceiling: usize,
    slots: Mutex<HashSet<TaskId>>,
}

impl CapacityLimiter {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling: ceiling.max(1),
            slots: Mutex::new(HashSet::new()),
        }
    }

    /// Claim a slot for `id`. False when full or when `id` already holds one.
    pub fn try_admit(&self, id: TaskId) -> bool {
        let mut slots = self.slots.lock();
        if slots.len() >= self.ceiling || slots.contains(&id) {
            return false;
        }

        slots.insert(id)
    }

    pub fn release(&self, id: &TaskId) {
        self.slots.lock().remove(id);
    }

    pub fn has_capacity(&self) -> bool {
        self.slots.lock().len() < self.ceiling
    }

    pub fn in_use(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use super::*;

    #[test]
    fn test_admit_up_to_ceiling() {
        let limiter = CapacityLimiter::new(2);
        let (a, b, c) = (TaskId::new(), TaskId::new(), TaskId::new());

        assert!(limiter.try_admit(a));
        assert!(!limiter.try_admit(a));
        assert!(limiter.try_admit(b));
        assert!(!limiter.has_capacity());
        assert!(!limiter.try_admit(c));

        limiter.release(&a);
        limiter.release(&a);
        assert_eq!(limiter.in_use(), 1);
        assert!(limiter.try_admit(c));
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_ceiling() {
        let limiter = Arc::new(CapacityLimiter::new(3));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.try_admit(TaskId::new()))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();

        assert_eq!(admitted, 3);
        assert_eq!(limiter.in_use(), 3);
    }
}
