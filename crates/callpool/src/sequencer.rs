use portable_atomic::{AtomicU64, Ordering};

/// Issues submission ids for a single client.
///
/// Ids start at 1 and strictly increase; an id is never handed out twice.
/// Each [`Client`](crate::Client) owns its own sequencer, so ids are only
/// comparable within one client.
#[derive(Debug)]
pub struct Sequencer {
    next: AtomicU64,
}

impl Sequencer {
    /// The id returned by the first call to [`Sequencer::next_id`].
    pub const FIRST: u64 = 1;

    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(Self::FIRST),
        }
    }

    /// Claims the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - Self::FIRST
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc, thread};

    #[test]
    fn ids_start_at_one_and_increase() {
        let seq = Sequencer::new();
        assert_eq!(seq.next_id(), 1);
        assert_eq!(seq.next_id(), 2);
        assert_eq!(seq.next_id(), 3);
        assert_eq!(seq.issued(), 3);
    }

    #[test]
    fn concurrent_claims_are_unique() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1000;

        let seq = Arc::new(Sequencer::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let seq = Arc::clone(&seq);
                thread::spawn(move || (0..PER_THREAD).map(|_| seq.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::with_capacity(THREADS * PER_THREAD);
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "Duplicate id found: {id}");
            }
        }
        assert_eq!(seen.len(), THREADS * PER_THREAD);
        assert_eq!(seen.iter().max().copied(), Some((THREADS * PER_THREAD) as u64));
    }
}
