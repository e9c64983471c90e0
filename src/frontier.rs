//! Shared crawl frontier: deduplicated, capacity-capped discovery queue.
//!
//! [`Frontier`] pairs a [`BoundedQueue`] of discovery keys with a
//! mutex-guarded set of keys ever admitted and a cap on total
//! admissions. Worker handlers call [`try_admit`] for every key they
//! discover; exactly one call per distinct key succeeds, and nothing is
//! admitted past the cap.
//!
//! The bug class this exists to prevent: two workers discover the same
//! key concurrently, both check a visited set, both find it absent, and
//! both enqueue it. Here the contains-check, capacity-check, and insert
//! are a single critical section, so that interleaving is impossible.
//! The enqueue itself happens after the critical section: dedupe
//! atomicity comes from the set, and no lock is ever held across a
//! suspension point.
//!
//! [`try_admit`]: Frontier::try_admit

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::Mutex;

use tracing::debug;

use crate::error::ConfigError;
use crate::queue::BoundedQueue;

/// A deduplicating, capacity-capped admission gate in front of a work
/// queue of discovery keys.
pub struct Frontier<K> {
    /// Keys ever admitted. Superset of keys ever enqueued.
    seen: Mutex<HashSet<K>>,
    /// The pending-work queue shared with the consuming worker pool.
    queue: Arc<BoundedQueue<K>>,
    /// Cap on total admitted keys across the frontier's lifetime.
    max_keys: usize,
}

impl<K> Frontier<K>
where
    K: Eq + Hash + Clone + Send,
{
    /// Creates a frontier feeding `queue`, admitting at most `max_keys`
    /// distinct keys in total.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `max_keys` is zero.
    pub fn new(queue: Arc<BoundedQueue<K>>, max_keys: usize) -> Result<Self, ConfigError> {
        if max_keys == 0 {
            return Err(ConfigError::ZeroMaxKeys);
        }
        Ok(Self {
            seen: Mutex::new(HashSet::new()),
            queue,
            max_keys,
        })
    }

    /// Admits the initial key set, before any workers run.
    ///
    /// Seeds count against `max_keys` like any other admission. Rather
    /// than silently truncating an oversized seed list, this fails up
    /// front so the misconfiguration is visible.
    ///
    /// Returns the number of seeds admitted (duplicates within the seed
    /// list are admitted once).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SeedsExceedCap`] if the distinct seed keys
    /// alone exceed `max_keys`.
    pub async fn seed<I>(&self, seeds: I) -> Result<usize, ConfigError>
    where
        I: IntoIterator<Item = K>,
    {
        let distinct: Vec<K> = {
            let mut dedup = HashSet::new();
            seeds.into_iter().filter(|k| dedup.insert(k.clone())).collect()
        };
        if distinct.len() > self.max_keys {
            return Err(ConfigError::SeedsExceedCap {
                seeds: distinct.len(),
                max_keys: self.max_keys,
            });
        }

        let mut admitted = 0;
        for key in distinct {
            if self.try_admit(key).await {
                admitted += 1;
            }
        }
        Ok(admitted)
    }

    /// Admits `key` if it has not been seen and the cap has room.
    ///
    /// Returns true if the key was enqueued. Returns false for
    /// duplicates, for keys arriving after the cap is reached, and for
    /// keys discovered after the queue has been closed (shutdown).
    pub async fn try_admit(&self, key: K) -> bool {
        {
            let mut seen = self.seen.lock().expect("frontier mutex poisoned");
            if seen.len() >= self.max_keys || seen.contains(&key) {
                return false;
            }
            seen.insert(key.clone());
        }

        // Outside the critical section: the key is already claimed in
        // `seen`, so a racing duplicate cannot be admitted regardless of
        // enqueue order. May suspend on queue backpressure.
        if self.queue.send(key).await.is_err() {
            debug!("frontier queue closed, admitted key dropped");
            return false;
        }
        true
    }

    /// Returns the number of keys admitted so far.
    pub fn seen_count(&self) -> usize {
        self.seen.lock().expect("frontier mutex poisoned").len()
    }

    /// Returns how many more keys can be admitted.
    pub fn remaining_capacity(&self) -> usize {
        self.max_keys - self.seen_count()
    }

    /// Returns the configured admission cap.
    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    /// Returns the underlying pending-work queue.
    pub fn queue(&self) -> &Arc<BoundedQueue<K>> {
        &self.queue
    }
}

impl<K> std::fmt::Debug for Frontier<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frontier")
            .field("seen", &self.seen.lock().expect("frontier mutex poisoned").len())
            .field("max_keys", &self.max_keys)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Recv;

    fn frontier(max_keys: usize) -> Frontier<String> {
        Frontier::new(Arc::new(BoundedQueue::new(0)), max_keys).unwrap()
    }

    #[test]
    fn rejects_zero_cap() {
        let err = Frontier::<String>::new(Arc::new(BoundedQueue::new(0)), 0).unwrap_err();
        assert_eq!(err, ConfigError::ZeroMaxKeys);
    }

    #[tokio::test]
    async fn admits_each_key_once() {
        let frontier = frontier(10);
        assert!(frontier.try_admit("a".into()).await);
        assert!(frontier.try_admit("b".into()).await);
        assert!(!frontier.try_admit("a".into()).await);
        assert_eq!(frontier.seen_count(), 2);
        assert_eq!(frontier.queue().len(), 2);
    }

    #[tokio::test]
    async fn cap_stops_admissions() {
        let frontier = frontier(3);
        for key in ["a", "b", "c"] {
            assert!(frontier.try_admit(key.into()).await);
        }
        assert!(!frontier.try_admit("d".into()).await);
        assert_eq!(frontier.seen_count(), 3);
        assert_eq!(frontier.remaining_capacity(), 0);
    }

    #[tokio::test]
    async fn seed_within_cap() {
        let frontier = frontier(5);
        let admitted = frontier
            .seed(["a".to_string(), "b".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(admitted, 2);
        assert_eq!(frontier.seen_count(), 2);
    }

    #[tokio::test]
    async fn oversized_seed_list_is_a_config_error() {
        let frontier = frontier(2);
        let err = frontier
            .seed(["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::SeedsExceedCap {
                seeds: 3,
                max_keys: 2
            }
        );
        // Nothing was admitted: the check happens before any mutation.
        assert_eq!(frontier.seen_count(), 0);
    }

    #[tokio::test]
    async fn closed_queue_admission_returns_false() {
        let frontier = frontier(10);
        frontier.queue().close();
        assert!(!frontier.try_admit("late".into()).await);
    }

    /// Concurrent admission property: overlapping key sets from many
    /// tasks admit each distinct key exactly once, never exceeding the
    /// cap.
    #[tokio::test]
    async fn concurrent_admits_are_exactly_once() {
        const TASKS: usize = 8;
        const KEYS: usize = 50;
        const CAP: usize = 40;

        let frontier = Arc::new(
            Frontier::new(Arc::new(BoundedQueue::new(0)), CAP).unwrap(),
        );

        let mut tasks = Vec::new();
        for _ in 0..TASKS {
            let frontier = Arc::clone(&frontier);
            tasks.push(tokio::spawn(async move {
                let mut wins = 0;
                for i in 0..KEYS {
                    if frontier.try_admit(format!("key-{i}")).await {
                        wins += 1;
                    }
                }
                wins
            }));
        }

        let mut total_wins = 0;
        for task in tasks {
            total_wins += task.await.unwrap();
        }

        // 50 distinct keys contended for 40 slots: exactly 40 admitted,
        // once each, across all tasks.
        assert_eq!(total_wins, CAP);
        assert_eq!(frontier.seen_count(), CAP);

        let queue = frontier.queue();
        queue.close();
        let mut enqueued = HashSet::new();
        loop {
            match queue.recv().await {
                Recv::Item(key) => {
                    assert!(enqueued.insert(key), "key enqueued twice");
                }
                Recv::Closed => break,
                Recv::Cancelled => unreachable!(),
            }
        }
        assert_eq!(enqueued.len(), CAP);
    }
}
