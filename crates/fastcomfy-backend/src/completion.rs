//! Correlation registry: opaque id to a single-resolution waiter.
//!
//! A submitter registers a [`Waiter`] for the id the backend returned, then
//! awaits it. The event consumer resolves the id when the completion event
//! arrives. Delivery is at most once: resolving an id with no waiter (not yet
//! registered, already timed out, or already resolved) drops the value.
//!
//! Entries never outlive their waiter. A timed-out or dropped [`Waiter`]
//! evicts its own entry.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use fastcomfy_core::{OutputDescriptor, PromptId};
use tokio::sync::oneshot;

/// Registry used for job completions.
pub type CompletionRegistry = CorrelationRegistry<PromptId, Vec<OutputDescriptor>>;

/// Why a wait ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// The timeout elapsed first.
    #[error("timed out")]
    TimedOut,
    /// The entry was replaced by a newer registration for the same id.
    #[error("waiter superseded")]
    Superseded,
}

struct Slot<V> {
    generation: u64,
    tx: oneshot::Sender<V>,
}

/// Concurrent map from correlation id to a one-shot delivery slot.
pub struct CorrelationRegistry<K, V> {
    pending: DashMap<K, Slot<V>>,
    next_generation: AtomicU64,
}

impl<K, V> Default for CorrelationRegistry<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            pending: DashMap::new(),
            next_generation: AtomicU64::new(0),
        }
    }
}

impl<K, V> CorrelationRegistry<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a waiter for `key`. A previous waiter for the same key is
    /// superseded.
    pub fn register(self: &Arc<Self>, key: K) -> Waiter<K, V> {
        let (tx, rx) = oneshot::channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let _ = self.pending.insert(key.clone(), Slot { generation, tx });
        Waiter {
            key,
            generation,
            rx,
            registry: Arc::clone(self),
        }
    }

    /// Deliver `value` to the waiter for `key`.
    ///
    /// Returns `false` when nobody was waiting; the value is dropped.
    pub fn resolve(&self, key: &K, value: V) -> bool {
        match self.pending.remove(key) {
            Some((_, slot)) => slot.tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Number of outstanding waiters.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no waiter is outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn evict(&self, key: &K, generation: u64) {
        let _ = self
            .pending
            .remove_if(key, |_, slot| slot.generation == generation);
    }
}

/// Pending side of a registration. Dropping it evicts the entry.
pub struct Waiter<K, V>
where
    K: Eq + Hash + Clone,
{
    key: K,
    generation: u64,
    rx: oneshot::Receiver<V>,
    registry: Arc<CorrelationRegistry<K, V>>,
}

impl<K, V> Waiter<K, V>
where
    K: Eq + Hash + Clone,
{
    /// The correlation id this waiter is registered under.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Wait up to `timeout` for the value.
    pub async fn wait(mut self, timeout: Duration) -> Result<V, WaitError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(WaitError::Superseded),
            Err(_) => Err(WaitError::TimedOut),
        }
    }
}

impl<K, V> Drop for Waiter<K, V>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        self.registry.evict(&self.key, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_once() {
        let registry = CompletionRegistry::new();
        let waiter = registry.register(PromptId::new("p-1"));
        assert_eq!(registry.len(), 1);

        let outputs = vec![OutputDescriptor::new("out.png", "")];
        assert!(registry.resolve(&PromptId::new("p-1"), outputs.clone()));
        assert!(!registry.resolve(&PromptId::new("p-1"), outputs.clone()));

        let got = waiter.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got, outputs);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn timeout_evicts_entry() {
        let registry = CompletionRegistry::new();
        let waiter = registry.register(PromptId::new("p-2"));
        let err = waiter.wait(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err, WaitError::TimedOut);
        assert!(registry.is_empty());
        // late completion finds nobody and is dropped
        assert!(!registry.resolve(&PromptId::new("p-2"), Vec::new()));
    }

    #[test]
    fn dropped_waiter_evicts_entry() {
        let registry = CorrelationRegistry::<String, u32>::new();
        let waiter = registry.register("k".to_string());
        drop(waiter);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn superseded_waiter_does_not_evict_successor() {
        let registry = CorrelationRegistry::<String, u32>::new();
        let first = registry.register("k".to_string());
        let second = registry.register("k".to_string());
        assert_eq!(
            first.wait(Duration::from_secs(1)).await.unwrap_err(),
            WaitError::Superseded
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve(&"k".to_string(), 7));
        assert_eq!(second.wait(Duration::from_secs(1)).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn concurrent_waiters_are_independent() {
        let registry = CorrelationRegistry::<u32, u32>::new();
        let waiters: Vec<_> = (0..16).map(|i| registry.register(i)).collect();
        let handles: Vec<_> = waiters
            .into_iter()
            .map(|w| tokio::spawn(w.wait(Duration::from_secs(2))))
            .collect();
        for i in (0..16).rev() {
            assert!(registry.resolve(&i, i * 10));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap().unwrap(), u32::try_from(i).unwrap() * 10);
        }
    }
}
