//! Keyed table of pending asynchronous operations with per-entry expiry.
//!
//! Each entry owns a one-shot expiry timer. Whichever happens first wins:
//! [`CorrelationTable::take`] removes the entry and cancels its timer, or the
//! timer fires, removes the entry and hands it to the expiry callback. The
//! losing side finds nothing and does nothing.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::timer::TimerHandle;

struct Pending<V> {
    value: V,
    timer_id: u64,
    _timer: TimerHandle,
}

struct Inner<K, V> {
    entries: HashMap<K, Pending<V>>,
    next_timer_id: u64,
}

/// Pending operations keyed by correlation id.
pub struct CorrelationTable<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
}

impl<K, V> Default for CorrelationTable<K, V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                next_timer_id: 0,
            })),
        }
    }
}

impl<K, V> std::fmt::Debug for CorrelationTable<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("pending", &self.inner.lock().entries.len())
            .finish()
    }
}

impl<K, V> CorrelationTable<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key` and arms its expiry timer.
    ///
    /// When the timer wins, `on_expire` runs with the removed entry and no
    /// lock held. Returns the entry previously stored under `key`, whose
    /// timer is cancelled.
    pub fn insert<F>(&self, key: K, value: V, ttl: Duration, on_expire: F) -> Option<V>
    where
        F: FnOnce(K, V) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        inner.next_timer_id += 1;
        let timer_id = inner.next_timer_id;

        let table = Arc::downgrade(&self.inner);
        let expired_key = key.clone();
        let timer = TimerHandle::schedule(ttl, move || {
            if let Some(value) = Self::expire(&table, &expired_key, timer_id) {
                on_expire(expired_key, value);
            }
        });

        inner
            .entries
            .insert(
                key,
                Pending {
                    value,
                    timer_id,
                    _timer: timer,
                },
            )
            .map(|replaced| replaced.value)
    }

    fn expire(table: &Weak<Mutex<Inner<K, V>>>, key: &K, timer_id: u64) -> Option<V> {
        let table = table.upgrade()?;
        let mut inner = table.lock();
        if inner.entries.get(key)?.timer_id != timer_id {
            return None;
        }
        inner.entries.remove(key).map(|pending| pending.value)
    }

    /// Removes the entry and cancels its timer.
    pub fn take(&self, key: &K) -> Option<V> {
        self.inner
            .lock()
            .entries
            .remove(key)
            .map(|pending| pending.value)
    }

    /// Removes every entry and cancels every timer.
    pub fn drain(&self) -> Vec<(K, V)> {
        self.inner
            .lock()
            .entries
            .drain()
            .map(|(key, pending)| (key, pending.value))
            .collect()
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Expired = Arc<Mutex<Vec<(String, u32)>>>;

    fn recorder() -> (Expired, impl Fn() -> Box<dyn FnOnce(String, u32) + Send>) {
        let expired: Expired = Arc::default();
        let sink = Arc::clone(&expired);
        let make = move || -> Box<dyn FnOnce(String, u32) + Send> {
            let sink = Arc::clone(&sink);
            Box::new(move |key, value| sink.lock().push((key, value)))
        };
        (expired, make)
    }

    #[tokio::test(start_paused = true)]
    async fn take_before_expiry_cancels_timer() {
        let table: CorrelationTable<String, u32> = CorrelationTable::new();
        let (expired, on_expire) = recorder();
        table.insert("a".to_string(), 1, Duration::from_millis(50), on_expire());

        assert_eq!(table.take(&"a".to_string()), Some(1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(expired.lock().is_empty());
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_removes_entry_and_reports_it() {
        let table: CorrelationTable<String, u32> = CorrelationTable::new();
        let (expired, on_expire) = recorder();
        table.insert("a".to_string(), 7, Duration::from_millis(50), on_expire());

        tokio::time::sleep(Duration::from_millis(51)).await;
        assert_eq!(*expired.lock(), vec![("a".to_string(), 7)]);
        assert_eq!(table.take(&"a".to_string()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_an_entry_disarms_the_old_timer() {
        let table: CorrelationTable<String, u32> = CorrelationTable::new();
        let (expired, on_expire) = recorder();
        table.insert("a".to_string(), 1, Duration::from_millis(10), on_expire());
        let replaced = table.insert("a".to_string(), 2, Duration::from_millis(100), on_expire());
        assert_eq!(replaced, Some(1));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(expired.lock().is_empty());
        assert!(table.contains(&"a".to_string()));

        tokio::time::sleep(Duration::from_millis(51)).await;
        assert_eq!(*expired.lock(), vec![("a".to_string(), 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_cancels_everything() {
        let table: CorrelationTable<String, u32> = CorrelationTable::new();
        let (expired, on_expire) = recorder();
        for (i, key) in ["a", "b", "c"].into_iter().enumerate() {
            table.insert(key.to_string(), u32::try_from(i).unwrap(), Duration::from_millis(10), on_expire());
        }
        let mut drained = table.drain();
        drained.sort();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0], ("a".to_string(), 0));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(expired.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_table_silences_timers() {
        let (expired, on_expire) = recorder();
        {
            let table: CorrelationTable<String, u32> = CorrelationTable::new();
            table.insert("a".to_string(), 1, Duration::from_millis(10), on_expire());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(expired.lock().is_empty());
    }
}
