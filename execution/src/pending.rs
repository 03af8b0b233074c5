//! Single-shot response slots keyed by request id.

use std::fmt::Display;
use std::hash::Hash;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::ExecutionError;

/// Requests waiting for their response
///
/// Each slot accepts one value; anything arriving for a key that is not
/// pending is reported back to the caller so it can be logged and dropped.
pub(crate) struct PendingResponses<K, V> {
    slots: DashMap<K, Sender<V>>,
}

impl<K, V> PendingResponses<K, V>
where
    K: Eq + Hash + Clone + Display,
{
    pub(crate) fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Opens a slot; it is closed again when the returned handle is dropped
    pub(crate) fn register(&self, key: K) -> Result<PendingResponse<'_, K, V>, ExecutionError> {
        let (sender, receiver) = bounded(1);
        match self.slots.entry(key.clone()) {
            Entry::Occupied(_) => return Err(ExecutionError::DuplicateRequest(key.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(sender);
            }
        }
        Ok(PendingResponse {
            table: self,
            key,
            receiver,
        })
    }

    /// Delivers `value` to the waiter for `key`; false if nobody is waiting
    pub(crate) fn complete(&self, key: &K, value: V) -> bool {
        match self.slots.remove(key) {
            Some((_, sender)) => sender.try_send(value).is_ok(),
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

pub(crate) struct PendingResponse<'a, K, V>
where
    K: Eq + Hash + Clone + Display,
{
    table: &'a PendingResponses<K, V>,
    key: K,
    receiver: Receiver<V>,
}

impl<K, V> PendingResponse<'_, K, V>
where
    K: Eq + Hash + Clone + Display,
{
    pub(crate) fn wait(&self, timeout: Duration) -> Option<V> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

impl<K, V> Drop for PendingResponse<'_, K, V>
where
    K: Eq + Hash + Clone + Display,
{
    fn drop(&mut self) {
        self.table.slots.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_value_reaches_waiter() {
        let table = Arc::new(PendingResponses::<String, u32>::new());
        let pending = table.register("a".to_string()).unwrap();

        let completer = Arc::clone(&table);
        let handle = thread::spawn(move || completer.complete(&"a".to_string(), 7));

        assert_eq!(pending.wait(Duration::from_secs(5)), Some(7));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_slot_is_removed_on_drop() {
        let table = PendingResponses::<String, u32>::new();
        {
            let pending = table.register("a".to_string()).unwrap();
            assert_eq!(table.len(), 1);
            assert_eq!(pending.wait(Duration::from_millis(10)), None);
        }
        assert_eq!(table.len(), 0);
        assert!(!table.complete(&"a".to_string(), 1));
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        let table = PendingResponses::<String, u32>::new();
        let _first = table.register("a".to_string()).unwrap();
        assert!(matches!(
            table.register("a".to_string()),
            Err(ExecutionError::DuplicateRequest(_))
        ));
    }

    #[test]
    fn test_second_completion_is_discarded() {
        let table = PendingResponses::<String, u32>::new();
        let pending = table.register("a".to_string()).unwrap();
        assert!(table.complete(&"a".to_string(), 1));
        assert!(!table.complete(&"a".to_string(), 2));
        assert_eq!(pending.wait(Duration::from_secs(1)), Some(1));
    }

    #[test]
    fn test_other_keys_are_unaffected_by_timeout() {
        let table = PendingResponses::<String, u32>::new();
        let slow = table.register("slow".to_string()).unwrap();
        let fast = table.register("fast".to_string()).unwrap();

        assert_eq!(slow.wait(Duration::from_millis(10)), None);
        drop(slow);

        assert!(table.complete(&"fast".to_string(), 3));
        assert_eq!(fast.wait(Duration::from_secs(1)), Some(3));
    }
}
