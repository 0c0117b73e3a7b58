use std::collections::HashMap;
use std::hash::Hash;

use tokio::sync::oneshot;

/// Multi-waiter one-shot completions keyed by `K`.
///
/// Waiters for a key are kept in insertion order and are all fired together by the event
/// that satisfies the key.
#[derive(Debug)]
pub(crate) struct CallbackRegistry<K, T> {
    waiters: HashMap<K, Vec<oneshot::Sender<T>>>,
}

impl<K, T> Default for CallbackRegistry<K, T> {
    fn default() -> Self {
        Self {
            waiters: HashMap::new(),
        }
    }
}

impl<K, T> CallbackRegistry<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    /// Registers a waiter for `key`; the flag is true when it is the first waiter.
    pub(crate) fn add(&mut self, key: K) -> (oneshot::Receiver<T>, bool) {
        let (sender, receiver) = oneshot::channel();
        let waiters = self.waiters.entry(key).or_default();
        let is_first = waiters.is_empty();
        waiters.push(sender);
        (receiver, is_first)
    }

    /// Fires and removes every waiter for `key`, returning how many were fired.
    pub(crate) fn fire(&mut self, key: &K, value: &T) -> usize {
        let Some(waiters) = self.waiters.remove(key) else {
            return 0;
        };
        let count = waiters.len();
        for waiter in waiters {
            // A dropped receiver means the requester has gone away.
            let _ = waiter.send(value.clone());
        }
        count
    }

    /// Forgets waiters for `key` whose receivers have been dropped.
    pub(crate) fn discard_closed(&mut self, key: &K) {
        if let Some(waiters) = self.waiters.get_mut(key) {
            waiters.retain(|waiter| !waiter.is_closed());
            if waiters.is_empty() {
                self.waiters.remove(key);
            }
        }
    }

    /// Fires every waiter under every key with `value`.
    pub(crate) fn fail_all(&mut self, value: &T) -> usize {
        let mut count = 0;
        for (_key, waiters) in self.waiters.drain() {
            count += waiters.len();
            for waiter in waiters {
                let _ = waiter.send(value.clone());
            }
        }
        count
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn waiters_for_one_key_fire_together() {
        let mut registry: CallbackRegistry<&str, u8> = CallbackRegistry::default();
        let (first, first_is_new) = registry.add("svc");
        let (second, second_is_new) = registry.add("svc");
        let (other, other_is_new) = registry.add("other");

        assert!(first_is_new);
        assert!(!second_is_new);
        assert!(other_is_new);

        assert_eq!(2, registry.fire(&"svc", &7));
        assert_eq!(Ok(7), first.await);
        assert_eq!(Ok(7), second.await);
        assert_eq!(0, registry.fire(&"svc", &8));

        assert_eq!(1, registry.fail_all(&9));
        assert_eq!(Ok(9), other.await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn abandoned_waiters_are_discarded() {
        let mut registry: CallbackRegistry<u8, u8> = CallbackRegistry::default();
        let (abandoned, _) = registry.add(1);
        let (kept, _) = registry.add(1);
        drop(abandoned);

        registry.discard_closed(&1);
        assert_eq!(1, registry.fire(&1, &5));
        assert_eq!(Ok(5), kept.await);

        let (abandoned, _) = registry.add(2);
        drop(abandoned);
        registry.discard_closed(&2);
        assert!(registry.is_empty());
    }

    #[test]
    fn firing_with_dropped_receiver_is_harmless() {
        let mut registry: CallbackRegistry<u8, u8> = CallbackRegistry::default();
        let (receiver, _) = registry.add(1);
        drop(receiver);

        assert_eq!(1, registry.fire(&1, &0));
    }
}
