use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;

/// Snapshot helpers for `DashMap` that drop shard guards before returning.
///
/// Holding a `DashMap` guard while taking a channel lock inverts the store's
/// lock order (gate, channel, shard), so callers clone out
/// what they need first.
pub trait DashMapExt<K, V> {
    /// Clone the value for `key`.
    fn get_cloned<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone;

    /// Clone every value.
    fn values_cloned(&self) -> Vec<V>
    where
        V: Clone;

    /// Clone the keys of entries matching `pred`.
    fn keys_where<F>(&self, pred: F) -> Vec<K>
    where
        K: Clone,
        F: FnMut(&V) -> bool;
}

impl<K, V> DashMapExt<K, V> for DashMap<K, V>
where
    K: Eq + Hash,
{
    fn get_cloned<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.get(key).map(|r| r.value().clone())
    }

    fn values_cloned(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.iter().map(|e| e.value().clone()).collect()
    }

    fn keys_where<F>(&self, mut pred: F) -> Vec<K>
    where
        K: Clone,
        F: FnMut(&V) -> bool,
    {
        self.iter()
            .filter(|e| pred(e.value()))
            .map(|e| e.key().clone())
            .collect()
    }
}
