use std::collections::HashSet;

use crate::message::{DedupKey, Message};

/// Keys of every message seen in the active conversation, from any channel.
///
/// Grows on push delivery and local sends; only ever shrinks through
/// [`DedupCache::rebuild`] or [`DedupCache::clear`] on a peer switch.
#[derive(Debug, Default)]
pub struct DedupCache {
    keys: HashSet<DedupKey>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache with the keys of `messages`.
    pub fn rebuild<'a>(&mut self, messages: impl IntoIterator<Item = &'a Message>) {
        self.keys = messages.into_iter().map(Message::dedup_key).collect();
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    /// Returns `true` when the key was not present before.
    pub fn insert(&mut self, key: DedupKey) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::normalize;
    use serde_json::json;

    fn msg(content: &str, ts: &str) -> Message {
        normalize(&json!({"senderId": 1, "receiverId": 2, "content": content, "timestamp": ts}))
    }

    #[test]
    fn insert_reports_novelty() {
        let mut cache = DedupCache::new();
        assert!(cache.insert(msg("a", "T1").dedup_key()));
        assert!(!cache.insert(msg("a", "T1").dedup_key()));
        assert!(cache.insert(msg("a", "T2").dedup_key()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn rebuild_discards_previous_keys() {
        let mut cache = DedupCache::new();
        cache.insert(msg("stale", "T0").dedup_key());

        let loaded = vec![msg("a", "T1"), msg("b", "T2")];
        cache.rebuild(&loaded);

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&msg("stale", "T0").dedup_key()));
        assert!(cache.contains(&msg("b", "T2").dedup_key()));

        cache.clear();
        assert!(cache.is_empty());
    }
}
