// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Subscription tree with copy-on-write updates.
//!
//! The tree is a trie keyed by `/`-separated filter levels. The published
//! root lives in an atomic shared pointer: matching loads a snapshot and
//! walks it without any lock, while writers serialize on a mutex, rewrite
//! only the touched path (shared subtrees stay shared by reference count)
//! and install the new root atomically. A reader never observes a torn
//! tree; it merely keeps using the snapshot it started with.

use arc_swap::ArcSwap;
use codec::{QoS, SubTopic, SubscribePattern, TopicPart};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One level of the subscription trie.
///
/// Subscribers are stored at the node a filter's last level ends on, keyed
/// by client id. Sessions are referenced by value on purpose: a session
/// that disappears leaves at most a stale id behind, which fan-out skips,
/// so tree and session table cannot keep each other alive.
#[derive(Debug, Default, Clone)]
pub struct TrieNode {
    /// Literal children, keyed by level string.
    children: HashMap<String, Arc<TrieNode>>,

    /// Child behind a `+` level.
    single_wildcard: Option<Arc<TrieNode>>,

    /// Child behind a trailing `#` level.
    multi_wildcard: Option<Arc<TrieNode>>,

    /// (client id, granted QoS) pairs subscribed exactly here.
    subscribers: HashMap<String, QoS>,
}

impl TrieNode {
    fn insert(&mut self, parts: &[TopicPart], client_id: &str, qos: QoS) {
        match parts.first() {
            None => {
                self.subscribers.insert(client_id.to_string(), qos);
            }
            Some(TopicPart::Normal(level)) => {
                let child = self
                    .children
                    .entry(level.clone())
                    .or_insert_with(|| Arc::new(Self::default()));
                Arc::make_mut(child).insert(&parts[1..], client_id, qos);
            }
            Some(TopicPart::SingleWildcard) => {
                let child = self
                    .single_wildcard
                    .get_or_insert_with(|| Arc::new(Self::default()));
                Arc::make_mut(child).insert(&parts[1..], client_id, qos);
            }
            Some(TopicPart::MultiWildcard) => {
                let child = self
                    .multi_wildcard
                    .get_or_insert_with(|| Arc::new(Self::default()));
                Arc::make_mut(child).insert(&parts[1..], client_id, qos);
            }
        }
    }

    fn remove(&mut self, parts: &[TopicPart], client_id: &str) {
        match parts.first() {
            None => {
                self.subscribers.remove(client_id);
            }
            Some(TopicPart::Normal(level)) => {
                if let Some(child) = self.children.get_mut(level) {
                    let node = Arc::make_mut(child);
                    node.remove(&parts[1..], client_id);
                    if node.is_empty() {
                        self.children.remove(level);
                    }
                }
            }
            Some(TopicPart::SingleWildcard) => {
                if let Some(child) = &mut self.single_wildcard {
                    let node = Arc::make_mut(child);
                    node.remove(&parts[1..], client_id);
                    if node.is_empty() {
                        self.single_wildcard = None;
                    }
                }
            }
            Some(TopicPart::MultiWildcard) => {
                if let Some(child) = &mut self.multi_wildcard {
                    let node = Arc::make_mut(child);
                    node.remove(&parts[1..], client_id);
                    if node.is_empty() {
                        self.multi_wildcard = None;
                    }
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
            && self.children.is_empty()
            && self.single_wildcard.is_none()
            && self.multi_wildcard.is_none()
    }

    /// Collect every subscriber whose filter matches `topic`.
    ///
    /// A session reachable through several filters is reported once with
    /// the highest granted QoS.
    #[must_use]
    pub fn matches(&self, topic: &str) -> HashMap<String, QoS> {
        let levels: Vec<&str> = topic.split('/').collect();
        // Topics starting with `$` are not matched by wildcards at the
        // root level [MQTT-4.7.2-1].
        let reserved_root = topic.starts_with('$');
        let mut found = HashMap::new();
        self.collect(&levels, 0, reserved_root, &mut found);
        found
    }

    fn collect(
        &self,
        levels: &[&str],
        depth: usize,
        reserved_root: bool,
        found: &mut HashMap<String, QoS>,
    ) {
        let wildcards_allowed = !(reserved_root && depth == 0);

        // `#` matches the remaining levels, including none at all
        // [MQTT-4.7.1-2].
        if wildcards_allowed {
            if let Some(multi) = &self.multi_wildcard {
                Self::merge(found, &multi.subscribers);
            }
        }

        if depth == levels.len() {
            Self::merge(found, &self.subscribers);
            return;
        }

        if let Some(child) = self.children.get(levels[depth]) {
            child.collect(levels, depth + 1, reserved_root, found);
        }
        if wildcards_allowed {
            if let Some(single) = &self.single_wildcard {
                single.collect(levels, depth + 1, reserved_root, found);
            }
        }
    }

    fn merge(found: &mut HashMap<String, QoS>, subscribers: &HashMap<String, QoS>) {
        for (client_id, qos) in subscribers {
            found
                .entry(client_id.clone())
                .and_modify(|granted| *granted = (*granted).max(*qos))
                .or_insert(*qos);
        }
    }
}

/// Publishes tree snapshots to readers and serializes writers.
#[derive(Debug)]
pub struct SubscriptionTreeManager {
    current: ArcSwap<TrieNode>,
    write_lock: Mutex<()>,
}

impl Default for SubscriptionTreeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionTreeManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(TrieNode::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the currently published tree. The snapshot stays valid and
    /// immutable for as long as the caller holds it.
    #[must_use]
    pub fn snapshot(&self) -> Arc<TrieNode> {
        self.current.load_full()
    }

    /// Insert one subscription, replacing the granted QoS if the filter is
    /// already present for that client.
    pub fn subscribe(&self, client_id: &str, pattern: &SubscribePattern) {
        let _guard = self.write_lock.lock().expect("tree writer lock poisoned");
        let mut root = self.current.load_full();
        Arc::make_mut(&mut root).insert(pattern.topic().parts(), client_id, pattern.qos());
        self.current.store(root);
    }

    /// Remove one subscription, pruning empty branches.
    pub fn unsubscribe(&self, client_id: &str, topic: &SubTopic) {
        let _guard = self.write_lock.lock().expect("tree writer lock poisoned");
        let mut root = self.current.load_full();
        Arc::make_mut(&mut root).remove(topic.parts(), client_id);
        self.current.store(root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(filter: &str, qos: QoS) -> SubscribePattern {
        SubscribePattern::parse(filter, qos).unwrap()
    }

    #[test]
    fn test_match_wildcards() {
        let manager = SubscriptionTreeManager::new();
        manager.subscribe("a", &pattern("sport/#", QoS::AtMostOnce));
        manager.subscribe("b", &pattern("sport/+/player1", QoS::AtMostOnce));

        let tree = manager.snapshot();

        let found = tree.matches("sport/tennis/player1");
        assert_eq!(found.len(), 2);
        assert!(found.contains_key("a"));
        assert!(found.contains_key("b"));

        let found = tree.matches("sport/tennis/wimbledon/player1");
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("a"));

        // `#` includes the parent level itself.
        let found = tree.matches("sport");
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("a"));
    }

    #[test]
    fn test_snapshot_isolation() {
        let manager = SubscriptionTreeManager::new();
        let before = manager.snapshot();

        manager.subscribe("a", &pattern("sport/tennis/#", QoS::AtMostOnce));

        // The old snapshot is frozen; a fresh one sees the write.
        assert!(before.matches("sport/tennis/wimbledon/player1").is_empty());
        let after = manager.snapshot();
        assert_eq!(after.matches("sport/tennis/wimbledon/player1").len(), 1);
    }

    #[test]
    fn test_highest_qos_wins() {
        let manager = SubscriptionTreeManager::new();
        manager.subscribe("a", &pattern("sport/#", QoS::AtMostOnce));
        manager.subscribe("a", &pattern("sport/tennis", QoS::ExactOnce));

        let found = manager.snapshot().matches("sport/tennis");
        assert_eq!(found.len(), 1);
        assert_eq!(found["a"], QoS::ExactOnce);
    }

    #[test]
    fn test_requeued_qos_replaced() {
        let manager = SubscriptionTreeManager::new();
        manager.subscribe("a", &pattern("sport/tennis", QoS::AtMostOnce));
        manager.subscribe("a", &pattern("sport/tennis", QoS::AtLeastOnce));

        let found = manager.snapshot().matches("sport/tennis");
        assert_eq!(found["a"], QoS::AtLeastOnce);
    }

    #[test]
    fn test_unsubscribe_prunes() {
        let manager = SubscriptionTreeManager::new();
        let p = pattern("sport/tennis/player1/#", QoS::AtMostOnce);
        manager.subscribe("a", &p);
        manager.unsubscribe("a", p.topic());

        let tree = manager.snapshot();
        assert!(tree.matches("sport/tennis/player1/ranking").is_empty());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_reserved_topics_need_literal_root() {
        let manager = SubscriptionTreeManager::new();
        manager.subscribe("a", &pattern("#", QoS::AtMostOnce));
        manager.subscribe("b", &pattern("+/broker", QoS::AtMostOnce));
        manager.subscribe("c", &pattern("$SYS/#", QoS::AtMostOnce));

        let found = manager.snapshot().matches("$SYS/broker");
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("c"));

        let found = manager.snapshot().matches("any/broker");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_empty_levels_are_distinct() {
        let manager = SubscriptionTreeManager::new();
        manager.subscribe("a", &pattern("sport//tennis", QoS::AtMostOnce));

        let tree = manager.snapshot();
        assert_eq!(tree.matches("sport//tennis").len(), 1);
        assert!(tree.matches("sport/tennis").is_empty());
    }

    #[test]
    fn test_structural_sharing() {
        let manager = SubscriptionTreeManager::new();
        manager.subscribe("a", &pattern("sport/tennis/#", QoS::AtMostOnce));
        manager.subscribe("b", &pattern("finance/stocks", QoS::AtMostOnce));
        let before = manager.snapshot();

        // Touching one branch must not rebuild the other.
        manager.subscribe("c", &pattern("finance/bonds", QoS::AtMostOnce));
        let after = manager.snapshot();

        let sport_before = &before.children["sport"];
        let sport_after = &after.children["sport"];
        assert!(Arc::ptr_eq(sport_before, sport_after));
    }
}
