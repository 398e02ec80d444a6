//! Append-only index of excerpts keyed by topic name.
//!
//! Lives independently of the message store: excerpts stay here after the
//! turn they came from has been evicted. There is no size bound.

use super::parse::TopicExcerpts;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Topic index handle shared with background anatomization tasks
pub type SharedTopicIndex = Arc<RwLock<TopicIndex>>;

#[derive(Debug, Clone, Default)]
pub struct TopicIndex {
    topics: IndexMap<String, Vec<String>>,
    excerpt_count: usize,
}

impl TopicIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedTopicIndex {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Append each topic's excerpts, creating topics as needed.
    /// Returns the number of excerpts added.
    pub fn merge(&mut self, parsed: TopicExcerpts) -> usize {
        let mut added = 0;
        for (topic, excerpts) in parsed {
            added += excerpts.len();
            self.topics.entry(topic).or_default().extend(excerpts);
        }
        self.excerpt_count += added;
        added
    }

    /// Topic names in first-seen order
    pub fn topic_names(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    pub fn excerpts(&self, topic: &str) -> Option<&[String]> {
        self.topics.get(topic).map(Vec::as_slice)
    }

    /// Excerpts for the given topics, in the order requested. Unknown names
    /// contribute nothing; repeated names are gathered once.
    pub fn gather<S: AsRef<str>>(&self, topics: &[S]) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        topics
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| seen.insert(*name))
            .filter_map(|name| self.topics.get(name))
            .flat_map(|excerpts| excerpts.iter().cloned())
            .collect()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Total excerpts across all topics
    pub fn excerpt_count(&self) -> usize {
        self.excerpt_count
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn excerpts(pairs: &[(&str, &[&str])]) -> TopicExcerpts {
        pairs
            .iter()
            .map(|(topic, items)| {
                (
                    topic.to_string(),
                    items.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_merge_creates_and_extends() {
        let mut index = TopicIndex::new();
        assert_eq!(index.merge(excerpts(&[("billing", &["invoice overdue"])])), 1);
        assert_eq!(
            index.merge(excerpts(&[
                ("shipping", &["parcel left depot", "eta friday"]),
                ("billing", &["card declined"]),
            ])),
            3
        );

        assert_eq!(index.topic_names(), vec!["billing", "shipping"]);
        assert_eq!(
            index.excerpts("billing").unwrap(),
            &["invoice overdue".to_string(), "card declined".to_string()]
        );
        assert_eq!(index.excerpt_count(), 4);
    }

    #[test]
    fn test_merge_keeps_duplicates() {
        let mut index = TopicIndex::new();
        index.merge(excerpts(&[("food", &["pasta"])]));
        index.merge(excerpts(&[("food", &["pasta"])]));
        assert_eq!(index.excerpts("food").unwrap().len(), 2);
    }

    #[test]
    fn test_excerpt_count_never_decreases() {
        let mut index = TopicIndex::new();
        let mut last = 0;
        for batch in [
            excerpts(&[("a", &["1", "2"])]),
            excerpts(&[("b", &[])]),
            excerpts(&[]),
            excerpts(&[("a", &["3"]), ("c", &["4"])]),
        ] {
            index.merge(batch);
            assert!(index.excerpt_count() >= last);
            last = index.excerpt_count();
        }
        assert_eq!(last, 4);
        assert_eq!(index.topic_count(), 3);
    }

    #[test]
    fn test_gather_requested_topics_only() {
        let mut index = TopicIndex::new();
        index.merge(excerpts(&[
            ("billing", &["invoice overdue"]),
            ("shipping", &["parcel left depot", "eta friday"]),
        ]));

        assert_eq!(
            index.gather(&["shipping"]),
            vec!["parcel left depot", "eta friday"]
        );
        assert_eq!(
            index.gather(&["unknown", "billing", "billing"]),
            vec!["invoice overdue"]
        );
        assert!(index.gather::<&str>(&[]).is_empty());
    }
}
