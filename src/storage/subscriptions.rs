use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{Entry, FeedSummary, StoreError};

/// The whole persisted state: every feed plus the bidirectional
/// title ↔ id index.
///
/// All fields are required on load. Every id in the index has exactly one
/// feed and exactly one title, and vice versa; [`validate`](Self::validate)
/// checks this and the mutators preserve it.
///
/// Mutations here are in-memory only. Callers persist through
/// [`SubscriptionStore::save`](super::SubscriptionStore::save).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriptions {
    feeds: BTreeMap<String, Vec<Entry>>,
    #[serde(rename = "idToTitle")]
    id_to_title: BTreeMap<String, String>,
    #[serde(rename = "titleToId")]
    title_to_id: BTreeMap<String, String>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.id_to_title.contains_key(id)
    }

    pub fn id_for_title(&self, title: &str) -> Option<&str> {
        self.title_to_id.get(title).map(String::as_str)
    }

    pub fn title_for_id(&self, id: &str) -> Option<&str> {
        self.id_to_title.get(id).map(String::as_str)
    }

    pub fn feed(&self, id: &str) -> Option<&[Entry]> {
        self.feeds.get(id).map(Vec::as_slice)
    }

    /// Subscribed ids in sorted order.
    pub fn feed_ids(&self) -> Vec<String> {
        self.feeds.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Unseen/total counts per feed, ordered by title.
    pub fn summaries(&self) -> Vec<FeedSummary> {
        self.title_to_id
            .iter()
            .map(|(title, id)| {
                let feed = self.feeds.get(id).map(Vec::as_slice).unwrap_or_default();
                FeedSummary {
                    id: id.clone(),
                    title: title.clone(),
                    unseen: feed.iter().filter(|e| !e.seen).count(),
                    total: feed.len(),
                }
            })
            .collect()
    }

    /// Mutable access to the feeds, one disjoint borrow per feed. Refresh
    /// tasks each take their own feed from this iterator.
    pub(crate) fn feeds_mut(&mut self) -> impl Iterator<Item = (&String, &mut Vec<Entry>)> {
        self.feeds.iter_mut()
    }

    pub(crate) fn feed_mut(&mut self, id: &str) -> Result<&mut Vec<Entry>, StoreError> {
        self.feeds
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownFeed(id.to_owned()))
    }

    /// Checks that the index is a bijection and matches the feed keys.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.id_to_title.len() != self.title_to_id.len() {
            return Err(StoreError::InconsistentIndex(format!(
                "{} ids but {} titles",
                self.id_to_title.len(),
                self.title_to_id.len()
            )));
        }
        for (id, title) in &self.id_to_title {
            if self.title_to_id.get(title) != Some(id) {
                return Err(StoreError::InconsistentIndex(format!(
                    "title '{title}' does not map back to id {id}"
                )));
            }
            if !self.feeds.contains_key(id) {
                return Err(StoreError::InconsistentIndex(format!(
                    "id {id} has no feed"
                )));
            }
        }
        if let Some(orphan) = self.feeds.keys().find(|id| !self.id_to_title.contains_key(*id)) {
            return Err(StoreError::InconsistentIndex(format!(
                "feed {orphan} has no title"
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Subscription Management
    // ========================================================================

    /// Adds an empty feed for `id` under `title`.
    ///
    /// This does not check for an existing subscription on the caller's
    /// behalf beyond rejecting the duplicate: callers are expected to test
    /// [`is_subscribed`](Self::is_subscribed) first.
    ///
    /// # Errors
    ///
    /// - [`StoreError::DuplicateId`] if `id` is already subscribed
    /// - [`StoreError::DuplicateTitle`] if another id already uses `title`
    pub fn add(&mut self, id: &str, title: &str) -> Result<(), StoreError> {
        if self.id_to_title.contains_key(id) || self.feeds.contains_key(id) {
            return Err(StoreError::DuplicateId(id.to_owned()));
        }
        if self.title_to_id.contains_key(title) {
            return Err(StoreError::DuplicateTitle(title.to_owned()));
        }

        self.feeds.insert(id.to_owned(), Vec::new());
        self.id_to_title.insert(id.to_owned(), title.to_owned());
        self.title_to_id.insert(title.to_owned(), id.to_owned());
        Ok(())
    }

    /// Removes the feed and both index entries for `id`.
    ///
    /// Returns the removed entries so the caller can free their cached
    /// assets, or `None` if `id` was not subscribed (a no-op).
    pub fn remove(&mut self, id: &str) -> Option<Vec<Entry>> {
        let title = self.id_to_title.remove(id)?;
        self.title_to_id.remove(&title);
        Some(self.feeds.remove(id).unwrap_or_default())
    }

    /// [`remove`](Self::remove) by title. Unknown titles are a no-op.
    pub fn remove_by_title(&mut self, title: &str) -> Option<Vec<Entry>> {
        let id = self.title_to_id.get(title)?.clone();
        self.remove(&id)
    }

    // ========================================================================
    // Read State
    // ========================================================================

    /// Marks every entry of the feed as seen.
    pub fn mark_all_read(&mut self, id: &str) -> Result<(), StoreError> {
        for entry in self.feed_mut(id)? {
            entry.seen = true;
        }
        Ok(())
    }

    /// If every entry is already seen, marks them all unseen; otherwise marks
    /// them all seen. Returns the new state.
    pub fn toggle_all_read(&mut self, id: &str) -> Result<bool, StoreError> {
        let feed = self.feed_mut(id)?;
        let all_seen = feed.iter().all(|e| e.seen);
        for entry in feed.iter_mut() {
            entry.seen = !all_seen;
        }
        Ok(!all_seen)
    }

    /// Flips one entry's `seen` flag and returns the new value.
    pub fn toggle_seen(&mut self, id: &str, entry_id: &str) -> Result<bool, StoreError> {
        let entry = self.entry_mut(id, entry_id)?;
        entry.seen = !entry.seen;
        Ok(entry.seen)
    }

    /// Applies a player's outcome: an unseen entry becomes seen only if
    /// playback succeeded. An already-seen entry stays seen.
    pub fn record_playback(
        &mut self,
        id: &str,
        entry_id: &str,
        succeeded: bool,
    ) -> Result<bool, StoreError> {
        let entry = self.entry_mut(id, entry_id)?;
        if !entry.seen {
            entry.seen = succeeded;
        }
        Ok(entry.seen)
    }

    fn entry_mut(&mut self, id: &str, entry_id: &str) -> Result<&mut Entry, StoreError> {
        self.feed_mut(id)?
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| StoreError::UnknownEntry {
                feed_id: id.to_owned(),
                entry_id: entry_id.to_owned(),
            })
    }
}
