use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Store errors. Anything raised by [`load`](super::SubscriptionStore::load)
/// is fatal: no partial recovery is attempted.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store file could not be read or written
    #[error("Failed to access store file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON or a missing required key
    #[error("Store file is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),

    /// The title/id index and the feed map disagree
    #[error("Store index is inconsistent: {0}")]
    InconsistentIndex(String),

    /// The in-memory state could not be serialized; nothing was written
    #[error("Failed to serialize store: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Already subscribed to feed {0}")]
    DuplicateId(String),

    #[error("Title '{0}' is already used by another subscription")]
    DuplicateTitle(String),

    #[error("Not subscribed to feed {0}")]
    UnknownFeed(String),

    #[error("Feed {feed_id} has no entry {entry_id}")]
    UnknownEntry { feed_id: String, entry_id: String },
}

// ============================================================================
// Data Structures
// ============================================================================

/// One trackable item of a feed.
///
/// `id` is the stable external identity and the only field used to match a
/// fetched entry against a stored one. `seen` and `cached_asset_path` are
/// local state that the merge carries forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    pub link: String,
    pub title: String,
    pub asset_url: String,
    pub seen: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_asset_path: Option<PathBuf>,
}

impl Entry {
    /// A freshly fetched, unseen entry with nothing cached.
    pub fn new(
        id: impl Into<String>,
        link: impl Into<String>,
        title: impl Into<String>,
        asset_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            link: link.into(),
            title: title.into(),
            asset_url: asset_url.into(),
            seen: false,
            cached_asset_path: None,
        }
    }
}

/// Per-feed counts for listing subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSummary {
    pub id: String,
    pub title: String,
    pub unseen: usize,
    pub total: usize,
}

impl std::fmt::Display for FeedSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: ({}/{})", self.title, self.unseen, self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_json_field_names() {
        let mut entry = Entry::new("a", "https://x/a", "A", "https://x/a.jpg");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["assetUrl"], "https://x/a.jpg");
        assert!(json.get("cachedAssetPath").is_none());

        entry.cached_asset_path = Some(PathBuf::from("/tmp/a.jpg"));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["cachedAssetPath"], "/tmp/a.jpg");
    }

    #[test]
    fn test_entry_missing_required_key_rejected() {
        let json = r#"{"id":"a","link":"l","title":"t","seen":false}"#;
        assert!(serde_json::from_str::<Entry>(json).is_err());
    }

    #[test]
    fn test_feed_summary_display() {
        let summary = FeedSummary {
            id: "UC1".into(),
            title: "Channel".into(),
            unseen: 2,
            total: 5,
        };
        assert_eq!(summary.to_string(), "Channel: (2/5)");
    }
}
