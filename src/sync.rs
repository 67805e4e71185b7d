//! Batch refresh of subscribed feeds.
//!
//! A batch loads the store once, fetches and merges every requested feed
//! concurrently, optionally downloads missing thumbnails, and saves once at
//! the very end. Any failure aborts the whole batch before the save, and so
//! does dropping the future (e.g. on Ctrl-C): the file on disk then still
//! holds the state from before the batch.
//!
//! Concurrency is cooperative: every feed's fetch-and-merge is a future
//! polled together via `try_join_all`, each holding a disjoint `&mut` to its
//! own feed. The only shared state is the gateway's semaphore and the
//! identity pool.

use futures::future::try_join_all;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::feed::{channel_feed_url, find_feed_address, merge, parse_feed, MergeStats};
use crate::gateway::{ContentKind, FetchError, FetchGateway};
use crate::identity::{Credential, IdentityError, IdentityPool};
use crate::storage::{AssetCache, Entry, StoreError, SubscriptionStore, Subscriptions};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to refresh feed {feed_id}: {source}")]
    FeedFetch {
        feed_id: String,
        #[source]
        source: FetchError,
    },

    #[error("Failed to fetch asset {url}: {source}")]
    AssetFetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Failed to write cached asset '{}': {source}", path.display())]
    AssetWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Already subscribed to {0}")]
    AlreadySubscribed(String),

    #[error("Not subscribed to feed {0}")]
    UnknownFeed(String),
}

impl SyncError {
    /// Network failures are worth offering the user a retry for; everything
    /// else (corrupt store, entropy, disk) is not.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            SyncError::FeedFetch { .. } | SyncError::AssetFetch { .. } | SyncError::Fetch(_)
        )
    }
}

/// How identities are assigned within one batch when routing through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityMode {
    /// One credential for every request in the batch
    #[default]
    Shared,
    /// A fresh credential from the pool for every request
    PerFeed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub route_through_proxy: bool,
    pub identity_mode: IdentityMode,
    pub fetch_assets: bool,
    pub feed_base_url: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            route_through_proxy: config.use_proxy,
            identity_mode: if config.identity_per_feed {
                IdentityMode::PerFeed
            } else {
                IdentityMode::Shared
            },
            fetch_assets: config.fetch_thumbnails,
            feed_base_url: config.feed_base_url.clone(),
        }
    }
}

/// Outcome of one refresh batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub feeds: usize,
    pub added: usize,
    pub updated: usize,
    pub assets_fetched: usize,
}

/// Drives subscription changes and refresh batches.
///
/// Every collaborator is passed in explicitly; nothing here is global.
pub struct Syncer {
    gateway: FetchGateway,
    identities: Arc<IdentityPool>,
    store: SubscriptionStore,
    assets: AssetCache,
    options: SyncOptions,
}

impl Syncer {
    pub fn new(
        gateway: FetchGateway,
        identities: Arc<IdentityPool>,
        store: SubscriptionStore,
        assets: AssetCache,
        options: SyncOptions,
    ) -> Self {
        Self {
            gateway,
            identities,
            store,
            assets,
            options,
        }
    }

    pub fn store(&self) -> &SubscriptionStore {
        &self.store
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Refreshes the feeds in `ids` as one batch and saves once.
    ///
    /// # Errors
    ///
    /// - [`SyncError::UnknownFeed`] if any id is not subscribed (checked
    ///   before any network I/O)
    /// - [`SyncError::FeedFetch`] / [`SyncError::AssetFetch`] on the first
    ///   network failure; the rest of the batch is abandoned
    /// - [`SyncError::Store`] if the store cannot be loaded or saved
    ///
    /// On error nothing is written.
    pub async fn refresh(&self, ids: &[String]) -> Result<SyncReport, SyncError> {
        let mut subs = self.store.load()?;
        let report = self.refresh_loaded(&mut subs, ids).await?;
        self.store.save(&subs)?;
        Ok(report)
    }

    /// Refreshes every subscribed feed as one batch.
    pub async fn refresh_all(&self) -> Result<SyncReport, SyncError> {
        let mut subs = self.store.load()?;
        let ids = subs.feed_ids();
        let report = self.refresh_loaded(&mut subs, &ids).await?;
        self.store.save(&subs)?;
        Ok(report)
    }

    async fn refresh_loaded(
        &self,
        subs: &mut Subscriptions,
        ids: &[String],
    ) -> Result<SyncReport, SyncError> {
        if let Some(missing) = ids.iter().find(|id| !subs.is_subscribed(id)) {
            return Err(SyncError::UnknownFeed(missing.clone()));
        }
        let batch: HashSet<&str> = ids.iter().map(String::as_str).collect();

        let shared = match (self.options.route_through_proxy, self.options.identity_mode) {
            (true, IdentityMode::Shared) => Some(self.identities.get_credential()?),
            _ => None,
        };

        let refreshes = subs
            .feeds_mut()
            .filter(|(id, _)| batch.contains(id.as_str()))
            .map(|(id, feed)| self.refresh_feed(id, feed, shared.clone()));
        let merged: Vec<MergeStats> = try_join_all(refreshes).await?;

        let mut report = SyncReport {
            feeds: merged.len(),
            added: merged.iter().map(|s| s.added).sum(),
            updated: merged.iter().map(|s| s.updated).sum(),
            assets_fetched: 0,
        };

        if self.options.fetch_assets {
            report.assets_fetched = self.fetch_missing_assets(subs, &batch, shared).await?;
        }

        tracing::info!(
            feeds = report.feeds,
            added = report.added,
            updated = report.updated,
            assets = report.assets_fetched,
            "Refresh batch complete"
        );
        Ok(report)
    }

    async fn refresh_feed(
        &self,
        feed_id: &str,
        feed: &mut Vec<Entry>,
        shared: Option<Arc<Credential>>,
    ) -> Result<MergeStats, SyncError> {
        let identity = self.identity_for_request(shared)?;
        let url = channel_feed_url(&self.options.feed_base_url, feed_id);

        let content = self
            .gateway
            .fetch(&url, identity.as_deref(), ContentKind::Bytes)
            .await
            .map_err(|source| SyncError::FeedFetch {
                feed_id: feed_id.to_owned(),
                source,
            })?;

        // Raw bytes: the document's own encoding declaration decides decoding
        let remote = match parse_feed(&content.into_bytes()) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(feed_id = %feed_id, error = %e, "Feed document malformed, treating as empty");
                Vec::new()
            }
        };

        let stats = merge(feed, remote);
        tracing::debug!(
            feed_id = %feed_id,
            added = stats.added,
            updated = stats.updated,
            "Merged feed"
        );
        Ok(stats)
    }

    async fn fetch_missing_assets(
        &self,
        subs: &mut Subscriptions,
        batch: &HashSet<&str>,
        shared: Option<Arc<Credential>>,
    ) -> Result<usize, SyncError> {
        let downloads = subs
            .feeds_mut()
            .filter(|(id, _)| batch.contains(id.as_str()))
            .flat_map(|(_, feed)| feed.iter_mut())
            .filter(|entry| entry.cached_asset_path.is_none() && !entry.asset_url.is_empty())
            .map(|entry| self.fetch_asset(entry, shared.clone()));

        let fetched = try_join_all(downloads).await?;
        Ok(fetched.len())
    }

    async fn fetch_asset(
        &self,
        entry: &mut Entry,
        shared: Option<Arc<Credential>>,
    ) -> Result<(), SyncError> {
        let identity = self.identity_for_request(shared)?;
        let bytes = self
            .gateway
            .fetch(&entry.asset_url, identity.as_deref(), ContentKind::Bytes)
            .await
            .map_err(|source| SyncError::AssetFetch {
                url: entry.asset_url.clone(),
                source,
            })?
            .into_bytes();

        let path = self
            .assets
            .store(entry, bytes)
            .await
            .map_err(|source| SyncError::AssetWrite {
                path: self.assets.path_for(entry),
                source,
            })?;
        entry.cached_asset_path = Some(path);
        Ok(())
    }

    /// `None` when not proxying; the batch credential in shared mode; a
    /// fresh one from the pool otherwise.
    fn identity_for_request(
        &self,
        shared: Option<Arc<Credential>>,
    ) -> Result<Option<Arc<Credential>>, IdentityError> {
        if !self.options.route_through_proxy {
            return Ok(None);
        }
        match self.options.identity_mode {
            IdentityMode::Shared => Ok(shared),
            IdentityMode::PerFeed => self.identities.get_credential().map(Some),
        }
    }

    // ========================================================================
    // Subscription Changes
    // ========================================================================

    /// Subscribes to `id` under `title`, saves, and optionally refreshes it.
    ///
    /// The subscription is saved before the refresh, so a failed refresh
    /// leaves an empty, subscribed feed; the caller decides whether to retry
    /// or unsubscribe.
    pub async fn subscribe(
        &self,
        id: &str,
        title: &str,
        refresh: bool,
    ) -> Result<Option<SyncReport>, SyncError> {
        let mut subs = self.store.load()?;
        if subs.is_subscribed(id) {
            return Err(SyncError::AlreadySubscribed(id.to_owned()));
        }
        subs.add(id, title)?;
        self.store.save(&subs)?;
        tracing::info!(feed_id = %id, title = %title, "Subscribed");

        if !refresh {
            return Ok(None);
        }
        self.refresh(&[id.to_owned()]).await.map(Some)
    }

    /// Removes the subscription titled `title` and deletes its cached assets.
    ///
    /// Returns `false` (and writes nothing) if no such subscription exists.
    pub async fn unsubscribe_by_title(&self, title: &str) -> Result<bool, SyncError> {
        let mut subs = self.store.load()?;
        let Some(removed) = subs.remove_by_title(title) else {
            return Ok(false);
        };
        self.store.save(&subs)?;

        let freed = self.assets.remove_feed_assets(&removed).await;
        tracing::info!(title = %title, entries = removed.len(), assets = freed, "Unsubscribed");
        Ok(true)
    }

    /// Feed document address for a channel id under the configured base.
    pub fn feed_address(&self, channel_id: &str) -> String {
        channel_feed_url(&self.options.feed_base_url, channel_id)
    }

    /// Fetches a source page and returns the feed address it advertises.
    pub async fn resolve_feed_address(&self, page_url: &str) -> Result<Option<String>, SyncError> {
        let shared = match (self.options.route_through_proxy, self.options.identity_mode) {
            (true, IdentityMode::Shared) => Some(self.identities.get_credential()?),
            _ => None,
        };
        let identity = self.identity_for_request(shared)?;
        let html = self
            .gateway
            .fetch(page_url, identity.as_deref(), ContentKind::Text)
            .await?
            .into_text();
        Ok(find_feed_address(&html, page_url))
    }
}
