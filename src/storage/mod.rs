//! Persistent subscription state.
//!
//! - [`Subscriptions`] - the whole state: feeds plus the title ↔ id index
//! - [`SubscriptionStore`] - whole-file JSON load/save
//! - [`AssetCache`] - where cached entry assets live on disk

mod assets;
mod store;
mod subscriptions;
mod types;

pub use assets::AssetCache;
pub use store::SubscriptionStore;
pub use subscriptions::Subscriptions;
pub use types::{Entry, FeedSummary, StoreError};
