//! Subscription sync engine for channel feeds.
//!
//! Keeps a JSON store of subscribed feeds, refreshes them concurrently under
//! a global connection cap, and can route each request through a local SOCKS
//! proxy under rotating credentials so Tor isolates the streams.

pub mod config;
pub mod feed;
pub mod gateway;
pub mod identity;
pub mod storage;
pub mod sync;
pub mod util;
