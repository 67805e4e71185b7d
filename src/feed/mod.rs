//! Feed documents and the local/remote merge.
//!
//! - [`parser`] - turns a fetched RSS/Atom document into entries, and finds
//!   the feed address advertised by a source page
//! - [`merge`] - reconciles fetched entries into a stored feed, keeping
//!   read state and cached asset paths

mod merge;
mod parser;

pub use merge::{merge, MergeStats};
pub use parser::{find_feed_address, parse_feed, ParseError};

use url::Url;

/// Feed document address for a channel id: `<base>?channel_id=<id>`.
///
/// Falls back to plain string formatting if `base` is not a valid URL, so
/// the fetch reports the bad address instead of this helper.
pub fn channel_feed_url(base: &str, channel_id: &str) -> String {
    match Url::parse(base) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("channel_id", channel_id);
            url.into()
        }
        Err(_) => format!("{base}?channel_id={channel_id}"),
    }
}
