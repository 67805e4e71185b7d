use crate::storage::Entry;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// The fetched document has none of the expected structure.
///
/// Callers treat this as "no results", not as a failure of the batch.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Malformed feed document: {0}")]
    Feed(#[from] feed_rs::parser::ParseFeedError),
}

/// Parses an RSS/Atom document into entries, newest-first as published.
///
/// Each entry takes the feed item's id, first link, title, and first media
/// thumbnail (`media:group/media:thumbnail`) as its asset URL. Fetched entries
/// always start unseen with nothing cached; merge carries local state over.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<Entry>, ParseError> {
    let feed = feed_rs::parser::parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .map(|item| {
            let link = item
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let title = item
                .title
                .map(|t| clean_text(&t.content))
                .unwrap_or_else(|| "Untitled".to_string());
            let asset_url = item
                .media
                .iter()
                .flat_map(|m| m.thumbnails.iter())
                .map(|t| t.image.uri.clone())
                .next()
                .unwrap_or_default();
            let id = stable_id(&item.id, &link, &title);

            Entry::new(id, link, title, asset_url)
        })
        .collect();

    Ok(entries)
}

/// Uses the item's own id when it has one; otherwise derives one from the
/// link and title so repeated fetches still match.
fn stable_id(existing: &str, link: &str, title: &str) -> String {
    let trimmed = existing.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    let hash = Sha256::digest(format!("{link}|{title}").as_bytes());
    format!("{:x}", hash)
}

/// Drops control characters (terminal escapes included) from feed text.
fn clean_text(s: &str) -> String {
    s.chars().filter(|c| !c.is_control()).collect::<String>().trim().to_string()
}

/// Finds the feed address advertised by an HTML source page.
///
/// Returns the `href` of the first `<link>` whose `type` is
/// `application/rss+xml` or `application/atom+xml`, resolved against
/// `base_url`. `None` if the page advertises no feed.
pub fn find_feed_address(html: &str, base_url: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let mut from = 0;

    while let Some(offset) = lower[from..].find("<link") {
        let start = from + offset;
        let end = start + lower[start..].find('>')?;
        // ASCII lowercasing keeps byte offsets, so the original slice lines up
        let tag = &html[start..=end];
        from = end + 1;

        let is_feed = matches!(
            attr_value(tag, "type").map(str::to_ascii_lowercase).as_deref(),
            Some("application/rss+xml") | Some("application/atom+xml")
        );
        if !is_feed {
            continue;
        }
        if let Some(href) = attr_value(tag, "href") {
            return Some(resolve(href, base_url));
        }
    }

    None
}

/// Value of `name="..."` or `name='...'` inside one tag, case-preserving.
fn attr_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let lower = tag.to_ascii_lowercase();
    let needle = format!("{name}=");
    let mut from = 0;

    while let Some(offset) = lower[from..].find(&needle) {
        let at = from + offset;
        from = at + needle.len();
        // Must be a whole attribute name, not the tail of e.g. `data-type=`
        let boundary = at == 0 || lower.as_bytes()[at - 1].is_ascii_whitespace();
        if !boundary {
            continue;
        }
        let rest = &tag[from..];
        let quote = rest.chars().next()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        let value = &rest[1..];
        return value.find(quote).map(|close| &value[..close]);
    }

    None
}

fn resolve(href: &str, base_url: &str) -> String {
    Url::parse(base_url)
        .and_then(|base| base.join(href))
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CHANNEL_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns:media="http://search.yahoo.com/mrss/" xmlns="http://www.w3.org/2005/Atom">
 <title>Example Channel</title>
 <entry>
  <id>yt:video:new222</id>
  <yt:videoId>new222</yt:videoId>
  <title>Newest upload</title>
  <link rel="alternate" href="https://www.youtube.com/watch?v=new222"/>
  <published>2024-02-01T00:00:00+00:00</published>
  <media:group>
   <media:title>Newest upload</media:title>
   <media:thumbnail url="https://i.ytimg.com/vi/new222/hqdefault.jpg" width="480" height="360"/>
  </media:group>
 </entry>
 <entry>
  <id>yt:video:old111</id>
  <yt:videoId>old111</yt:videoId>
  <title>Older upload</title>
  <link rel="alternate" href="https://www.youtube.com/watch?v=old111"/>
  <published>2024-01-01T00:00:00+00:00</published>
  <media:group>
   <media:title>Older upload</media:title>
   <media:thumbnail url="https://i.ytimg.com/vi/old111/hqdefault.jpg" width="480" height="360"/>
  </media:group>
 </entry>
</feed>"#;

    #[test]
    fn test_parse_channel_feed() {
        let entries = parse_feed(CHANNEL_FEED.as_bytes()).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "yt:video:new222");
        assert_eq!(entries[0].title, "Newest upload");
        assert_eq!(entries[0].link, "https://www.youtube.com/watch?v=new222");
        assert_eq!(
            entries[0].asset_url,
            "https://i.ytimg.com/vi/new222/hqdefault.jpg"
        );
        assert!(!entries[0].seen);
        assert!(entries[0].cached_asset_path.is_none());
        assert_eq!(entries[1].id, "yt:video:old111");
    }

    #[test]
    fn test_parse_empty_feed() {
        let xml = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>x</title></channel></rss>"#;
        assert!(parse_feed(xml.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rss_without_thumbnail() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>x</title>
  <item><guid>g1</guid><title>Plain</title><link>https://example.com/1</link></item>
</channel></rss>"#;
        let entries = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "g1");
        assert_eq!(entries[0].asset_url, "");
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        assert!(matches!(
            parse_feed(b"<html><body>consent page</body></html>"),
            Err(ParseError::Feed(_))
        ));
    }

    #[test]
    fn test_title_control_chars_stripped() {
        assert_eq!(clean_text("  \x1b[31mRed\x07 title "), "[31mRed title");
    }

    #[test]
    fn test_stable_id_falls_back_to_hash() {
        assert_eq!(stable_id(" abc ", "l", "t"), "abc");
        let derived = stable_id("", "https://x/1", "t");
        assert_eq!(derived.len(), 64);
        assert_eq!(derived, stable_id("  ", "https://x/1", "t"));
        assert_ne!(derived, stable_id("", "https://x/2", "t"));
    }

    #[test]
    fn test_find_feed_address_absolute() {
        let html = r#"<html><head>
<link rel="canonical" href="https://www.youtube.com/channel/UC1">
<link rel="alternate" type="application/rss+xml" title="RSS" href="https://www.youtube.com/feeds/videos.xml?channel_id=UC1">
</head></html>"#;
        assert_eq!(
            find_feed_address(html, "https://www.youtube.com/@someone").as_deref(),
            Some("https://www.youtube.com/feeds/videos.xml?channel_id=UC1")
        );
    }

    #[test]
    fn test_find_feed_address_relative_and_single_quotes() {
        let html = "<LINK HREF='/atom.xml' TYPE='application/atom+xml'>";
        assert_eq!(
            find_feed_address(html, "https://blog.example.com/posts/").as_deref(),
            Some("https://blog.example.com/atom.xml")
        );
    }

    #[test]
    fn test_find_feed_address_ignores_lookalike_attrs() {
        let html = r#"<link data-type="application/rss+xml" href="/nope.xml">"#;
        assert_eq!(find_feed_address(html, "https://example.com/"), None);
    }

    #[test]
    fn test_find_feed_address_none() {
        assert_eq!(
            find_feed_address("<html><head></head></html>", "https://example.com/"),
            None
        );
    }
}
