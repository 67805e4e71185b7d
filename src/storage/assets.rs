use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use super::types::Entry;
use crate::util::atomic_write;

const VIDEO_ID_PREFIX: &str = "yt:video:";

/// Cache directory policy for entry assets (thumbnails).
///
/// A video entry (`yt:video:<id>`) keeps its asset at `<dir>/<id>.jpg`. Any
/// other id is hashed, since feed ids are arbitrary text (URLs, `tag:` URIs)
/// and must neither escape `dir` nor collide across feeds. The store only
/// keeps the resulting path on the entry; this type owns where files go and
/// how they are removed when a feed is dropped.
#[derive(Debug, Clone)]
pub struct AssetCache {
    dir: PathBuf,
}

impl AssetCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the asset for `entry` is stored. Always a direct child of
    /// [`dir`](Self::dir).
    pub fn path_for(&self, entry: &Entry) -> PathBuf {
        self.dir.join(format!("{}.jpg", file_stem(&entry.id)))
    }

    /// Writes `bytes` as the asset for `entry`, creating the directory if
    /// needed, and returns the path written.
    ///
    /// The file is replaced atomically on a blocking thread. Dropping the
    /// returned future never leaves a truncated file behind: the path holds
    /// either the previous asset or the complete new one.
    pub async fn store(&self, entry: &Entry, bytes: Vec<u8>) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(entry);
        let target = path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&target, &bytes))
            .await
            .map_err(std::io::Error::other)??;
        Ok(path)
    }

    /// Deletes the cached files referenced by `entries`.
    ///
    /// Files already gone are skipped. Other failures are logged and do not
    /// stop the sweep. Returns how many files were removed.
    pub async fn remove_feed_assets(&self, entries: &[Entry]) -> usize {
        let mut removed = 0;
        for path in entries.iter().filter_map(|e| e.cached_asset_path.as_deref()) {
            match tokio::fs::remove_file(path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to delete cached asset");
                }
            }
        }
        removed
    }
}

/// File name (without extension) for an entry id.
fn file_stem(id: &str) -> String {
    match id.strip_prefix(VIDEO_ID_PREFIX) {
        Some(video_id) if is_safe_stem(video_id) => video_id.to_string(),
        _ => format!("{:x}", Sha256::digest(id.as_bytes())),
    }
}

fn is_safe_stem(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_video_entry_uses_video_id() {
        let cache = AssetCache::new("/cache/thumbnails");
        let entry = Entry::new("yt:video:xyz", "", "", "");
        assert_eq!(
            cache.path_for(&entry),
            PathBuf::from("/cache/thumbnails/xyz.jpg")
        );
    }

    #[tokio::test]
    async fn test_store_creates_dir_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path().join("thumbnails"));
        let entry = Entry::new("yt:video:abc", "", "", "");

        let path = cache.store(&entry, b"jpeg".to_vec()).await.unwrap();
        assert_eq!(path, dir.path().join("thumbnails").join("abc.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_remove_feed_assets_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path());

        let mut present = Entry::new("yt:video:a", "", "", "");
        present.cached_asset_path = Some(cache.store(&present, b"x".to_vec()).await.unwrap());
        let mut gone = Entry::new("yt:video:b", "", "", "");
        gone.cached_asset_path = Some(dir.path().join("b.jpg"));
        let uncached = Entry::new("yt:video:c", "", "", "");

        let removed = cache
            .remove_feed_assets(&[present.clone(), gone, uncached])
            .await;
        assert_eq!(removed, 1);
        assert!(!present.cached_asset_path.unwrap().exists());
    }

    fn assert_direct_child(cache: &AssetCache, path: &Path) {
        assert_eq!(path.parent(), Some(cache.dir()), "{} escaped the cache", path.display());
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(".jpg"));
        assert!(!name.contains(".."));
    }

    #[test]
    fn test_url_and_traversal_ids_stay_inside_dir() {
        let cache = AssetCache::new("/data/thumbnails");
        for id in [
            "https://blog.example.com/posts/1",
            "tag:x:../../../home/u/.evil",
            "yt:video:../../etc/passwd",
            "yt:video:",
            "..",
            "/abs/path",
        ] {
            let path = cache.path_for(&Entry::new(id, "", "", ""));
            assert_direct_child(&cache, &path);
        }
    }

    #[test]
    fn test_ids_sharing_last_segment_do_not_collide() {
        let cache = AssetCache::new("/data/thumbnails");
        let a = cache.path_for(&Entry::new("tag:feed-a.com:1", "", "", ""));
        let b = cache.path_for(&Entry::new("tag:feed-b.com:1", "", "", ""));
        assert_ne!(a, b);
        assert_direct_child(&cache, &a);
        assert_direct_child(&cache, &b);
    }

    #[test]
    fn test_hashed_name_is_stable() {
        let cache = AssetCache::new("/c");
        let entry = Entry::new("https://blog.example.com/posts/1", "", "", "");
        assert_eq!(cache.path_for(&entry), cache.path_for(&entry.clone()));
        let name = cache.path_for(&entry);
        assert_eq!(name.file_stem().unwrap().len(), 64);
    }

    fn leftover_temp_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(".tmp."))
            .collect()
    }

    #[tokio::test]
    async fn test_interrupted_store_never_truncates_previous_asset() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path());
        let entry = Entry::new("yt:video:a", "", "", "");
        let old = b"previous thumbnail".to_vec();
        let path = cache.store(&entry, old.clone()).await.unwrap();

        let new = vec![7u8; 4 * 1024 * 1024];
        let dropped = tokio::time::timeout(Duration::ZERO, cache.store(&entry, new.clone())).await;
        assert!(dropped.is_err());

        // Let any replacement already handed to the blocking pool finish
        tokio::time::sleep(Duration::from_millis(200)).await;
        let on_disk = std::fs::read(&path).unwrap();
        assert!(on_disk == old || on_disk == new, "asset file is partial");
        assert!(leftover_temp_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_failed_store_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path());
        let entry = Entry::new("yt:video:a", "", "", "");
        // A directory squatting on the asset path makes the final rename fail
        std::fs::create_dir(cache.path_for(&entry)).unwrap();

        assert!(cache.store(&entry, b"jpeg".to_vec()).await.is_err());
        assert!(cache.path_for(&entry).is_dir());
        assert!(leftover_temp_files(dir.path()).is_empty());
    }
}
