use crate::storage::Entry;

/// What a merge changed, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Entries whose id was not in the local feed
    pub added: usize,
    /// Entries that replaced a local entry with the same id
    pub updated: usize,
}

/// Reconciles a freshly fetched `remote` list (newest-first) into `local`.
///
/// Remote entries are walked oldest-to-newest. Each one is matched against
/// `local` by `id` with a linear scan:
///
/// - **Match**: the remote entry replaces the local one *at the same index*.
///   It inherits the local `seen` flag. It inherits `cached_asset_path` only
///   when `asset_url` is unchanged; otherwise the path is dropped so the asset
///   is fetched again.
/// - **No match**: the remote entry is inserted at index 0. Walking
///   oldest-to-newest makes the newest entry end up first.
///
/// An empty `remote` leaves `local` untouched. Merging the same list twice is
/// a no-op the second time.
///
/// A cached file deleted behind our back is not noticed as long as the
/// `asset_url` stays the same.
pub fn merge(local: &mut Vec<Entry>, remote: Vec<Entry>) -> MergeStats {
    let mut stats = MergeStats::default();

    for mut incoming in remote.into_iter().rev() {
        match local.iter().position(|existing| existing.id == incoming.id) {
            Some(index) => {
                let existing = &mut local[index];
                incoming.seen = existing.seen;
                incoming.cached_asset_path = if incoming.asset_url == existing.asset_url {
                    existing.cached_asset_path.take()
                } else {
                    None
                };
                *existing = incoming;
                stats.updated += 1;
            }
            None => {
                local.insert(0, incoming);
                stats.added += 1;
            }
        }
    }

    stats
}
