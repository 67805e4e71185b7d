use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Atomically replaces `dst` with `content` using write-to-temp-then-rename.
///
/// The destination is never left in a partial state: either the old file is
/// still there, or the new one is complete. The temp file lives next to the
/// destination so the rename stays on one filesystem.
pub fn atomic_write(dst: &Path, content: &[u8]) -> std::io::Result<()> {
    // Randomized suffix so a leftover temp file from a crashed run never
    // collides with this one (`create_new` would refuse it).
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("tmp.{:016x}", random_suffix));

    let result = (|| {
        let mut temp_file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        temp_file.write_all(content)?;
        temp_file.sync_all()?;
        drop(temp_file);

        // On Windows, rename fails if destination exists
        #[cfg(windows)]
        if dst.exists() {
            std::fs::remove_file(dst)?;
        }

        std::fs::rename(&temp_path, dst)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}
