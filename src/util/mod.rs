//! Small helpers shared by the storage and network layers.
//!
//! - **Atomic writes**: whole-file replacement via temp file + rename
//! - **URL checks**: scheme validation before anything goes on the wire

mod fs;
mod url_check;

pub use fs::atomic_write;
pub use url_check::{validate_fetch_url, UrlCheckError};
