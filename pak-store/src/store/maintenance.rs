//! Offline pak maintenance
//!
//! Pak files written by concurrent build machines accumulate entries in
//! nondeterministic order. Rewriting a pak with its keys sorted produces a
//! byte-identical file for identical content, which makes paks diffable
//! and lets a build farm verify two machines cooked the same data.

use crate::error::{PakError, Result};
use crate::store::pak_store::PakFileStore;
use crate::types::{PakStoreOptions, PutStatus};
use std::path::Path;
use tracing::{info, warn};

/// Copy every entry of `input` into a fresh pak at `output` in
/// lexicographic key order, and write a `<output>.csv` manifest of
/// `(key, size)` pairs beside it
pub fn sort_and_copy(input: &Path, output: &Path) -> Result<usize> {
    let source = PakFileStore::open_read(input, PakStoreOptions::default())?;
    let target = PakFileStore::open_write(output, PakStoreOptions::default())?;

    let mut keys = source.keys();
    keys.sort_unstable();

    let mut manifest = String::from("Key,Size\n");
    let mut copied = 0usize;
    for key in &keys {
        let Some(data) = source.get_cached_data(key) else {
            warn!("Skipping unreadable entry {key} while sorting {:?}", input);
            continue;
        };
        if target.put_cached_data(key, &data, false) != PutStatus::Cached {
            return Err(PakError::SaveFailed(format!(
                "failed to copy {key} into {output:?}"
            )));
        }
        manifest.push_str(key);
        manifest.push(',');
        manifest.push_str(&data.len().to_string());
        manifest.push('\n');
        copied += 1;
    }
    target.save_cache()?;

    let mut manifest_path = output.as_os_str().to_owned();
    manifest_path.push(".csv");
    std::fs::write(&manifest_path, manifest)?;

    info!(
        "Sorted {copied} of {} entries from {:?} into {:?}",
        keys.len(),
        input,
        output
    );
    Ok(copied)
}
