//! The pak-file-backed cache store
//!
//! One store instance owns one pak file, opened once in read or write
//! mode. Write-mode stores are append-mostly: payloads land at the logical
//! end of the payload region, and the index only reaches disk when the
//! store is saved (explicitly or on drop), which permanently closes it.
//!
//! A single mutex guards the index and the file handle together. The file
//! format keeps index offsets valid only until the trailer is written, so
//! reads and writes are fully serialized rather than merely data-race-safe.

use crate::container::{FOOTER_LEN, INDEX_HEADER_LEN, IndexHeader, PakFooter};
use crate::error::{PakError, Result};
use crate::index::{IndexEntry, PakIndex};
use crate::store::access_log::AccessLogWriter;
use crate::types::{MergeStats, PakStoreOptions, PutStatus, StoreStats, UsageCounters};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn};

/// Hard format ceiling for one legacy payload
const MAX_LEGACY_SIZE: i64 = 2 * 1024 * 1024 * 1024;

pub struct PakFileStore {
    path: PathBuf,
    writable: bool,
    options: PakStoreOptions,
    state: Mutex<StoreState>,
    counters: UsageCounters,
    access_log: Option<AccessLogWriter>,
}

#[derive(Debug)]
struct StoreState {
    file: Option<File>,
    index: PakIndex,
    /// Logical end of the payload region; appends land here
    write_offset: u64,
    closed: bool,
}

impl PakFileStore {
    /// Create a pak file and open the store in write mode
    ///
    /// An existing file at the path is truncated; write mode always starts
    /// from an empty index.
    pub fn open_write(path: &Path, options: PakStoreOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        info!("Opened pak store for writing at {:?}", path);

        let access_log = Self::open_access_log(&options);
        Ok(Self {
            path: path.to_path_buf(),
            writable: true,
            options,
            state: Mutex::new(StoreState {
                file: Some(file),
                index: PakIndex::new(),
                write_offset: 0,
                closed: false,
            }),
            counters: UsageCounters::default(),
            access_log,
        })
    }

    /// Open an existing pak file read-only, loading and validating the index
    ///
    /// Any trailer, header, CRC, or entry validation failure is logged and
    /// surfaced as an error; no store with a partially-populated index is
    /// ever returned.
    pub fn open_read(path: &Path, options: PakStoreOptions) -> Result<Self> {
        let mut file = File::open(path)?;
        let (index, payload_end) = match Self::load_cache(&mut file) {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!("Failed to load pak cache {:?}: {err}", path);
                return Err(err);
            }
        };
        info!(
            "Pak cache opened for reading at {:?} with {} entries",
            path,
            index.len()
        );

        let access_log = Self::open_access_log(&options);
        Ok(Self {
            path: path.to_path_buf(),
            writable: false,
            options,
            state: Mutex::new(StoreState {
                file: Some(file),
                index,
                write_offset: payload_end,
                closed: false,
            }),
            counters: UsageCounters::default(),
            access_log,
        })
    }

    fn open_access_log(options: &PakStoreOptions) -> Option<AccessLogWriter> {
        let path = options.access_log_path.as_deref()?;
        match AccessLogWriter::new(path) {
            Ok(log) => Some(log),
            Err(err) => {
                warn!("Failed to open access log {:?}: {err}", path);
                None
            }
        }
    }

    fn load_cache(file: &mut File) -> Result<(PakIndex, u64)> {
        let file_size = file.metadata()?.len();
        if file_size < INDEX_HEADER_LEN + FOOTER_LEN {
            return Err(PakError::CorruptTrailer(format!(
                "file is only {file_size} bytes"
            )));
        }

        let trailer_offset = file_size - FOOTER_LEN;
        file.seek(SeekFrom::Start(trailer_offset))?;
        let mut footer_bytes = [0u8; FOOTER_LEN as usize];
        file.read_exact(&mut footer_bytes)?;
        let footer = PakFooter::parse(&footer_bytes, trailer_offset)?;

        file.seek(SeekFrom::Start(footer.index_offset as u64))?;
        let mut header_bytes = [0u8; INDEX_HEADER_LEN as usize];
        file.read_exact(&mut header_bytes)?;
        let header = IndexHeader::parse(&header_bytes, footer.index_offset, trailer_offset)?;

        let mut index_bytes = vec![0u8; header.size_index as usize];
        file.read_exact(&mut index_bytes)?;
        let index_crc = crc32fast::hash(&index_bytes);
        if index_crc != header.index_crc {
            return Err(PakError::CorruptIndex(format!(
                "index CRC {index_crc:#010x} does not match recorded {:#010x}",
                header.index_crc
            )));
        }

        let index = PakIndex::parse(&index_bytes, header.num_items, footer.index_offset)?;
        Ok((index, footer.index_offset as u64))
    }

    /// Serialize the index and trailer, close the file, and mark the store
    /// closed
    ///
    /// Saving is one-way: a saved store accepts no further operations. A
    /// second call fails with [`PakError::StoreClosed`] instead of writing
    /// a second trailer. A write failure mid-save voids the store entirely,
    /// since a pak file with an untrustworthy index is worse than none.
    pub fn save_cache(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.save_cache_locked(&mut state)
    }

    fn save_cache_locked(&self, state: &mut StoreState) -> Result<()> {
        if state.closed || state.file.is_none() {
            warn!("Refusing to save already-closed pak store {:?}", self.path);
            return Err(PakError::StoreClosed);
        }
        if !self.writable {
            return Err(PakError::ReadOnly);
        }

        let index_offset = state.write_offset;
        let index_bytes = state.index.serialize();
        let header = IndexHeader {
            index_crc: crc32fast::hash(&index_bytes),
            num_items: state.index.len() as u32,
            size_index: index_bytes.len() as u32,
        };
        let footer = PakFooter {
            index_offset: index_offset as i64,
        };

        let mut trailer =
            Vec::with_capacity(INDEX_HEADER_LEN as usize + index_bytes.len() + FOOTER_LEN as usize);
        trailer.extend_from_slice(&header.serialize());
        trailer.extend_from_slice(&index_bytes);
        trailer.extend_from_slice(&footer.serialize());

        let write_result = match state.file.as_mut() {
            Some(file) => file
                .seek(SeekFrom::Start(index_offset))
                .and_then(|_| file.write_all(&trailer))
                .and_then(|()| file.sync_all()),
            None => Err(std::io::Error::other("file handle already dropped")),
        };

        let num_items = state.index.len();
        state.index.clear();
        state.file = None;
        state.closed = true;

        match write_result {
            Ok(()) => {
                info!(
                    "Saved pak cache {:?} with {num_items} entries ({} trailer bytes)",
                    self.path,
                    trailer.len()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "Failed to write pak index to {:?}: {err}; store voided",
                    self.path
                );
                Err(PakError::SaveFailed(err.to_string()))
            }
        }
    }

    /// Index-only existence probe
    pub fn cached_data_probably_exists(&self, key: &str) -> bool {
        let state = self.state.lock();
        !state.closed && state.index.contains(key)
    }

    /// Read and CRC-verify a payload; any failure is a miss
    pub fn get_cached_data(&self, key: &str) -> Option<Bytes> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        let Some(entry) = state.index.get(key).copied() else {
            trace!("{:?}: cache miss for {key}", self.path);
            self.counters.record_get(false, 0);
            return None;
        };
        if entry.size >= MAX_LEGACY_SIZE {
            warn!(
                "{:?}: entry {key} is {} bytes, at or above the 2 GiB format limit",
                self.path, entry.size
            );
            self.counters.record_get(false, 0);
            return None;
        }

        let Some(file) = state.file.as_mut() else {
            return None;
        };
        let mut data = vec![0u8; entry.size as usize];
        let read = file
            .seek(SeekFrom::Start(entry.offset as u64))
            .and_then(|_| file.read_exact(&mut data));
        if let Err(err) = read {
            warn!(
                "{:?}: failed to read {} bytes at {} for {key}: {err}",
                self.path, entry.size, entry.offset
            );
            self.counters.record_get(false, 0);
            return None;
        }

        let crc = crc32fast::hash(&data);
        if crc != entry.crc {
            warn!(
                "{:?}: CRC mismatch for {key}: recorded {:#010x}, computed {crc:#010x}",
                self.path, entry.crc
            );
            self.counters.record_get(false, 0);
            return None;
        }

        trace!("{:?}: cache hit for {key} ({} bytes)", self.path, entry.size);
        self.counters.record_get(true, data.len() as u64);
        Some(Bytes::from(data))
    }

    /// Store a payload under a key
    ///
    /// Same-size overwrites rewrite the payload in place and update only
    /// the CRC. A different-size overwrite drops the old index entry and
    /// appends; the old payload bytes stay in the file as unreachable
    /// garbage, which is the accepted cost of never rewriting the file.
    pub fn put_cached_data(&self, key: &str, data: &[u8], put_even_if_exists: bool) -> PutStatus {
        if key.is_empty() {
            warn!("{:?}: refusing to store data under an empty key", self.path);
            return PutStatus::NotCached;
        }
        if data.is_empty() {
            warn!("{:?}: refusing to store empty data for {key}", self.path);
            return PutStatus::NotCached;
        }
        if data.len() as i64 >= MAX_LEGACY_SIZE {
            warn!(
                "{:?}: payload for {key} is {} bytes, at or above the 2 GiB format limit",
                self.path,
                data.len()
            );
            return PutStatus::NotCached;
        }

        let mut state = self.state.lock();
        if !self.writable || state.closed || state.file.is_none() {
            trace!("{:?}: not writable, skipped put of {key}", self.path);
            self.counters.record_put(false, 0);
            return PutStatus::NotCached;
        }

        if let Some(existing) = state.index.get(key).copied() {
            if !put_even_if_exists {
                trace!("{:?}: {key} already stored", self.path);
                self.counters.record_put(true, 0);
                return PutStatus::Cached;
            }
            if existing.size == data.len() as i64 {
                let Some(file) = state.file.as_mut() else {
                    return PutStatus::NotCached;
                };
                let write = file
                    .seek(SeekFrom::Start(existing.offset as u64))
                    .and_then(|_| file.write_all(data));
                if let Err(err) = write {
                    warn!("{:?}: in-place rewrite of {key} failed: {err}", self.path);
                    self.counters.record_put(false, 0);
                    return PutStatus::NotCached;
                }
                state.index.insert(
                    key.to_string(),
                    IndexEntry {
                        offset: existing.offset,
                        size: existing.size,
                        crc: crc32fast::hash(data),
                    },
                );
                debug!("{:?}: rewrote {key} in place ({} bytes)", self.path, data.len());
                self.counters.record_put(true, data.len() as u64);
                return PutStatus::Cached;
            }

            warn!(
                "{:?}: size change for {key} orphans {} bytes in the file",
                self.path, existing.size
            );
            state.index.remove(key);
        }

        let offset = state.write_offset;
        let Some(file) = state.file.as_mut() else {
            return PutStatus::NotCached;
        };
        let write = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(data));
        if let Err(err) = write {
            warn!(
                "{:?}: failed to append {} bytes for {key}: {err}",
                self.path,
                data.len()
            );
            self.counters.record_put(false, 0);
            return PutStatus::NotCached;
        }
        state.write_offset += data.len() as u64;
        state.index.insert(
            key.to_string(),
            IndexEntry {
                offset: offset as i64,
                size: data.len() as i64,
                crc: crc32fast::hash(data),
            },
        );
        trace!(
            "{:?}: appended {key} at {offset} ({} bytes)",
            self.path,
            data.len()
        );
        self.counters.record_put(true, data.len() as u64);
        PutStatus::Cached
    }

    /// Drop a key from the index; payload bytes are never reclaimed
    pub fn remove_cached_data(&self, key: &str, transient: bool) {
        if transient {
            trace!("{:?}: transient removal of {key} ignored", self.path);
            return;
        }
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        if state.index.remove(key).is_some() {
            debug!("{:?}: removed {key} from index", self.path);
        }
    }

    /// Copy every entry present in `other` but absent here, byte-exact
    ///
    /// Entries already present are left untouched. No decompression or
    /// recompression happens; payloads round-trip through the raw surface.
    pub fn merge_cache(&self, other: &PakFileStore) -> MergeStats {
        let mut stats = MergeStats::default();
        for key in other.keys() {
            if self.cached_data_probably_exists(&key) {
                stats.skipped += 1;
                continue;
            }
            match other.get_cached_data(&key) {
                Some(data) => {
                    if self.put_cached_data(&key, &data, false) == PutStatus::Cached {
                        stats.copied += 1;
                    } else {
                        stats.failed += 1;
                    }
                }
                None => {
                    warn!("{:?}: failed to read {key} while merging", other.path);
                    stats.failed += 1;
                }
            }
        }
        info!(
            "{:?}: merged {} entries from {:?} ({} skipped, {} failed)",
            self.path, stats.copied, other.path, stats.skipped, stats.failed
        );
        stats
    }

    /// Snapshot of all keys currently in the index
    pub fn keys(&self) -> Vec<String> {
        let state = self.state.lock();
        state.index.keys().map(str::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().index.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }

    pub(crate) fn options(&self) -> &PakStoreOptions {
        &self.options
    }

    pub(crate) fn save_file(&self, path: &str, data: &[u8], replace_existing: bool) -> bool {
        matches!(
            self.put_cached_data(path, data, replace_existing),
            PutStatus::Cached
        )
    }

    pub(crate) fn load_file(&self, path: &str) -> Option<Bytes> {
        self.get_cached_data(path)
    }

    pub(crate) fn file_exists(&self, path: &str) -> bool {
        self.cached_data_probably_exists(path)
    }

    pub(crate) fn log_access(&self, entry: &str) {
        if let Some(log) = &self.access_log {
            log.append(entry);
        }
    }

    /// Drop an entry whose stored bytes failed validation, so later reads
    /// stop paying for the same corrupt payload
    pub(crate) fn drop_corrupt_entry(&self, path: &str) {
        if self.writable {
            self.remove_cached_data(path, false);
        }
    }
}

impl Drop for PakFileStore {
    fn drop(&mut self) {
        if !self.writable {
            return;
        }
        let mut state = self.state.lock();
        if !state.closed && state.file.is_some() {
            if let Err(err) = self.save_cache_locked(&mut state) {
                error!("Failed to save pak cache {:?} on close: {err}", self.path);
            }
        }
    }
}
