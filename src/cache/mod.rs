//! Disk-backed LRU cache for finished renditions.
//!
//! Every entry is one file under the storage directory, named by its key
//! and holding the raw encoded bytes. Recency lives in memory: a
//! [`List`](list::List) of keys (front = most recently touched) plus a
//! `HashMap` from key to list handle.
//!
//! # Invariants
//!
//! After every public call returns:
//!
//! - `index.len() == order.len() <= capacity`
//! - every key in `order` has exactly one index entry and vice versa
//! - every indexed key has a complete, readable file under the root
//!
//! The last point is kept by writing payloads to a hidden temporary file
//! and renaming it into place, writing *before* evicting, and dropping an
//! index entry whose file turns out to be unreadable.
//!
//! # Locking
//!
//! [`DiskCache::set`], [`DiskCache::get`] and [`DiskCache::clear`] take one
//! exclusive lock for their whole duration, file I/O included. The list and
//! index must move together, and cache calls are already bounded by disk
//! latency, so a single critical section is the scaling limit here rather
//! than a sharded design.
//!
//! # Restart
//!
//! With `restore` enabled, [`DiskCache::open`] rebuilds the index from the
//! rendition files already on disk (names shaped `<w>x<h>-<sha256 hex>`;
//! anything else is left alone), ordered by modification time (newest at the
//! front), and deletes the oldest files beyond capacity. Without it the
//! cache starts cold and old files stay untracked until [`DiskCache::clear`].

pub mod list;

use list::{List, NodeId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Suffix of in-progress payload writes. Such files are hidden (leading dot)
/// and never valid keys.
const TEMP_SUFFIX: &str = ".tmp";

/// Longest accepted key, comfortably under common file-name limits.
const MAX_KEY_LEN: usize = 200;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache capacity must be at least 1")]
    ZeroCapacity,
    #[error("invalid cache key {0:?}")]
    InvalidKey(String),
    #[error("can't create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("can't scan cache directory {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("can't write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("can't read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("can't remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Settings needed to open a cache.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub root: PathBuf,
    pub capacity: usize,
    pub restore: bool,
}

/// Summary of cache activity since the cache was opened.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub overwrites: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lookups() == 0 {
            return write!(f, "no lookups");
        }
        write!(
            f,
            "{} hits, {} misses ({} lookups), {} stored, {} replaced, {} evicted",
            self.hits,
            self.misses,
            self.lookups(),
            self.inserts,
            self.overwrites,
            self.evictions
        )
    }
}

#[derive(Debug, Default)]
struct State {
    index: HashMap<String, NodeId>,
    order: List<String>,
    stats: CacheStats,
}

/// Capacity-bounded LRU cache of byte payloads persisted one file per key.
#[derive(Debug)]
pub struct DiskCache {
    root: PathBuf,
    capacity: usize,
    state: Mutex<State>,
}

impl DiskCache {
    /// Open (creating if needed) the storage directory and build the cache.
    ///
    /// A directory that cannot be created is fatal for the caller.
    pub fn open(options: &CacheOptions) -> Result<Self, CacheError> {
        if options.capacity == 0 {
            return Err(CacheError::ZeroCapacity);
        }
        let root = options.root.clone();
        if !root.is_dir() {
            info!(path = %root.display(), "cache directory missing, creating");
            fs::create_dir_all(&root).map_err(|source| CacheError::CreateDir {
                path: root.clone(),
                source,
            })?;
        }

        let cache = Self {
            root,
            capacity: options.capacity,
            state: Mutex::new(State::default()),
        };
        if options.restore {
            cache.restore()?;
        }
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is tracked. Does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().index.contains_key(key)
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().order.iter().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Store `bytes` under `key` and make it the most recent entry.
    ///
    /// Returns `true` when the key already existed (its file is rewritten).
    /// A new key on a full cache evicts exactly one entry, the least recent,
    /// but only after the new payload is safely on disk: a failed write
    /// leaves the cache exactly as it was.
    pub fn set(&self, key: &str, bytes: &[u8]) -> Result<bool, CacheError> {
        validate_key(key)?;
        let mut state = self.state.lock();

        if let Some(&id) = state.index.get(key) {
            self.write_payload(key, bytes)?;
            state.order.move_to_front(id);
            state.stats.overwrites += 1;
            debug!(key, size = bytes.len(), "cache entry replaced");
            return Ok(true);
        }

        self.write_payload(key, bytes)?;
        if state.order.len() >= self.capacity
            && let Err(e) = self.evict_back(&mut state)
        {
            let _ = fs::remove_file(self.path_for(key));
            return Err(e);
        }
        let id = state.order.push_front(key.to_string());
        state.index.insert(key.to_string(), id);
        state.stats.inserts += 1;
        debug!(key, size = bytes.len(), "cache entry stored");
        Ok(false)
    }

    /// Fetch the payload for `key`, marking it most recent.
    ///
    /// `Ok(None)` means the key is not cached. A tracked key whose file can't
    /// be read is an error, and the entry is dropped so the next lookup is a
    /// clean miss.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        validate_key(key)?;
        let mut state = self.state.lock();

        let Some(&id) = state.index.get(key) else {
            state.stats.misses += 1;
            return Ok(None);
        };
        state.order.move_to_front(id);

        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => {
                state.stats.hits += 1;
                Ok(Some(bytes))
            }
            Err(source) => {
                state.order.remove(id);
                state.index.remove(key);
                warn!(key, error = %source, "cached payload unreadable, dropping entry");
                Err(CacheError::Read { path, source })
            }
        }
    }

    /// Delete every file under the storage root and forget all entries.
    ///
    /// Safe on an empty cache. A file that can't be removed keeps its entry
    /// and the first such failure is returned once every other file has been
    /// tried; entries whose files are gone are always dropped.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        let entries = fs::read_dir(&self.root).map_err(|source| CacheError::Scan {
            path: self.root.clone(),
            source,
        })?;
        let mut removed = 0usize;
        let mut failure = None;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(source) => {
                    failure.get_or_insert(CacheError::Scan {
                        path: self.root.clone(),
                        source,
                    });
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(source) => {
                    warn!(path = %path.display(), error = %source, "can't remove cache file");
                    failure.get_or_insert(CacheError::Remove { path, source });
                }
            }
        }

        let gone: Vec<String> = state
            .index
            .keys()
            .filter(|key| !self.path_for(key).is_file())
            .cloned()
            .collect();
        for key in gone {
            if let Some(id) = state.index.remove(&key) {
                state.order.remove(id);
            }
        }
        info!(
            path = %self.root.display(),
            removed,
            kept = state.order.len(),
            "cache cleared"
        );
        failure.map_or(Ok(()), Err)
    }

    /// Rebuild the index from files on disk, oldest first so the newest ends
    /// up at the front. Files past capacity are deleted, oldest first.
    fn restore(&self) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        let scan_err = |source| CacheError::Scan {
            path: self.root.clone(),
            source,
        };

        let mut found: Vec<(SystemTime, String)> = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(scan_err)? {
            let entry = entry.map_err(scan_err)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!(file = %name, error = %e, "skipping unreadable cache file");
                    continue;
                }
            };
            if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                let _ = fs::remove_file(entry.path());
                continue;
            }
            if !is_rendition_key(&name) {
                debug!(file = %name, "ignoring file that is not a rendition");
                continue;
            }
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((mtime, name));
        }
        found.sort();

        let overflow = found.len().saturating_sub(self.capacity);
        for (_, name) in found.drain(..overflow) {
            let path = self.path_for(&name);
            fs::remove_file(&path).map_err(|source| CacheError::Remove { path, source })?;
        }
        for (_, name) in found {
            let id = state.order.push_front(name.clone());
            state.index.insert(name, id);
        }

        info!(
            path = %self.root.display(),
            restored = state.order.len(),
            dropped = overflow,
            "cache index restored"
        );
        Ok(())
    }

    /// Remove the least recent entry and its file. On failure nothing changes.
    fn evict_back(&self, state: &mut State) -> Result<(), CacheError> {
        let Some(id) = state.order.back() else {
            return Ok(());
        };
        let Some(key) = state.order.get(id).cloned() else {
            return Ok(());
        };
        let path = self.path_for(&key);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(CacheError::Remove { path, source }),
        }
        state.order.remove(id);
        state.index.remove(&key);
        state.stats.evictions += 1;
        debug!(key = %key, "cache entry evicted");
        Ok(())
    }

    /// Write to a hidden sibling then rename over the final name.
    fn write_payload(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let tmp = self.root.join(format!(".{key}{TEMP_SUFFIX}"));
        let path = self.path_for(key);
        if let Err(source) = fs::write(&tmp, bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(CacheError::Write { path: tmp, source });
        }
        fs::rename(&tmp, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            CacheError::Write { path, source }
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

/// Keys become file names: a single path component of `[A-Za-z0-9._-]`,
/// not starting with a dot.
fn validate_key(key: &str) -> Result<(), CacheError> {
    let ok = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if ok {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(key.to_string()))
    }
}

/// Whether `name` has the shape of a rendition key, `<w>x<h>-<sha256 hex>`.
/// Only such files are adopted on restore.
fn is_rendition_key(name: &str) -> bool {
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let Some((dims, digest)) = name.split_once('-') else {
        return false;
    };
    let Some((w, h)) = dims.split_once('x') else {
        return false;
    };
    digits(w)
        && digits(h)
        && digest.len() == 64
        && digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
