use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::builder::build_file_set;
use crate::codec::{self, ReadFailure};
use crate::fsops::{self, ModTime};
use crate::paths::MonitorPath;
use crate::probe::{probe_file_set, ProbeOutcome};
use crate::state::FileHashCache;
use crate::Result;

/// Opaque timestamp taken with [`begin_update`] before an action starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonitorTimestamp(pub(crate) ModTime);

/// Read the filesystem clock, at mtime resolution, by statting a scratch
/// file. Call this **before** the action whose inputs are being
/// monitored starts reading files; pass the value to
/// [`FileMonitor::update`] so writes that raced the action are caught.
pub fn begin_update() -> Result<MonitorTimestamp> {
    let scratch = NamedTempFile::new()?;
    let mtime = fsops::get_mtime(scratch.path())?;
    Ok(MonitorTimestamp(mtime))
}

/// Why [`FileMonitor::check`] reported a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeReason<K> {
    /// No cache file exists yet.
    FirstRun,
    /// The cache file exists but could not be decoded.
    CorruptCache,
    /// The key differs from the cached one (carried here).
    KeyChanged(K),
    /// This monitored path changed.
    FileChanged(PathBuf),
}

/// Result of [`FileMonitor::check`].
#[derive(Debug)]
pub enum CheckResult<K, V> {
    /// Nothing relevant changed; the cached result can be reused.
    /// `paths` reconstructs the declared paths the snapshot was built
    /// from.
    Unchanged {
        result: V,
        paths: Vec<MonitorPath>,
    },
    Changed(ChangeReason<K>),
}

type KeyValidator<K> = Box<dyn Fn(&K, &K) -> bool + Send + Sync>;

/// Monitor descriptor: where the cache file lives, how keys compare,
/// and in which order the key and file checks run.
pub struct FileMonitor<K, V> {
    cache_path: PathBuf,
    key_valid: KeyValidator<K>,
    check_only_key_changed: bool,
    _result: PhantomData<fn() -> V>,
}

impl<K: PartialEq + 'static, V> FileMonitor<K, V> {
    /// Monitor with structural key equality.
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self::with_key_validator(cache_path, |cached: &K, current: &K| cached == current)
    }
}

impl<K, V> FileMonitor<K, V> {
    /// Monitor with a custom key validator, called as
    /// `valid(cached, current)`. The predicate must be reflexive;
    /// subset-style checks are fine.
    pub fn with_key_validator(
        cache_path: impl Into<PathBuf>,
        valid: impl Fn(&K, &K) -> bool + Send + Sync + 'static,
    ) -> Self {
        FileMonitor {
            cache_path: cache_path.into(),
            key_valid: Box::new(valid),
            check_only_key_changed: false,
            _result: PhantomData,
        }
    }

    /// When set, `check` runs the file check before the key check, so a
    /// `KeyChanged` report guarantees that no monitored file changed.
    /// The default order is the cheaper key check first.
    pub fn check_only_key_changed(mut self, yes: bool) -> Self {
        self.check_only_key_changed = yes;
        self
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }
}

impl<K, V> FileMonitor<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    /// Decide whether the cached result is still valid for `key` and the
    /// monitored paths under `root`.
    pub fn check(&self, root: &Path, key: &K) -> Result<CheckResult<K, V>> {
        let cache = match codec::read_cache::<K, V>(&self.cache_path) {
            Ok(cache) => cache,
            Err(ReadFailure::Missing) => {
                debug!(cache = %self.cache_path.display(), "no cache file; first run");
                return Ok(CheckResult::Changed(ChangeReason::FirstRun));
            }
            Err(ReadFailure::Corrupt(reason)) => {
                warn!(cache = %self.cache_path.display(), %reason, "discarding unreadable cache");
                return Ok(CheckResult::Changed(ChangeReason::CorruptCache));
            }
        };

        if !self.check_only_key_changed && !(self.key_valid)(&cache.key, key) {
            return Ok(CheckResult::Changed(ChangeReason::KeyChanged(cache.key)));
        }

        let (snapshot, cache_changed) = match probe_file_set(root, &cache.snapshot)? {
            ProbeOutcome::Changed(path) => {
                return Ok(CheckResult::Changed(ChangeReason::FileChanged(path)))
            }
            ProbeOutcome::Unchanged {
                snapshot,
                cache_changed,
            } => (snapshot, cache_changed),
        };

        if self.check_only_key_changed && !(self.key_valid)(&cache.key, key) {
            return Ok(CheckResult::Changed(ChangeReason::KeyChanged(cache.key)));
        }

        let result: V = match cache.decode_result() {
            Ok(result) => result,
            Err(reason) => {
                warn!(cache = %self.cache_path.display(), %reason, "cached result undecodable");
                return Ok(CheckResult::Changed(ChangeReason::CorruptCache));
            }
        };

        if cache_changed {
            // Fold refreshed directory mtimes and newly discovered empty
            // subtrees back into the cache, with the key and the still-
            // encoded result unchanged.
            debug!(cache = %self.cache_path.display(), "rewriting cache header");
            let (_, key, result_bytes) = cache.into_parts();
            codec::write_cache_raw::<K, V>(&self.cache_path, &snapshot, &key, &result_bytes)?;
        }

        Ok(CheckResult::Unchanged {
            result,
            paths: snapshot.monitor_paths(),
        })
    }

    /// Take a fresh snapshot of `paths` under `root` and atomically
    /// overwrite the cache file with `(snapshot, key, result)`.
    ///
    /// `started` should be the [`begin_update`] value taken before the
    /// action began; pass `None` when the inputs were not being written
    /// concurrently (e.g. no action ran).
    pub fn update(
        &self,
        root: &Path,
        started: Option<MonitorTimestamp>,
        paths: &[MonitorPath],
        key: &K,
        result: &V,
    ) -> Result<()> {
        let hash_cache = self.salvage_hash_cache();
        let snapshot = build_file_set(started, &hash_cache, root, paths)?;
        codec::write_cache::<K, V>(&self.cache_path, &snapshot, key, result)
    }

    /// Hashes recorded in the previous snapshot, so files with an
    /// unchanged mtime are not re-read. Any failure degrades to an
    /// empty cache.
    fn salvage_hash_cache(&self) -> FileHashCache {
        match codec::read_cache::<K, V>(&self.cache_path) {
            Ok(cache) => cache.snapshot.file_hashes(),
            Err(ReadFailure::Missing) => FileHashCache::new(),
            Err(ReadFailure::Corrupt(reason)) => {
                debug!(
                    cache = %self.cache_path.display(),
                    %reason,
                    "previous cache unusable; hashing from scratch"
                );
                FileHashCache::new()
            }
        }
    }
}
