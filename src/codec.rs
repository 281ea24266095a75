use std::any::type_name;
use std::fs;
use std::io::{self, Cursor};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::fsops;
use crate::state::MonitorStateFileSet;
use crate::Result;

const MAGIC: &[u8; 4] = b"FMON";
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 4 + TAG_LEN;

/// Bumped whenever the encoding of the snapshot types changes shape.
const FORMAT_VERSION: u32 = 1;

/// Cache-file contents with the result component left undecoded, so
/// staleness can be checked without paying for a result that may be
/// discarded.
pub struct CacheFile<K> {
    pub snapshot: MonitorStateFileSet,
    pub key: K,
    result_bytes: Vec<u8>,
}

impl<K> CacheFile<K> {
    /// Decode the deferred result component.
    pub fn decode_result<V: DeserializeOwned>(&self) -> std::result::Result<V, String> {
        bincode::deserialize(&self.result_bytes).map_err(|e| e.to_string())
    }

    pub fn into_parts(self) -> (MonitorStateFileSet, K, Vec<u8>) {
        (self.snapshot, self.key, self.result_bytes)
    }
}

/// Why a cache file could not be read.
#[derive(Debug)]
pub enum ReadFailure {
    /// No cache file on disk.
    Missing,
    /// Unreadable file, tag mismatch, or header decode error.
    Corrupt(String),
}

/// Structural tag over the three component types. Any change to the
/// snapshot shape (via `FORMAT_VERSION`) or to the key/result types
/// turns an old cache file into a decode failure instead of a silent
/// misinterpretation.
fn structural_tag<K, V>() -> [u8; TAG_LEN] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&FORMAT_VERSION.to_le_bytes());
    hasher.update(type_name::<MonitorStateFileSet>().as_bytes());
    hasher.update(type_name::<K>().as_bytes());
    hasher.update(type_name::<V>().as_bytes());
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&hasher.finalize().as_bytes()[..TAG_LEN]);
    tag
}

/// Read the cache file: validate the tag, decode snapshot and key
/// strictly, defer the result.
pub fn read_cache<K: DeserializeOwned, V>(
    path: &Path,
) -> std::result::Result<CacheFile<K>, ReadFailure> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ReadFailure::Missing),
        Err(e) => return Err(ReadFailure::Corrupt(e.to_string())),
    };
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(ReadFailure::Corrupt("bad magic".to_string()));
    }
    if bytes[4..HEADER_LEN] != structural_tag::<K, V>() {
        return Err(ReadFailure::Corrupt("structural tag mismatch".to_string()));
    }
    let mut cursor = Cursor::new(&bytes[HEADER_LEN..]);
    let snapshot: MonitorStateFileSet =
        bincode::deserialize_from(&mut cursor).map_err(|e| ReadFailure::Corrupt(e.to_string()))?;
    let key: K =
        bincode::deserialize_from(&mut cursor).map_err(|e| ReadFailure::Corrupt(e.to_string()))?;
    let consumed = cursor.position() as usize;
    let result_bytes = bytes[HEADER_LEN + consumed..].to_vec();
    Ok(CacheFile {
        snapshot,
        key,
        result_bytes,
    })
}

/// Atomically write a `(snapshot, key, result)` triple.
pub fn write_cache<K: Serialize, V: Serialize>(
    path: &Path,
    snapshot: &MonitorStateFileSet,
    key: &K,
    result: &V,
) -> Result<()> {
    let result_bytes = bincode::serialize(result)?;
    write_cache_raw::<K, V>(path, snapshot, key, &result_bytes)
}

/// Same, but with the result component already encoded. Used for
/// header-only rewrites so the result is never re-decoded.
pub fn write_cache_raw<K: Serialize, V>(
    path: &Path,
    snapshot: &MonitorStateFileSet,
    key: &K,
    result_bytes: &[u8],
) -> Result<()> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&structural_tag::<K, V>());
    bincode::serialize_into(&mut out, snapshot)?;
    bincode::serialize_into(&mut out, key)?;
    out.extend_from_slice(result_bytes);
    fsops::write_atomic(path, &out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn cache_path() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");
        (dir, path)
    }

    #[test]
    fn test_round_trip() {
        let (_dir, path) = cache_path();
        let snapshot = MonitorStateFileSet::default();
        write_cache::<u32, String>(&path, &snapshot, &7, &"result".to_string()).unwrap();

        let cache = read_cache::<u32, String>(&path).unwrap();
        assert_eq!(cache.snapshot, snapshot);
        assert_eq!(cache.key, 7);
        assert_eq!(cache.decode_result::<String>().unwrap(), "result");
    }

    #[test]
    fn test_missing_file() {
        let (_dir, path) = cache_path();
        assert!(matches!(
            read_cache::<u32, String>(&path),
            Err(ReadFailure::Missing)
        ));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let (_dir, path) = cache_path();
        fs::write(&path, b"not a cache file").unwrap();
        assert!(matches!(
            read_cache::<u32, String>(&path),
            Err(ReadFailure::Corrupt(_))
        ));
    }

    #[test]
    fn test_tag_covers_component_types() {
        let (_dir, path) = cache_path();
        let snapshot = MonitorStateFileSet::default();
        write_cache::<u32, String>(&path, &snapshot, &7, &"result".to_string()).unwrap();

        // Reading with a different key type must fail at the tag, not
        // misinterpret bytes.
        assert!(matches!(
            read_cache::<String, String>(&path),
            Err(ReadFailure::Corrupt(_))
        ));
        assert!(matches!(
            read_cache::<u32, u64>(&path),
            Err(ReadFailure::Corrupt(_))
        ));
    }

    #[test]
    fn test_result_decode_is_deferred() {
        let (_dir, path) = cache_path();
        let snapshot = MonitorStateFileSet::default();
        write_cache::<u32, String>(&path, &snapshot, &7, &"result".to_string()).unwrap();

        // Truncating the tail leaves the header decodable but the
        // result not.
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let cache = read_cache::<u32, String>(&path).unwrap();
        assert_eq!(cache.key, 7);
        assert!(cache.decode_result::<String>().is_err());
    }

    #[test]
    fn test_raw_rewrite_matches_full_encode() {
        let (_dir, path) = cache_path();
        let snapshot = MonitorStateFileSet::default();
        write_cache::<u32, String>(&path, &snapshot, &7, &"result".to_string()).unwrap();
        let full = fs::read(&path).unwrap();

        let (snapshot, key, result_bytes) = read_cache::<u32, String>(&path).unwrap().into_parts();
        write_cache_raw::<u32, String>(&path, &snapshot, &key, &result_bytes).unwrap();
        assert_eq!(fs::read(&path).unwrap(), full);
    }
}
