use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::fsops::{ContentHash, ModTime};
use crate::paths::{DirKind, FileKind, FilePathRoot, Glob, MonitorPath, RootedGlob};

/// Observed state of one monitored path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    FileExists,
    FileModTime(ModTime),
    FileHashed(ModTime, ContentHash),
    DirExists,
    DirModTime(ModTime),
    NonExistent,
    /// Recorded when the builder could not trust what it saw; the next
    /// probe reports a change unconditionally.
    AlreadyChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStateFile {
    pub file: FileKind,
    pub dir: DirKind,
    pub path: PathBuf,
    pub status: FileStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStateGlob {
    pub file: FileKind,
    pub dir: DirKind,
    pub root: FilePathRoot,
    pub state: GlobState,
}

/// Snapshot of one glob level. `children` and `entries` are sorted
/// ascending by basename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobState {
    Dirs {
        pieces: String,
        rest: Glob,
        mtime: ModTime,
        children: Vec<(String, GlobState)>,
    },
    Files {
        pieces: String,
        mtime: ModTime,
        entries: Vec<(String, FileStatus)>,
    },
    DirTrailing,
}

impl GlobState {
    /// The glob this level was built from.
    pub fn glob(&self) -> Glob {
        match self {
            GlobState::Dirs { pieces, rest, .. } => {
                Glob::Dir(pieces.clone(), Box::new(rest.clone()))
            }
            GlobState::Files { pieces, .. } => Glob::File(pieces.clone()),
            GlobState::DirTrailing => Glob::DirTrailing,
        }
    }

    /// First file recorded anywhere under this subtree, as a path
    /// relative to the glob root. `None` means the subtree matched no
    /// files when it was scanned.
    pub fn first_file(&self, dir: &Path) -> Option<PathBuf> {
        match self {
            GlobState::Dirs { children, .. } => children
                .iter()
                .find_map(|(name, child)| child.first_file(&dir.join(name))),
            GlobState::Files { entries, .. } => {
                entries.first().map(|(name, _)| dir.join(name))
            }
            GlobState::DirTrailing => None,
        }
    }

    fn collect_hashes(&self, dir: &Path, out: &mut FileHashCache) {
        match self {
            GlobState::Dirs { children, .. } => {
                for (name, child) in children {
                    child.collect_hashes(&dir.join(name), out);
                }
            }
            GlobState::Files { entries, .. } => {
                for (name, status) in entries {
                    if let FileStatus::FileHashed(mtime, hash) = status {
                        out.insert(dir.join(name), (*mtime, *hash));
                    }
                }
            }
            GlobState::DirTrailing => {}
        }
    }
}

/// Filesystem snapshot of every declared monitor path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStateFileSet {
    pub files: Vec<MonitorStateFile>,
    pub globs: Vec<MonitorStateGlob>,
}

/// Hashes salvaged from a previous snapshot, keyed by the path as it was
/// recorded there (declared path for singles, glob-root-relative path
/// for glob entries). Builder lookups construct keys the same way.
pub type FileHashCache = HashMap<PathBuf, (ModTime, ContentHash)>;

impl MonitorStateFileSet {
    /// Reconstruct the declared paths this snapshot was built from.
    pub fn monitor_paths(&self) -> Vec<MonitorPath> {
        let mut out = Vec::with_capacity(self.files.len() + self.globs.len());
        for f in &self.files {
            out.push(MonitorPath::Single {
                file: f.file,
                dir: f.dir,
                path: f.path.clone(),
            });
        }
        for g in &self.globs {
            out.push(MonitorPath::Globbed {
                file: g.file,
                dir: g.dir,
                glob: RootedGlob::new(g.root.clone(), g.state.glob()),
            });
        }
        out
    }

    /// Every recorded `(mtime, hash)` pair, for reuse by the next build.
    pub fn file_hashes(&self) -> FileHashCache {
        let mut out = FileHashCache::new();
        for f in &self.files {
            if let FileStatus::FileHashed(mtime, hash) = &f.status {
                out.insert(f.path.clone(), (*mtime, *hash));
            }
        }
        for g in &self.globs {
            g.state.collect_hashes(Path::new(""), &mut out);
        }
        out
    }
}

/// Cached hash for `path`, valid only if the recorded mtime matches.
pub fn lookup_hash(cache: &FileHashCache, path: &Path, mtime: ModTime) -> Option<ContentHash> {
    match cache.get(path) {
        Some((m, h)) if *m == mtime => Some(*h),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn mt(secs: u64) -> ModTime {
        ModTime::from(UNIX_EPOCH + Duration::from_secs(secs))
    }

    fn hash(bytes: &[u8]) -> ContentHash {
        blake3::hash(bytes).into()
    }

    fn sample_set() -> MonitorStateFileSet {
        MonitorStateFileSet {
            files: vec![MonitorStateFile {
                file: FileKind::Hashed,
                dir: DirKind::NotExists,
                path: PathBuf::from("a"),
                status: FileStatus::FileHashed(mt(10), hash(b"a")),
            }],
            globs: vec![MonitorStateGlob {
                file: FileKind::Hashed,
                dir: DirKind::NotExists,
                root: FilePathRoot::Relative,
                state: GlobState::Dirs {
                    pieces: "*".into(),
                    rest: Glob::File("x.txt".into()),
                    mtime: mt(5),
                    children: vec![(
                        "d1".into(),
                        GlobState::Files {
                            pieces: "x.txt".into(),
                            mtime: mt(6),
                            entries: vec![(
                                "x.txt".into(),
                                FileStatus::FileHashed(mt(7), hash(b"x")),
                            )],
                        },
                    )],
                },
            }],
        }
    }

    #[test]
    fn test_monitor_paths_reconstruction() {
        let paths = sample_set().monitor_paths();
        assert_eq!(
            paths,
            vec![
                MonitorPath::file_hashed("a"),
                MonitorPath::glob_hashed("./*/x.txt".parse().unwrap()),
            ]
        );
    }

    #[test]
    fn test_file_hashes_extraction() {
        let hashes = sample_set().file_hashes();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[&PathBuf::from("a")], (mt(10), hash(b"a")));
        assert_eq!(hashes[&PathBuf::from("d1/x.txt")], (mt(7), hash(b"x")));
    }

    #[test]
    fn test_lookup_hash_requires_matching_mtime() {
        let cache = sample_set().file_hashes();
        assert_eq!(
            lookup_hash(&cache, Path::new("a"), mt(10)),
            Some(hash(b"a"))
        );
        assert_eq!(lookup_hash(&cache, Path::new("a"), mt(11)), None);
        assert_eq!(lookup_hash(&cache, Path::new("b"), mt(10)), None);
    }

    #[test]
    fn test_first_file() {
        let set = sample_set();
        assert_eq!(
            set.globs[0].state.first_file(Path::new("")),
            Some(PathBuf::from("d1/x.txt"))
        );
        let empty = GlobState::Files {
            pieces: "x.txt".into(),
            mtime: mt(1),
            entries: vec![],
        };
        assert_eq!(empty.first_file(Path::new("d2")), None);
    }
}
