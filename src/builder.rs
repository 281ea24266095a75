use std::path::Path;
use tracing::warn;

use crate::fsops::{self, ModTime};
use crate::monitor::MonitorTimestamp;
use crate::paths::{self, DirKind, FileKind, Glob, MonitorPath};
use crate::state::{
    lookup_hash, FileHashCache, FileStatus, GlobState, MonitorStateFile, MonitorStateFileSet,
    MonitorStateGlob,
};
use crate::{MonitorError, Result};

/// Inspect the filesystem and produce a fresh snapshot of `paths`.
///
/// `started` is the timestamp taken with `begin_update` before the
/// monitored action began; any file whose mtime is later than it is
/// recorded as already changed.
pub fn build_file_set(
    started: Option<MonitorTimestamp>,
    hash_cache: &FileHashCache,
    root: &Path,
    paths: &[MonitorPath],
) -> Result<MonitorStateFileSet> {
    let mut set = MonitorStateFileSet::default();
    for declared in paths {
        match declared {
            MonitorPath::Single { file, dir, path } => {
                let status = build_file_status(started, hash_cache, *file, *dir, root, path);
                set.files.push(MonitorStateFile {
                    file: *file,
                    dir: *dir,
                    path: path.clone(),
                    status,
                });
            }
            MonitorPath::Globbed { file, dir, glob } => {
                let glob_root = glob.root.resolve(root)?;
                let state = build_glob_state(
                    started,
                    hash_cache,
                    *file,
                    *dir,
                    &glob_root,
                    Path::new(""),
                    &glob.glob,
                )?;
                set.globs.push(MonitorStateGlob {
                    file: *file,
                    dir: *dir,
                    root: glob.root.clone(),
                    state,
                });
            }
        }
    }
    Ok(set)
}

/// Stat `path` under `root` as file and as directory, then dispatch on
/// the declared kinds. I/O failures while reading mtimes or hashing
/// degrade to `AlreadyChanged` so the next check re-runs the action.
pub fn build_file_status(
    started: Option<MonitorTimestamp>,
    hash_cache: &FileHashCache,
    file_kind: FileKind,
    dir_kind: DirKind,
    root: &Path,
    path: &Path,
) -> FileStatus {
    let abs = root.join(path);
    let is_file = fsops::file_exists(&abs);
    let is_dir = fsops::dir_exists(&abs);

    if !is_file && !is_dir {
        return if file_kind == FileKind::NotExists && dir_kind == DirKind::NotExists {
            FileStatus::NonExistent
        } else {
            // Something was required to be present.
            FileStatus::AlreadyChanged
        };
    }
    if is_file {
        match file_kind {
            FileKind::Exists => return FileStatus::FileExists,
            FileKind::ModTime => {
                return match checked_mtime(started, &abs) {
                    Some(mtime) => FileStatus::FileModTime(mtime),
                    None => FileStatus::AlreadyChanged,
                }
            }
            FileKind::Hashed => return build_hashed_status(started, hash_cache, &abs, path),
            FileKind::NotExists => {} // fall through to the directory kinds
        }
    }
    if is_dir {
        match dir_kind {
            DirKind::Exists => return FileStatus::DirExists,
            DirKind::ModTime => {
                return match checked_mtime(started, &abs) {
                    Some(mtime) => FileStatus::DirModTime(mtime),
                    None => FileStatus::AlreadyChanged,
                }
            }
            DirKind::NotExists => {}
        }
    }
    // Something is present where the declaration required absence.
    FileStatus::AlreadyChanged
}

/// Mtime of `abs`, or `None` when it cannot be read or postdates the
/// action start.
fn checked_mtime(started: Option<MonitorTimestamp>, abs: &Path) -> Option<ModTime> {
    match fsops::get_mtime(abs) {
        Ok(mtime) if changed_during_update(started, mtime) => None,
        Ok(mtime) => Some(mtime),
        Err(err) => {
            warn!(path = %abs.display(), %err, "stat failed during snapshot");
            None
        }
    }
}

fn build_hashed_status(
    started: Option<MonitorTimestamp>,
    hash_cache: &FileHashCache,
    abs: &Path,
    rel: &Path,
) -> FileStatus {
    let mtime = match checked_mtime(started, abs) {
        Some(mtime) => mtime,
        None => return FileStatus::AlreadyChanged,
    };
    if let Some(hash) = lookup_hash(hash_cache, rel, mtime) {
        return FileStatus::FileHashed(mtime, hash);
    }
    match fsops::file_hash(abs) {
        Ok(hash) => FileStatus::FileHashed(mtime, hash),
        Err(err) => {
            warn!(path = %abs.display(), %err, "hash failed during snapshot");
            FileStatus::AlreadyChanged
        }
    }
}

/// Snapshot one glob level rooted at `glob_root`, in directory `dir`
/// (relative to the glob root).
pub fn build_glob_state(
    started: Option<MonitorTimestamp>,
    hash_cache: &FileHashCache,
    file_kind: FileKind,
    dir_kind: DirKind,
    glob_root: &Path,
    dir: &Path,
    glob: &Glob,
) -> Result<GlobState> {
    match glob {
        Glob::DirTrailing => Ok(GlobState::DirTrailing),
        Glob::Recursive => Err(MonitorError::UnsupportedGlob(glob.to_string())),
        Glob::Dir(pieces, rest) => {
            let abs = glob_root.join(dir);
            let names = fsops::dir_entries(&abs)?;
            let mtime = fsops::get_mtime(&abs)?;
            let matcher = paths::piece_matcher(pieces)?;
            let mut subdirs: Vec<String> = names
                .into_iter()
                .filter(|n| matcher.is_match(n) && fsops::dir_exists(&abs.join(n)))
                .collect();
            subdirs.sort();
            let mut children = Vec::with_capacity(subdirs.len());
            for name in subdirs {
                let child = build_glob_state(
                    started,
                    hash_cache,
                    file_kind,
                    dir_kind,
                    glob_root,
                    &dir.join(&name),
                    rest,
                )?;
                children.push((name, child));
            }
            Ok(GlobState::Dirs {
                pieces: pieces.clone(),
                rest: (**rest).clone(),
                mtime,
                children,
            })
        }
        Glob::File(pieces) => {
            let abs = glob_root.join(dir);
            let names = fsops::dir_entries(&abs)?;
            let mtime = fsops::get_mtime(&abs)?;
            let matcher = paths::piece_matcher(pieces)?;
            // Matched by name only; whether each entry is a file or a
            // directory is settled by the kind dispatch below.
            let mut matches: Vec<String> =
                names.into_iter().filter(|n| matcher.is_match(n)).collect();
            matches.sort();
            let mut entries = Vec::with_capacity(matches.len());
            for name in matches {
                let rel = dir.join(&name);
                let status =
                    build_file_status(started, hash_cache, file_kind, dir_kind, glob_root, &rel);
                entries.push((name, status));
            }
            Ok(GlobState::Files {
                pieces: pieces.clone(),
                mtime,
                entries,
            })
        }
    }
}

/// True iff the action started before `mtime`, i.e. the file may have
/// been written while the action was already reading inputs.
pub fn changed_during_update(started: Option<MonitorTimestamp>, mtime: ModTime) -> bool {
    matches!(started, Some(t) if mtime > t.0)
}
