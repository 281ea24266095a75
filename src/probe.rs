use std::path::{Path, PathBuf};
use tracing::debug;

use crate::builder;
use crate::fsops;
use crate::merge::{merge_sorted, Merged};
use crate::paths::{self, DirKind, FileKind};
use crate::state::{FileHashCache, FileStatus, GlobState, MonitorStateFileSet, MonitorStateGlob};
use crate::MonitorError;

/// Outcome of probing a snapshot against the current filesystem.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// First monitored path found changed.
    Changed(PathBuf),
    /// Nothing changed. `snapshot` carries refreshed directory mtimes and
    /// newly discovered subtrees; worth persisting iff `cache_changed`.
    Unchanged {
        snapshot: MonitorStateFileSet,
        cache_changed: bool,
    },
}

/// Short-circuit carrier for the probe walk.
enum ProbeFailure {
    Changed(PathBuf),
    Error(MonitorError),
}

impl From<MonitorError> for ProbeFailure {
    fn from(e: MonitorError) -> Self {
        ProbeFailure::Error(e)
    }
}

type Probe<T> = std::result::Result<T, ProbeFailure>;

fn changed<T>(path: PathBuf) -> Probe<T> {
    Err(ProbeFailure::Changed(path))
}

/// Walk a snapshot and report either the first changed path or an
/// updated snapshot plus whether it is worth rewriting.
pub fn probe_file_set(root: &Path, snapshot: &MonitorStateFileSet) -> crate::Result<ProbeOutcome> {
    let mut cache_changed = false;
    match probe_all(&mut cache_changed, root, snapshot) {
        Ok(updated) => Ok(ProbeOutcome::Unchanged {
            snapshot: updated,
            cache_changed,
        }),
        Err(ProbeFailure::Changed(path)) => {
            debug!(path = %path.display(), "monitored path changed");
            Ok(ProbeOutcome::Changed(path))
        }
        Err(ProbeFailure::Error(e)) => Err(e),
    }
}

fn probe_all(
    cache_changed: &mut bool,
    root: &Path,
    snapshot: &MonitorStateFileSet,
) -> Probe<MonitorStateFileSet> {
    for f in &snapshot.files {
        probe_status(root, &f.path, &f.status)?;
    }
    let mut globs = Vec::with_capacity(snapshot.globs.len());
    for g in &snapshot.globs {
        let glob_root = g.root.resolve(root)?;
        let state = probe_glob(cache_changed, g.file, g.dir, &glob_root, Path::new(""), &g.state)?;
        globs.push(MonitorStateGlob {
            file: g.file,
            dir: g.dir,
            root: g.root.clone(),
            state,
        });
    }
    Ok(MonitorStateFileSet {
        files: snapshot.files.clone(),
        globs,
    })
}

/// Compare one recorded status against the filesystem. Stat and hash
/// failures read as unchanged: if the path is truly broken, the action
/// itself will surface the error on its next real run.
fn probe_status(base: &Path, path: &Path, status: &FileStatus) -> Probe<()> {
    let abs = base.join(path);
    let unchanged = match status {
        FileStatus::FileExists => fsops::file_exists(&abs),
        FileStatus::FileModTime(mtime) => match fsops::get_mtime(&abs) {
            Ok(current) => current == *mtime,
            Err(_) => true,
        },
        FileStatus::FileHashed(mtime, hash) => match fsops::get_mtime(&abs) {
            Ok(current) if current == *mtime => true,
            Ok(_) => match fsops::file_hash(&abs) {
                Ok(current) => current == *hash,
                Err(_) => true,
            },
            Err(_) => true,
        },
        FileStatus::DirExists => fsops::dir_exists(&abs),
        FileStatus::DirModTime(mtime) => match fsops::get_mtime(&abs) {
            Ok(current) => current == *mtime,
            Err(_) => true,
        },
        FileStatus::NonExistent => !fsops::file_exists(&abs) && !fsops::dir_exists(&abs),
        FileStatus::AlreadyChanged => false,
    };
    if unchanged {
        Ok(())
    } else {
        changed(path.to_path_buf())
    }
}

/// Probe one glob level in `dir` (relative to `glob_root`), returning
/// the refreshed level.
fn probe_glob(
    cache_changed: &mut bool,
    file_kind: FileKind,
    dir_kind: DirKind,
    glob_root: &Path,
    dir: &Path,
    state: &GlobState,
) -> Probe<GlobState> {
    match state {
        GlobState::DirTrailing => Ok(GlobState::DirTrailing),
        GlobState::Dirs {
            pieces,
            rest,
            mtime,
            children,
        } => {
            let abs = glob_root.join(dir);
            let (current, same) = match fsops::get_mtime(&abs) {
                Ok(c) => (c, c == *mtime),
                Err(_) => (*mtime, true),
            };
            let children = if same {
                let mut out = Vec::with_capacity(children.len());
                for (name, child) in children {
                    let probed = probe_glob(
                        cache_changed,
                        file_kind,
                        dir_kind,
                        glob_root,
                        &dir.join(name),
                        child,
                    )?;
                    out.push((name.clone(), probed));
                }
                out
            } else {
                // A deleted directory lists as empty here, so all of its
                // recorded children take the disappeared arm below.
                let names = fsops::dir_entries(&abs).unwrap_or_default();
                let matcher = paths::piece_matcher(pieces)?;
                let mut on_disk: Vec<String> = names
                    .into_iter()
                    .filter(|n| matcher.is_match(n) && fsops::dir_exists(&abs.join(n)))
                    .collect();
                on_disk.sort();

                let mut out = Vec::with_capacity(on_disk.len().max(children.len()));
                for merged in merge_sorted(children, &on_disk, |(n, _)| n.as_str(), |n| n.as_str())
                {
                    match merged {
                        Merged::InBoth((name, child), _) => {
                            let probed = probe_glob(
                                cache_changed,
                                file_kind,
                                dir_kind,
                                glob_root,
                                &dir.join(name),
                                child,
                            )?;
                            out.push((name.clone(), probed));
                        }
                        Merged::OnlyInLeft((name, child)) => {
                            let subdir = dir.join(name);
                            if let Some(file) = child.first_file(&subdir) {
                                return changed(file);
                            }
                            // The subtree matched nothing; keep the stale
                            // entry and skip the rewrite, since absent
                            // directories cost nothing to re-scan.
                            out.push((name.clone(), child.clone()));
                        }
                        Merged::OnlyInRight(name) => {
                            let subdir = dir.join(name);
                            let fresh = match builder::build_glob_state(
                                None,
                                &FileHashCache::default(),
                                file_kind,
                                dir_kind,
                                glob_root,
                                &subdir,
                                rest,
                            ) {
                                Ok(state) => state,
                                // A directory that appeared but cannot be
                                // scanned counts as a change at its path.
                                Err(_) => return changed(subdir),
                            };
                            if let Some(file) = fresh.first_file(&subdir) {
                                return changed(file);
                            }
                            // An empty new subtree is worth persisting:
                            // re-discovering it means a full scan.
                            *cache_changed = true;
                            out.push((name.clone(), fresh));
                        }
                    }
                }
                out
            };
            Ok(GlobState::Dirs {
                pieces: pieces.clone(),
                rest: rest.clone(),
                mtime: current,
                children,
            })
        }
        GlobState::Files {
            pieces,
            mtime,
            entries,
        } => {
            let abs = glob_root.join(dir);
            let (current, same) = match fsops::get_mtime(&abs) {
                Ok(c) => (c, c == *mtime),
                Err(_) => (*mtime, true),
            };
            if !same {
                let names = fsops::dir_entries(&abs).unwrap_or_default();
                let matcher = paths::piece_matcher(pieces)?;
                // Matched by name only, mirroring how the level was built.
                let mut on_disk: Vec<String> =
                    names.into_iter().filter(|n| matcher.is_match(n)).collect();
                on_disk.sort();
                for merged in merge_sorted(entries, &on_disk, |(n, _)| n.as_str(), |n| n.as_str())
                {
                    match merged {
                        Merged::InBoth(_, _) => {}
                        Merged::OnlyInLeft((name, _)) => return changed(dir.join(name)),
                        Merged::OnlyInRight(name) => return changed(dir.join(name)),
                    }
                }
            }
            // Still-present entries can have changed contents regardless
            // of the directory mtime.
            for (name, status) in entries {
                probe_status(glob_root, &dir.join(name), status)?;
            }
            Ok(GlobState::Files {
                pieces: pieces.clone(),
                mtime: current,
                entries: entries.clone(),
            })
        }
    }
}
