use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::MonitorError;

/// What to check about a monitored path if a file is found there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    NotExists,
    Exists,
    ModTime,
    Hashed,
}

/// What to check about a monitored path if a directory is found there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirKind {
    NotExists,
    Exists,
    ModTime,
}

/// A declared input: a single path or a rooted glob, each carrying what
/// to record when a file or a directory is found at the location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorPath {
    Single {
        file: FileKind,
        dir: DirKind,
        path: PathBuf,
    },
    Globbed {
        file: FileKind,
        dir: DirKind,
        glob: RootedGlob,
    },
}

impl MonitorPath {
    /// Monitor a file's existence.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::single(FileKind::Exists, DirKind::NotExists, path)
    }

    /// Monitor a file's modification time.
    pub fn file_mtime(path: impl Into<PathBuf>) -> Self {
        Self::single(FileKind::ModTime, DirKind::NotExists, path)
    }

    /// Monitor a file's modification time and content hash.
    pub fn file_hashed(path: impl Into<PathBuf>) -> Self {
        Self::single(FileKind::Hashed, DirKind::NotExists, path)
    }

    /// Require that nothing exists at the path.
    pub fn non_existent(path: impl Into<PathBuf>) -> Self {
        Self::single(FileKind::NotExists, DirKind::NotExists, path)
    }

    /// Monitor a directory's existence.
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self::single(FileKind::NotExists, DirKind::Exists, path)
    }

    /// Monitor a directory's modification time.
    pub fn directory_mtime(path: impl Into<PathBuf>) -> Self {
        Self::single(FileKind::NotExists, DirKind::ModTime, path)
    }

    /// Monitor existence of either a file or a directory.
    pub fn file_or_directory(path: impl Into<PathBuf>) -> Self {
        Self::single(FileKind::Exists, DirKind::Exists, path)
    }

    /// Monitor the files matched by a glob, by modification time.
    pub fn glob(glob: RootedGlob) -> Self {
        Self::globbed(FileKind::ModTime, DirKind::NotExists, glob)
    }

    /// Monitor the files matched by a glob, by existence only.
    pub fn glob_existence(glob: RootedGlob) -> Self {
        Self::globbed(FileKind::Exists, DirKind::NotExists, glob)
    }

    /// Monitor the files matched by a glob, by content hash.
    pub fn glob_hashed(glob: RootedGlob) -> Self {
        Self::globbed(FileKind::Hashed, DirKind::NotExists, glob)
    }

    pub fn single(file: FileKind, dir: DirKind, path: impl Into<PathBuf>) -> Self {
        MonitorPath::Single {
            file,
            dir,
            path: path.into(),
        }
    }

    pub fn globbed(file: FileKind, dir: DirKind, glob: RootedGlob) -> Self {
        MonitorPath::Globbed { file, dir, glob }
    }
}

/// Where a glob is anchored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilePathRoot {
    /// Resolved against the root passed to `check`/`update`.
    Relative,
    Absolute(PathBuf),
    HomeDir,
    /// Windows drive prefix, e.g. `"C:"`.
    Drive(String),
}

impl FilePathRoot {
    pub(crate) fn resolve(&self, relative_root: &Path) -> crate::Result<PathBuf> {
        match self {
            FilePathRoot::Relative => Ok(relative_root.to_path_buf()),
            FilePathRoot::Absolute(p) => Ok(p.clone()),
            FilePathRoot::HomeDir => home_dir().ok_or(MonitorError::HomeDirNotFound),
            FilePathRoot::Drive(prefix) => Ok(PathBuf::from(format!("{prefix}/"))),
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// One level of a glob. Each level's `pieces` is a pattern matched
/// against basenames only; path separators never occur inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Glob {
    /// Match directories at this level, continue below.
    Dir(String, Box<Glob>),
    /// Match files at this level.
    File(String),
    /// The trailing-slash form: the containing directory itself.
    DirTrailing,
    /// `**`. Representable, but rejected by the snapshot builder.
    Recursive,
}

impl fmt::Display for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Glob::Dir(pieces, rest) => write!(f, "{pieces}/{rest}"),
            Glob::File(pieces) => write!(f, "{pieces}"),
            Glob::DirTrailing => Ok(()),
            Glob::Recursive => write!(f, "**"),
        }
    }
}

/// A glob pattern anchored at a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootedGlob {
    pub root: FilePathRoot,
    pub glob: Glob,
}

impl RootedGlob {
    pub fn new(root: FilePathRoot, glob: Glob) -> Self {
        RootedGlob { root, glob }
    }
}

impl FromStr for RootedGlob {
    type Err = MonitorError;

    /// Textual form, `/`-separated: `"./src/*.rs"`, `"~/x/*.c"`,
    /// `"/etc/*.conf"`, `"C:/t/*.h"`, trailing `"build/"` for the
    /// directory itself. Every piece is validated eagerly.
    fn from_str(s: &str) -> crate::Result<Self> {
        let (root, rest) = split_root(s);
        let comps: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };
        let glob = parse_components(s, &comps)?;
        Ok(RootedGlob { root, glob })
    }
}

impl fmt::Display for RootedGlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            FilePathRoot::Relative => write!(f, "./")?,
            FilePathRoot::HomeDir => write!(f, "~/")?,
            FilePathRoot::Absolute(p) => {
                let s = p.display().to_string();
                if s.ends_with('/') {
                    write!(f, "{s}")?;
                } else {
                    write!(f, "{s}/")?;
                }
            }
            FilePathRoot::Drive(prefix) => write!(f, "{prefix}/")?,
        }
        write!(f, "{}", self.glob)
    }
}

fn split_root(s: &str) -> (FilePathRoot, &str) {
    if let Some(rest) = s.strip_prefix("~/") {
        (FilePathRoot::HomeDir, rest)
    } else if s == "~" {
        (FilePathRoot::HomeDir, "")
    } else if let Some(rest) = s.strip_prefix('/') {
        (FilePathRoot::Absolute(PathBuf::from("/")), rest)
    } else if is_drive_rooted(s) {
        (
            FilePathRoot::Drive(s[..2].to_string()),
            s[2..].trim_start_matches('/'),
        )
    } else {
        (FilePathRoot::Relative, s.strip_prefix("./").unwrap_or(s))
    }
}

fn is_drive_rooted(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes.len() == 2 || bytes[2] == b'/')
}

fn parse_components(original: &str, comps: &[&str]) -> crate::Result<Glob> {
    let (piece, rest) = match comps.split_first() {
        None => return Ok(Glob::DirTrailing),
        Some(split) => split,
    };
    if piece.is_empty() {
        if rest.is_empty() {
            // Trailing slash.
            return Ok(Glob::DirTrailing);
        }
        return Err(MonitorError::GlobParse {
            glob: original.to_string(),
            reason: "empty path component".to_string(),
        });
    }
    if *piece == "." {
        return parse_components(original, rest);
    }
    if *piece == "**" {
        if rest.is_empty() {
            return Ok(Glob::Recursive);
        }
        return Err(MonitorError::GlobParse {
            glob: original.to_string(),
            reason: "`**` must be the final component".to_string(),
        });
    }
    validate_piece(original, piece)?;
    if rest.is_empty() {
        Ok(Glob::File(piece.to_string()))
    } else {
        Ok(Glob::Dir(
            piece.to_string(),
            Box::new(parse_components(original, rest)?),
        ))
    }
}

fn validate_piece(original: &str, piece: &str) -> crate::Result<()> {
    GlobBuilder::new(piece)
        .build()
        .map_err(|e| MonitorError::GlobParse {
            glob: original.to_string(),
            reason: e.to_string(),
        })?;
    Ok(())
}

/// Compile one glob level for matching basenames.
pub(crate) fn piece_matcher(pieces: &str) -> crate::Result<GlobMatcher> {
    Ok(GlobBuilder::new(pieces).build()?.compile_matcher())
}
