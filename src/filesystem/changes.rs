//! Change detection between a container's RW layer and its image layers
//!
//! Union drivers record every mutation inside the RW layer: new and changed
//! files appear there directly, deletions leave a whiteout marker (a `.wh.`
//! prefixed entry, or a 0:0 character device for overlay). Walking the RW
//! layer alone is therefore enough to enumerate the container's changes.

use serde::Serialize;
use std::{
    ffi::OsStr,
    fmt, fs, io,
    os::unix::fs::{FileTypeExt, MetadataExt},
    path::{Path, PathBuf},
};

const WHITEOUT_PREFIX: &str = ".wh.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

/// One filesystem change, with a container-absolute path
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ChangeKind::Add => "Add",
            ChangeKind::Modify => "Modify",
            ChangeKind::Delete => "Delete",
        };
        write!(f, "{} {}", kind, self.path.display())
    }
}

/// Walk the RW layer and report its changes against the image layers, sorted
/// by path
pub fn changes(rw: &Path, layers: &[PathBuf]) -> io::Result<Vec<Change>> {
    let mut found = Vec::new();
    walk(rw, Path::new("/"), layers, &mut found)?;
    found.sort_by(|a, b| a.path.cmp(&b.path).then(a.kind.cmp(&b.kind)));
    Ok(found)
}

fn walk(dir: &Path, rel: &Path, layers: &[PathBuf], out: &mut Vec<Change>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let meta = entry.metadata()?;
        match whiteout_target(&name, &meta) {
            Whiteout::Admin => continue,
            Whiteout::Delete(original) => {
                out.push(Change {
                    kind: ChangeKind::Delete,
                    path: rel.join(original),
                });
            }
            Whiteout::None => {
                let path = rel.join(&name);
                let kind = if exists_in_layers(layers, &path) {
                    ChangeKind::Modify
                } else {
                    ChangeKind::Add
                };
                out.push(Change {
                    kind,
                    path: path.clone(),
                });
                if meta.is_dir() {
                    walk(&entry.path(), &path, layers, out)?;
                }
            }
        }
    }
    Ok(())
}

enum Whiteout {
    None,
    /// driver bookkeeping entry, not a user-visible change
    Admin,
    Delete(String),
}

fn whiteout_target(name: &OsStr, meta: &fs::Metadata) -> Whiteout {
    // overlay marks deletions with a 0:0 character device of the same name
    if meta.file_type().is_char_device() && meta.rdev() == 0 {
        return Whiteout::Delete(name.to_string_lossy().to_string());
    }
    let name = name.to_string_lossy();
    if let Some(original) = name.strip_prefix(WHITEOUT_PREFIX) {
        if original.starts_with(WHITEOUT_PREFIX) {
            return Whiteout::Admin;
        }
        return Whiteout::Delete(original.to_string());
    }
    Whiteout::None
}

fn exists_in_layers(layers: &[PathBuf], path: &Path) -> bool {
    let rel: PathBuf = path.components().skip(1).collect();
    layers
        .iter()
        .any(|layer| layer.join(&rel).symlink_metadata().is_ok())
}
