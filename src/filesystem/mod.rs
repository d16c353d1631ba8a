//! Per-container filesystem views over stacked layers

pub mod archive;
pub mod changes;
pub mod driver;

pub use changes::{Change, ChangeKind};

use crate::errors::FsError;
use driver::MountKind;
use std::{
    fs,
    path::{Component, Path, PathBuf},
    sync::Mutex,
};

/// One container's view of its layer stack
///
/// The view owns three directories under the container: the RW layer, the
/// overlay work directory, and the mount root where the assembled tree
/// appears. Mount state is tracked here so repeated mounts never stack.
pub struct Filesystem {
    root: PathBuf,
    rw: PathBuf,
    work: PathBuf,
    layers: Vec<PathBuf>,
    mounted: Mutex<Option<MountKind>>,
}

impl Filesystem {
    /// Open a view under a container directory, creating its directories
    pub fn new(base: &Path, layers: Vec<PathBuf>) -> Result<Filesystem, FsError> {
        let view = Filesystem {
            root: base.join("rootfs"),
            rw: base.join("rw"),
            work: base.join("work"),
            layers,
            mounted: Mutex::new(None),
        };
        fs::create_dir_all(&view.root)?;
        fs::create_dir_all(&view.rw)?;
        fs::create_dir_all(&view.work)?;
        Ok(view)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rw_path(&self) -> &Path {
        &self.rw
    }

    pub fn layers(&self) -> &[PathBuf] {
        &self.layers
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.lock().unwrap().is_some()
    }

    /// Assemble the stack onto the mount root; mounting twice is a no-op
    pub fn mount(&self) -> Result<(), FsError> {
        let mut mounted = self.mounted.lock().unwrap();
        if mounted.is_none() {
            *mounted = Some(driver::mount(&self.layers, &self.rw, &self.work, &self.root)?);
        }
        Ok(())
    }

    /// Tear the mount down; unmounting an unmounted view is a no-op
    pub fn umount(&self) -> Result<(), FsError> {
        let mut mounted = self.mounted.lock().unwrap();
        if let Some(kind) = mounted.take() {
            driver::unmount(&self.root, kind)?;
        }
        Ok(())
    }

    /// Open a file inside the assembled tree
    ///
    /// The path is taken relative to the mount root; components that would
    /// climb out of it are rejected.
    pub async fn open_file(
        &self,
        path: &str,
        options: &tokio::fs::OpenOptions,
    ) -> Result<tokio::fs::File, FsError> {
        self.mount()?;
        let resolved = self.resolve(path)?;
        Ok(options.open(resolved).await?)
    }

    /// Base names of a directory inside the assembled tree, ascending
    pub async fn read_dir(&self, path: &str) -> Result<Vec<String>, FsError> {
        self.mount()?;
        let resolved = self.resolve(path)?;
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(resolved).await?;
        while let Some(entry) = dir.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    /// Archive the entire assembled tree as an uncompressed tar
    ///
    /// Readable while the container runs; the result is a volatile snapshot.
    pub fn tar(&self) -> Result<Vec<u8>, FsError> {
        self.mount()?;
        Ok(archive::tar_dir(&self.root)?)
    }

    /// Enumerate the RW layer's changes against the image layers
    pub fn changes(&self) -> Result<Vec<Change>, FsError> {
        Ok(changes::changes(&self.rw, &self.layers)?)
    }

    /// Discard the RW layer, recreating it empty
    ///
    /// Callers must ensure the container is not running.
    pub fn reset(&self) -> Result<(), FsError> {
        self.umount()?;
        fs::remove_dir_all(&self.rw)?;
        fs::create_dir_all(&self.rw)?;
        Ok(())
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, FsError> {
        let mut clean = PathBuf::new();
        for component in Path::new(path).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(FsError::PathEscape(path.to_string()));
                }
                Component::Normal(name) => clean.push(name),
            }
        }
        Ok(self.root.join(clean))
    }
}
