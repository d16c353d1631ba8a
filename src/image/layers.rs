//! Content-addressed storage for immutable filesystem layers
//!
//! A layer arrives as a tar stream, is spooled to a temp file while its
//! digest is computed, and is extracted into a directory named by that
//! digest. Identical input streams land in the same directory, so re-imports
//! are deduplicated for free.

use crate::{errors::ImageError, filesystem::archive};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::{
    fs,
    io,
    path::{Path, PathBuf},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    task,
};

const SPOOL_PREFIX: &str = ".spool-";

pub struct LayerStore {
    root: PathBuf,
}

impl LayerStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<LayerStore, ImageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(LayerStore { root })
    }

    /// Extract a tar stream into a fresh layer, returning its digest
    ///
    /// The digest is the sha256 of the raw stream bytes, so it is stable and
    /// reproducible for identical inputs. Gzip-compressed streams are
    /// accepted and sniffed by their magic bytes.
    pub async fn add_layer<R: AsyncRead + Unpin>(&self, mut archive: R) -> Result<String, ImageError> {
        let spool = self
            .root
            .join(format!("{}{:08x}", SPOOL_PREFIX, rand::thread_rng().gen::<u32>()));
        let mut hasher = Sha256::new();
        let spooled = async {
            let mut file = tokio::fs::File::create(&spool).await?;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let len = archive.read(&mut buf).await?;
                if len == 0 {
                    break;
                }
                hasher.update(&buf[..len]);
                file.write_all(&buf[..len]).await?;
            }
            file.flush().await?;
            Ok::<(), io::Error>(())
        }
        .await;
        if let Err(err) = spooled {
            fs::remove_file(&spool).ok();
            return Err(err.into());
        }

        let digest = format!("{:x}", hasher.finalize());
        let dir = self.root.join(&digest);
        if dir.exists() {
            log::debug!("layer {} is already stored, reusing it", digest);
        } else {
            let tar_path = spool.clone();
            let dest = dir.clone();
            let unpacked = task::spawn_blocking(move || archive::extract(&tar_path, &dest))
                .await
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
            if let Err(err) = unpacked {
                // do not leave a half-extracted layer behind under its digest
                fs::remove_dir_all(&dir).ok();
                fs::remove_file(&spool).ok();
                return Err(err.into());
            }
            log::debug!("layer {} extracted to {:?}", digest, dir);
        }
        fs::remove_file(&spool)?;
        Ok(digest)
    }

    /// Digests of every stored layer, ascending
    pub fn list(&self) -> Result<Vec<String>, ImageError> {
        let mut digests = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(SPOOL_PREFIX) {
                continue;
            }
            digests.push(name);
        }
        digests.sort();
        Ok(digests)
    }

    /// Remove a stored layer
    ///
    /// This is the only removal path; nothing collects layers behind the
    /// index's back.
    pub fn delete(&self, digest: &str) -> Result<(), ImageError> {
        let dir = self.root.join(digest);
        if !dir.is_dir() {
            return Err(ImageError::NoSuchLayer(digest.to_string()));
        }
        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    /// Storage path of a layer directory
    pub fn path(&self, digest: &str) -> PathBuf {
        self.root.join(digest)
    }

    pub fn exists(&self, digest: &str) -> bool {
        self.root.join(digest).is_dir()
    }
}
