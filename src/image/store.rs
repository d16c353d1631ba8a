//! The image store facade: layers plus the index, under one root

use crate::{
    errors::ImageError,
    image::{History, Image, Index, LayerStore},
};
use std::{fs, path::Path};
use tokio::io::AsyncRead;

/// Image store rooted at a directory, owning the layer store and the index
pub struct Store {
    layers: LayerStore,
    index: Index,
}

impl Store {
    /// Open or create a store under `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Store, ImageError> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        Ok(Store {
            layers: LayerStore::new(root.join("layers"))?,
            index: Index::new(root.join("index.json")),
        })
    }

    /// Create a new image from the contents of `archive`, registered as `name`
    ///
    /// With a parent, the new layer stacks on top of the parent's layers and
    /// the parent is recorded on the new image.
    pub async fn import<R: AsyncRead + Unpin>(
        &self,
        name: &str,
        archive: R,
        parent: Option<&Image>,
    ) -> Result<Image, ImageError> {
        let layer = self.layers.add_layer(archive).await?;
        let mut layers = vec![layer];
        if let Some(parent) = parent {
            layers.extend(parent.layers.iter().cloned());
        }
        let source = parent.map(|p| p.id.as_str()).unwrap_or("");
        self.create(name, source, layers).await
    }

    /// Assemble an image value over existing layers and index it
    pub async fn create(
        &self,
        name: &str,
        source: &str,
        layers: Vec<String>,
    ) -> Result<Image, ImageError> {
        let image = Image::new(name, layers, source)?;
        self.index.add(name, &image).await?;
        Ok(image)
    }

    pub fn layers(&self) -> &LayerStore {
        &self.layers
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub async fn find(&self, id_or_name: &str) -> Option<Image> {
        self.index.find(id_or_name).await
    }

    pub async fn copy(&self, src: &str, dst: &str) -> Result<Image, ImageError> {
        self.index.copy(src, dst).await
    }

    pub async fn delete(&self, name: &str) -> Result<(), ImageError> {
        self.index.delete(name).await
    }

    pub async fn delete_match(&self, pattern: &str) -> Result<(), ImageError> {
        self.index.delete_match(pattern).await
    }

    pub async fn rename(&self, old: &str, new: &str) -> Result<(), ImageError> {
        self.index.rename(old, new).await
    }

    pub async fn names(&self) -> Vec<String> {
        self.index.names().await
    }

    pub async fn image_count(&self) -> usize {
        self.index.image_count().await
    }

    pub async fn all(&self) -> Vec<(String, History)> {
        self.index.all().await
    }
}
