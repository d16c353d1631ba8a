//! Container images, image identity, and per-name version history

#[cfg(test)] mod tests;

mod index;
mod layers;
mod store;

pub use index::Index;
pub use layers::LayerStore;
pub use store::Store;

use crate::errors::ImageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A named, immutable stack of filesystem layers
///
/// The id is a pure function of the name and the layer digests, so two
/// imports of the same content under the same name produce the same id.
/// Images refer to the image they were derived from by id string only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// `<name>:<hash>`, globally unique
    pub id: String,
    /// Layer digests, top to bottom
    pub layers: Vec<String>,
    /// Id of the image this one was derived from, or empty
    pub parent: String,
    pub created: DateTime<Utc>,
}

impl Image {
    /// Build a new image record over existing layers, timestamped now
    pub fn new(name: &str, layers: Vec<String>, parent: &str) -> Result<Image, ImageError> {
        let id = generate_image_id(name, &layers)?;
        Ok(Image {
            id,
            layers,
            parent: parent.to_string(),
            created: Utc::now(),
        })
    }

    /// A final image is a single layer; its id hash is the layer digest
    pub fn is_final(&self) -> bool {
        self.layers.len() == 1
    }

    /// The name component of the id
    pub fn name(&self) -> &str {
        match self.id.rfind(':') {
            Some(pos) => &self.id[..pos],
            None => &self.id,
        }
    }

    /// Id as shown to humans; intermediate snapshots get a trailing ellipsis
    pub fn display_id(&self) -> String {
        if self.is_final() {
            self.id.clone()
        } else {
            format!("{}...", self.id)
        }
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Derive an image id from its name and layer digests
///
/// A single layer contributes its digest directly; a layer stack hashes the
/// concatenation of its digests.
pub fn generate_image_id(name: &str, layers: &[String]) -> Result<String, ImageError> {
    if name.is_empty() {
        return Err(ImageError::IllegalName(name.to_string()));
    }
    if layers.is_empty() {
        return Err(ImageError::NoLayers);
    }
    let hash = if layers.len() == 1 {
        layers[0].clone()
    } else {
        let mut hasher = Sha256::new();
        for layer in layers {
            hasher.update(layer.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    };
    Ok(format!("{}:{}", name, hash))
}

/// Image versions sharing one name, most recent first
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct History(Vec<Image>);

impl History {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The most recently created image, if any
    pub fn latest(&self) -> Option<&Image> {
        self.0.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Image> {
        self.0.iter()
    }

    /// Insert an image, keeping creation order newest first
    pub fn add(&mut self, image: Image) {
        self.0.push(image);
        self.0.sort_by(|a, b| b.created.cmp(&a.created));
    }

    /// Remove the first image with a matching id
    pub fn del(&mut self, id: &str) {
        if let Some(pos) = self.0.iter().position(|image| image.id == id) {
            self.0.remove(pos);
        }
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a Image;
    type IntoIter = std::slice::Iter<'a, Image>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
