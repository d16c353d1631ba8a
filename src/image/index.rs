//! The persistent image catalog
//!
//! The index on disk is the source of truth: every operation reloads the
//! document, mutates it in memory, and writes it back atomically. The lock
//! makes the load-mutate-save section exclusive within one daemon; last
//! writer wins at whole-operation granularity.

use crate::{
    errors::ImageError,
    image::{generate_image_id, History, Image},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tokio::sync::Mutex;

/// The serialized form of the whole catalog
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndexDoc {
    pub by_name: BTreeMap<String, History>,
    pub by_id: BTreeMap<String, Image>,
}

/// Bidirectional name/id catalog persisted as a single json document
pub struct Index {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Index {
    pub fn new<P: AsRef<Path>>(path: P) -> Index {
        Index {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Read the current document; a missing or unreadable file is empty
    fn load(&self) -> IndexDoc {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("unreadable index at {:?}: {}", self.path, err);
                }
                return IndexDoc::default();
            }
        };
        match serde_json::from_slice(&data) {
            Ok(doc) => doc,
            Err(err) => {
                log::warn!("invalid index document at {:?}, treating as empty: {}", self.path, err);
                IndexDoc::default()
            }
        }
    }

    /// Write the document back, atomically via a temp file rename
    fn save(&self, doc: &IndexDoc) -> Result<(), ImageError> {
        let data = serde_json::to_vec(doc)?;
        let temp = self.path.with_extension("tmp");
        fs::write(&temp, &data)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }

    /// Register an image under a name
    ///
    /// Re-adding the image that is already the newest version of the name is
    /// a no-op, not an error.
    pub async fn add(&self, name: &str, image: &Image) -> Result<(), ImageError> {
        if name.is_empty() || image.id.is_empty() {
            return Err(ImageError::IllegalName(name.to_string()));
        }
        let _guard = self.lock.lock().await;
        let mut doc = self.load();
        add_to(&mut doc, name, image);
        self.save(&doc)
    }

    /// Look up an image by id first, then by name (returning the newest)
    pub async fn find(&self, id_or_name: &str) -> Option<Image> {
        let _guard = self.lock.lock().await;
        let doc = self.load();
        find_in(&doc, id_or_name)
    }

    /// Register a copy of an existing image under a new name
    ///
    /// The copy shares the source's layers and records the source as parent.
    pub async fn copy(&self, src: &str, dst: &str) -> Result<Image, ImageError> {
        if src.is_empty() || dst.is_empty() {
            return Err(ImageError::IllegalName(dst.to_string()));
        }
        let _guard = self.lock.lock().await;
        let mut doc = self.load();
        let source = find_in(&doc, src).ok_or_else(|| ImageError::NoSuchImage(src.to_string()))?;
        let image = Image::new(dst, source.layers.clone(), &source.id)?;
        add_to(&mut doc, dst, &image);
        self.save(&doc)?;
        Ok(image)
    }

    /// Move a whole history to a new name, rewriting every image id
    pub async fn rename(&self, old: &str, new: &str) -> Result<(), ImageError> {
        if old.is_empty() || new.is_empty() {
            return Err(ImageError::IllegalName(new.to_string()));
        }
        let _guard = self.lock.lock().await;
        let mut doc = self.load();
        if doc.by_name.contains_key(new) {
            return Err(ImageError::NameInUse(new.to_string()));
        }
        let history = doc
            .by_name
            .remove(old)
            .ok_or_else(|| ImageError::NoSuchImage(old.to_string()))?;
        // Ids embed the name, so each image in the history gets a new one
        let mut renamed = History::default();
        for image in &history {
            let mut image = image.clone();
            let old_id = image.id.clone();
            image.id = generate_image_id(new, &image.layers)?;
            doc.by_id.remove(&old_id);
            doc.by_id.insert(image.id.clone(), image.clone());
            renamed.add(image);
        }
        doc.by_name.insert(new.to_string(), renamed);
        self.save(&doc)
    }

    /// Remove every image registered under a name
    pub async fn delete(&self, name: &str) -> Result<(), ImageError> {
        if name.is_empty() {
            return Err(ImageError::IllegalName(name.to_string()));
        }
        let _guard = self.lock.lock().await;
        let mut doc = self.load();
        let history = doc
            .by_name
            .remove(name)
            .ok_or_else(|| ImageError::NoSuchImage(name.to_string()))?;
        for image in &history {
            doc.by_id.remove(&image.id);
        }
        self.save(&doc)
    }

    /// Remove every name matching a regular expression
    pub async fn delete_match(&self, pattern: &str) -> Result<(), ImageError> {
        let re = Regex::new(pattern)?;
        let _guard = self.lock.lock().await;
        let mut doc = self.load();
        let names: Vec<String> = doc
            .by_name
            .keys()
            .filter(|name| re.is_match(name))
            .cloned()
            .collect();
        for name in names {
            if let Some(history) = doc.by_name.remove(&name) {
                for image in &history {
                    doc.by_id.remove(&image.id);
                }
            }
        }
        self.save(&doc)
    }

    /// All registered names, ascending
    pub async fn names(&self) -> Vec<String> {
        let _guard = self.lock.lock().await;
        self.load().by_name.keys().cloned().collect()
    }

    /// Number of images across all histories
    pub async fn image_count(&self) -> usize {
        let _guard = self.lock.lock().await;
        self.load().by_id.len()
    }

    /// Snapshot of every name with its history, ascending by name
    pub async fn all(&self) -> Vec<(String, History)> {
        let _guard = self.lock.lock().await;
        self.load().by_name.into_iter().collect()
    }
}

fn find_in(doc: &IndexDoc, id_or_name: &str) -> Option<Image> {
    if let Some(image) = doc.by_id.get(id_or_name) {
        return Some(image.clone());
    }
    doc.by_name
        .get(id_or_name)
        .and_then(|history| history.latest())
        .cloned()
}

fn add_to(doc: &mut IndexDoc, name: &str, image: &Image) {
    if let Some(history) = doc.by_name.get(name) {
        if let Some(latest) = history.latest() {
            if latest.id == image.id {
                return;
            }
        }
    }
    doc.by_name
        .entry(name.to_string())
        .or_insert_with(History::default)
        .add(image.clone());
    doc.by_id.insert(image.id.clone(), image.clone());
}
