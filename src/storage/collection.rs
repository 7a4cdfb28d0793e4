//! In-process document collection.

use super::EntityStore;
use crate::codec;
use crate::criteria::Predicate;
use crate::entity::TemporalEntity;
use crate::error::Result;
use crate::types::{InternalId, Timestamp};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Magic bytes for collection snapshots.
const COLLECTION_MAGIC: &[u8; 4] = b"DOC\0";

/// Current collection snapshot format version.
const COLLECTION_VERSION: u8 = 1;

/// Every version of one entity kind, keyed by internal id.
pub struct DocumentCollection<T> {
    documents: RwLock<BTreeMap<InternalId, T>>,
}

impl<T: TemporalEntity + Clone> DocumentCollection<T> {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored versions, current and ended.
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    pub fn get(&self, id: InternalId) -> Option<T> {
        self.documents.read().get(&id).cloned()
    }

    /// Remove every version.
    pub fn clear(&self) {
        self.documents.write().clear();
    }
}

impl<T: TemporalEntity + Clone + Serialize + DeserializeOwned> DocumentCollection<T> {
    /// Write a snapshot of the collection.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let documents: Vec<T> = self.documents.read().values().cloned().collect();
        codec::write_framed(path.as_ref(), COLLECTION_MAGIC, COLLECTION_VERSION, &documents)
    }

    /// Load a snapshot written by [`save_to`](Self::save_to).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let documents: Vec<T> =
            codec::read_framed(path.as_ref(), COLLECTION_MAGIC, COLLECTION_VERSION)?;
        let collection = Self::new();
        collection.save_all(documents)?;
        Ok(collection)
    }
}

impl<T: TemporalEntity + Clone> Default for DocumentCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TemporalEntity + Clone> EntityStore<T> for DocumentCollection<T> {
    fn save_all(&self, entities: Vec<T>) -> Result<Vec<T>> {
        let mut documents = self.documents.write();
        let mut saved = Vec::with_capacity(entities.len());

        for mut entity in entities {
            let id = match entity.internal_id() {
                Some(id) => id,
                None => {
                    let id = InternalId::generate();
                    entity.meta_mut().internal_id = Some(id);
                    id
                }
            };
            documents.insert(id, entity.clone());
            saved.push(entity);
        }

        debug!(count = saved.len(), "saved documents");
        Ok(saved)
    }

    fn find(&self, predicate: &Predicate) -> Result<Vec<T>> {
        Ok(self
            .documents
            .read()
            .values()
            .filter(|doc| predicate.matches(*doc))
            .cloned()
            .collect())
    }

    fn end_versions(&self, ids: &[InternalId], end: Timestamp) -> Result<usize> {
        let mut documents = self.documents.write();
        let mut ended = 0;
        for id in ids {
            if let Some(doc) = documents.get_mut(id) {
                doc.meta_mut().end = Some(end);
                ended += 1;
            }
        }
        Ok(ended)
    }
}
