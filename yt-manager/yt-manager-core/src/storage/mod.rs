//! Schema-less document storage with revision-checked writes.
//! Documents are stored individually on disk as JSON and loaded at startup.

mod revision;

pub use revision::Revision;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Body field used to partition the store into logical collections.
pub const TYPE_FIELD: &str = "type";
/// Internal identifier field name.
pub const ID_FIELD: &str = "_id";
/// Internal revision field name.
pub const REV_FIELD: &str = "_rev";

const DOC_EXTENSION: &str = "json";
const TMP_EXTENSION: &str = "tmp";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {0} not found")]
    NotFound(String),
    #[error("document update conflict: {}", .0.join(", "))]
    Conflict(Vec<String>),
    #[error("invalid revision {0:?}")]
    InvalidRevision(String),
    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("document encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// A document as persisted: internal identifier and revision plus an opaque body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredDoc {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev")]
    pub rev: Revision,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl StoredDoc {
    pub fn doc_type(&self) -> Option<&str> {
        self.body.get(TYPE_FIELD).and_then(Value::as_str)
    }
}

/// A pending write. `rev` is the last revision the writer saw, `None` for a
/// document it believes to be new.
#[derive(Clone, Debug, PartialEq)]
pub struct DocWrite {
    pub id: String,
    pub rev: Option<Revision>,
    pub body: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutMode {
    /// Reject the write unless `rev` matches the stored revision.
    Checked,
    /// Overwrite whatever is stored.
    Force,
}

/// Key-range scan over document ids. Both bounds are inclusive.
///
/// When both bounds are given with `start > end` they are swapped, so a
/// descending caller may pass them in either order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RangeQuery {
    pub start: Option<String>,
    pub end: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
    pub doc_type: Option<String>,
}

impl RangeQuery {
    fn bounds(&self) -> (Bound<&str>, Bound<&str>) {
        fn bound(key: &Option<String>) -> Bound<&str> {
            match key {
                Some(k) => Bound::Included(k.as_str()),
                None => Bound::Unbounded,
            }
        }
        match (&self.start, &self.end) {
            (Some(start), Some(end)) if start > end => (bound(&self.end), bound(&self.start)),
            _ => (bound(&self.start), bound(&self.end)),
        }
    }

    fn accepts(&self, doc: &StoredDoc) -> bool {
        self.doc_type
            .as_deref()
            .map_or(true, |wanted| doc.doc_type() == Some(wanted))
    }
}

/// Filesystem-backed store for [`StoredDoc`] instances.
pub struct DocumentStore {
    docs: BTreeMap<String, StoredDoc>,
    by_type: HashMap<String, BTreeSet<String>>,
    dir: PathBuf,
}

impl DocumentStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let mut store = Self {
            docs: BTreeMap::new(),
            by_type: HashMap::new(),
            dir,
        };
        for entry in std::fs::read_dir(&store.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(DOC_EXTENSION)
            {
                continue;
            }
            match Self::load(&path) {
                Ok(doc) => store.index_insert(doc),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable document"),
            }
        }
        info!(dir = %store.dir.display(), documents = store.docs.len(), "document store opened");
        Ok(store)
    }

    /// Directory where documents are persisted.
    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn get(&self, id: &str) -> Result<StoredDoc> {
        self.docs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Look up several ids at once. The result is aligned with `ids`.
    pub fn get_many<S: AsRef<str>>(&self, ids: &[S]) -> Vec<Option<StoredDoc>> {
        ids.iter()
            .map(|id| self.docs.get(id.as_ref()).cloned())
            .collect()
    }

    pub fn all_docs(&self, query: &RangeQuery) -> Vec<StoredDoc> {
        let limit = query.limit.unwrap_or(usize::MAX);
        let rows = self.docs.range::<str, _>(query.bounds()).map(|(_, doc)| doc);
        if query.descending {
            rows.rev()
                .filter(|doc| query.accepts(doc))
                .take(limit)
                .cloned()
                .collect()
        } else {
            rows.filter(|doc| query.accepts(doc))
                .take(limit)
                .cloned()
                .collect()
        }
    }

    /// Every document whose `type` field equals `tag`, in id order.
    pub fn find_by_type(&self, tag: &str) -> Vec<StoredDoc> {
        self.by_type
            .get(tag)
            .map(|ids| ids.iter().filter_map(|id| self.docs.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn put(&mut self, write: DocWrite, mode: PutMode) -> Result<Revision> {
        if mode == PutMode::Checked && !self.revision_matches(&write) {
            return Err(StoreError::Conflict(vec![write.id]));
        }
        self.commit(write)
    }

    /// Checked write of a whole batch. Nothing is written if any document
    /// conflicts; the error lists every conflicting id.
    pub fn bulk_put(&mut self, writes: Vec<DocWrite>) -> Result<Vec<(String, Revision)>> {
        let conflicts: Vec<String> = {
            let mut seen = HashSet::new();
            writes
                .iter()
                .filter(|w| !seen.insert(w.id.as_str()) || !self.revision_matches(w))
                .map(|w| w.id.clone())
                .collect()
        };
        if !conflicts.is_empty() {
            debug!(conflicts = conflicts.len(), "bulk write rejected");
            return Err(StoreError::Conflict(conflicts));
        }
        writes
            .into_iter()
            .map(|write| {
                let id = write.id.clone();
                self.commit(write).map(|rev| (id, rev))
            })
            .collect()
    }

    pub fn remove(&mut self, id: &str, rev: &Revision) -> Result<()> {
        let current = self
            .docs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if &current.rev != rev {
            return Err(StoreError::Conflict(vec![id.to_string()]));
        }
        std::fs::remove_file(self.path(id))?;
        self.index_remove(id);
        debug!(id, "document removed");
        Ok(())
    }

    /// Drop every document, on disk and in memory. The store stays usable.
    /// Only document files and interrupted writes are deleted; anything else
    /// sharing the directory is left alone.
    pub fn destroy(&mut self) -> Result<usize> {
        let removed = self.docs.len();
        std::fs::create_dir_all(&self.dir)?;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let owned = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some(DOC_EXTENSION) | Some(TMP_EXTENSION)
            );
            if owned && entry.file_type()?.is_file() {
                std::fs::remove_file(&path)?;
            }
        }
        self.docs.clear();
        self.by_type.clear();
        info!(dir = %self.dir.display(), removed, "document store destroyed");
        Ok(removed)
    }

    fn revision_matches(&self, write: &DocWrite) -> bool {
        match (self.docs.get(&write.id), &write.rev) {
            (None, None) => true,
            (Some(current), Some(rev)) => &current.rev == rev,
            _ => false,
        }
    }

    fn commit(&mut self, write: DocWrite) -> Result<Revision> {
        let generation = self
            .docs
            .get(&write.id)
            .map_or(0, |doc| doc.rev.generation())
            + 1;
        let mut body = write.body;
        body.remove(ID_FIELD);
        body.remove(REV_FIELD);
        let rev = Revision::issue(generation, &body)?;
        let doc = StoredDoc {
            id: write.id,
            rev: rev.clone(),
            body,
        };
        self.save(&doc)?;
        debug!(id = %doc.id, rev = %rev, "document written");
        self.index_insert(doc);
        Ok(rev)
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", URL_SAFE_NO_PAD.encode(id.as_bytes()), DOC_EXTENSION))
    }

    fn save(&self, doc: &StoredDoc) -> Result<()> {
        let path = self.path(&doc.id);
        let tmp = path.with_extension(TMP_EXTENSION);
        std::fs::write(&tmp, serde_json::to_vec(doc)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(path: &Path) -> Result<StoredDoc> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn index_insert(&mut self, doc: StoredDoc) {
        self.index_remove(&doc.id);
        if let Some(tag) = doc.doc_type() {
            self.by_type
                .entry(tag.to_string())
                .or_default()
                .insert(doc.id.clone());
        }
        self.docs.insert(doc.id.clone(), doc);
    }

    fn index_remove(&mut self, id: &str) {
        let Some(old) = self.docs.remove(id) else {
            return;
        };
        if let Some(ids) = old.doc_type().and_then(|tag| self.by_type.get_mut(tag)) {
            ids.remove(id);
        }
    }
}
