use anyhow::Result;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::path::Path;
use tantivy::{
    collector::TopDocs,
    directory::MmapDirectory,
    doc,
    query::QueryParser,
    schema::{Field, Schema, STORED, STRING, TEXT},
    Index, IndexReader, IndexWriter, ReloadPolicy, Term,
};
use tracing::debug;

use crate::storage::StoredDoc;

/// Body paths indexed for full-text search. `video.*` paths fall back to the
/// top-level field of the same name.
pub const SEARCHABLE_FIELDS: [&str; 4] = ["video.title", "video.description", "tags", "notes"];

const WRITER_HEAP: usize = 50_000_000;

pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id: Field,
    title: Field,
    description: Field,
    tags: Field,
    notes: Field,
}

impl SearchIndex {
    /// Open or create a persistent index in `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let (schema, fields) = Self::schema();
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let dir = MmapDirectory::open(path)?;
        let index = Index::open_or_create(dir, schema)?;
        Self::with_index(index, fields)
    }

    pub fn in_memory() -> Result<Self> {
        let (schema, fields) = Self::schema();
        Self::with_index(Index::create_in_ram(schema), fields)
    }

    fn schema() -> (Schema, [Field; 5]) {
        let mut schema_builder = Schema::builder();
        let id = schema_builder.add_text_field("id", STRING | STORED);
        let title = schema_builder.add_text_field("title", TEXT);
        let description = schema_builder.add_text_field("description", TEXT);
        let tags = schema_builder.add_text_field("tags", TEXT);
        let notes = schema_builder.add_text_field("notes", TEXT);
        (schema_builder.build(), [id, title, description, tags, notes])
    }

    fn with_index(index: Index, fields: [Field; 5]) -> Result<Self> {
        let [id, title, description, tags, notes] = fields;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer_with_num_threads(1, WRITER_HEAP)?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            id,
            title,
            description,
            tags,
            notes,
        })
    }

    /// Add or replace the given documents.
    pub fn index_documents<'a>(&self, docs: impl IntoIterator<Item = &'a StoredDoc>) -> Result<()> {
        let mut writer = self.writer.lock();
        for stored in docs {
            writer.delete_term(Term::from_field_text(self.id, &stored.id));
            self.add(&writer, stored)?;
        }
        self.commit(&mut writer)
    }

    pub fn remove_document(&self, id: &str) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.id, id));
        self.commit(&mut writer)
    }

    /// Replace the whole index with `docs`. Returns the number indexed.
    pub fn rebuild<'a>(&self, docs: impl IntoIterator<Item = &'a StoredDoc>) -> Result<usize> {
        let mut writer = self.writer.lock();
        writer.delete_all_documents()?;
        let mut count = 0;
        for stored in docs {
            self.add(&writer, stored)?;
            count += 1;
        }
        self.commit(&mut writer)?;
        Ok(count)
    }

    pub fn clear(&self) -> Result<()> {
        self.rebuild(std::iter::empty())?;
        Ok(())
    }

    /// Ids of documents matching every term of `query`, best match first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let terms = plain_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let mut parser = QueryParser::for_index(
            &self.index,
            vec![self.title, self.description, self.tags, self.notes],
        );
        parser.set_conjunction_by_default();
        let q = parser.parse_query(&terms)?;
        let docs = searcher.search(&q, &TopDocs::with_limit(limit))?;
        debug!(query = %terms, hits = docs.len(), "search executed");
        Ok(docs
            .into_iter()
            .filter_map(|(_score, addr)| {
                let retrieved = searcher.doc(addr).ok()?;
                let field = retrieved.get_first(self.id)?;
                field.as_text().map(str::to_string)
            })
            .collect())
    }

    fn add(&self, writer: &IndexWriter, stored: &StoredDoc) -> Result<()> {
        let [title, description, tags, notes] = SEARCHABLE_FIELDS.map(|path| field_text(&stored.body, path));
        writer.add_document(doc!(
            self.id => stored.id.as_str(),
            self.title => title,
            self.description => description,
            self.tags => tags,
            self.notes => notes,
        ))?;
        Ok(())
    }

    fn commit(&self, writer: &mut IndexWriter) -> Result<()> {
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }
}

/// Reduce free text to lowercase alphanumeric terms so that user input can
/// never be read as query syntax.
fn plain_terms(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn field_text(body: &Map<String, Value>, path: &str) -> String {
    let text = lookup(body, path).map(flatten).unwrap_or_default();
    match path.strip_prefix("video.") {
        Some(top_level) if text.is_empty() => lookup(body, top_level).map(flatten).unwrap_or_default(),
        _ => text,
    }
}

fn lookup<'a>(body: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = body.get(segments.next()?)?;
    segments.try_fold(first, |value, segment| value.get(segment))
}

fn flatten(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(items) => join_non_empty(items.iter().map(flatten)),
        Value::Object(map) => join_non_empty(map.values().map(flatten)),
    }
}

fn join_non_empty(parts: impl Iterator<Item = String>) -> String {
    parts.filter(|p| !p.is_empty()).collect::<Vec<_>>().join(" ")
}
