//! Command dispatcher over the document store, the search index and the
//! authorization flow. Each command yields exactly one [`Event`].

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::auth::{Authorizer, WebAuthFlow};
use crate::config::Config;
use crate::doc_type::{DocType, YOUTUBE_DATA_DOC_ID};
use crate::mapping::{self, MappingError};
use crate::port::{Command, Diagnostic, ErrorKind, Event, FetchVideosArgs, PlaylistRef, StoredRevision};
use crate::search::SearchIndex;
use crate::storage::{DocWrite, DocumentStore, PutMode, RangeQuery, Revision, StoreError, StoredDoc, TYPE_FIELD};

/// Shared handle; clones refer to the same store and index.
#[derive(Clone)]
pub struct Facade {
    store: Arc<RwLock<DocumentStore>>,
    search: Arc<SearchIndex>,
    authorizer: Option<Arc<Authorizer>>,
    config: Arc<Config>,
}

impl Facade {
    /// Open the store and build the search index from its video documents.
    pub fn open(config: Config) -> Result<Self> {
        let store = DocumentStore::open(&config.data_dir)
            .with_context(|| format!("opening document store in {}", config.data_dir.display()))?;
        let search = match &config.index_dir {
            Some(dir) => SearchIndex::new(dir)
                .with_context(|| format!("opening search index in {}", dir.display()))?,
            None => SearchIndex::in_memory()?,
        };
        let indexed = search
            .rebuild(&store.find_by_type(DocType::Video.as_str()))
            .context("building search index")?;
        info!(documents = store.len(), indexed, "facade ready");
        Ok(Self {
            store: Arc::new(RwLock::new(store)),
            search: Arc::new(search),
            authorizer: None,
            config: Arc::new(config),
        })
    }

    /// Enable the `authorize` command using the given platform flow.
    pub fn with_auth_flow(mut self, flow: Arc<dyn WebAuthFlow>) -> Self {
        self.authorizer = Some(Arc::new(Authorizer::new(self.config.auth.clone(), flow)));
        self
    }

    pub async fn handle(&self, command: Command) -> Event {
        debug!(command = command.name(), "handling command");
        let event = match command {
            Command::DeleteDatabase => self.delete_database().await,
            Command::StoreVideos(docs) => self.store_videos(docs).await,
            Command::FetchVideos(args) => self.fetch_videos(args).await,
            Command::FetchVideosByIds(ids) => self.fetch_videos_by_ids(&ids).await,
            Command::FetchVideo(id) => self.fetch_video(&id).await,
            Command::SearchVideos(query) => self.search_videos(&query).await,
            Command::StoreYoutubeMetadata(doc) => self.store_youtube_metadata(doc).await,
            Command::FetchYoutubeMetadata => self.fetch_youtube_metadata().await,
            Command::StorePlaylist(doc) => self.store_playlist(doc).await,
            Command::RemovePlaylist(playlist) => self.remove_playlist(playlist).await,
            Command::FetchPlaylist(id) => self.fetch_playlist(&id).await,
            Command::FetchAllPlaylists => self.fetch_all_playlists().await,
            Command::Authorize(interactive) => self.authorize(interactive).await,
        };
        if event.is_error() {
            warn!(?event, "command failed");
        }
        event
    }

    async fn delete_database(&self) -> Event {
        let mut store = self.store.write().await;
        if let Err(e) = store.destroy() {
            return Event::DatabaseError(Diagnostic::from(&e));
        }
        match self.search.clear() {
            Ok(()) => Event::DatabaseDeleted,
            Err(e) => Event::DatabaseError(Diagnostic::from(&e)),
        }
    }

    async fn store_videos(&self, docs: Vec<Value>) -> Event {
        let writes = match docs
            .into_iter()
            .map(|doc| tagged_write(doc, DocType::Video))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(writes) => writes,
            Err(e) => return Event::FetchedVideoError(Diagnostic::from(&e)),
        };
        let mut store = self.store.write().await;
        let written = match store.bulk_put(writes) {
            Ok(written) => written,
            Err(e) => return Event::FetchedVideoError(Diagnostic::from(&e)),
        };
        let ids: Vec<&str> = written.iter().map(|(id, _)| id.as_str()).collect();
        let stored: Vec<StoredDoc> = store.get_many(&ids).into_iter().flatten().collect();
        // The documents are committed at this point; a stale index only
        // affects search until the next open rebuilds it.
        if let Err(e) = self.search.index_documents(&stored) {
            error!(error = %e, documents = stored.len(), "indexing stored videos failed");
        }
        Event::StoredVideos(
            written
                .into_iter()
                .map(|(id, rev)| StoredRevision {
                    id,
                    rev: rev.to_string(),
                })
                .collect(),
        )
    }

    async fn fetch_videos(&self, args: FetchVideosArgs) -> Event {
        let query = RangeQuery {
            start: args.start_key,
            end: args.end_key,
            descending: args.descending,
            limit: args.limit,
            doc_type: Some(DocType::Video.as_str().to_string()),
        };
        let store = self.store.read().await;
        Event::FetchedVideos(store.all_docs(&query).into_iter().map(mapping::to_ui).collect())
    }

    async fn fetch_videos_by_ids(&self, ids: &[String]) -> Event {
        let store = self.store.read().await;
        Event::FetchedVideos(
            store
                .get_many(ids)
                .into_iter()
                .map(|doc| {
                    doc.filter(|d| is_a(d, DocType::Video))
                        .map_or(Value::Null, mapping::to_ui)
                })
                .collect(),
        )
    }

    async fn fetch_video(&self, id: &str) -> Event {
        let store = self.store.read().await;
        match store.get(id) {
            Ok(doc) if is_a(&doc, DocType::Video) => Event::FetchedVideo(Some(mapping::to_ui(doc))),
            Ok(_) | Err(StoreError::NotFound(_)) => Event::FetchedVideo(None),
            Err(e) => Event::FetchedVideoError(Diagnostic::from(&e)),
        }
    }

    async fn search_videos(&self, query: &str) -> Event {
        let ids = match self.search.search(query, self.config.search_limit) {
            Ok(ids) => ids,
            Err(e) => return Event::FetchedVideoError(Diagnostic::from(&e)),
        };
        let store = self.store.read().await;
        Event::SearchedVideos(
            store
                .get_many(&ids)
                .into_iter()
                .flatten()
                .filter(|doc| is_a(doc, DocType::Video))
                .map(mapping::to_ui)
                .collect(),
        )
    }

    async fn store_youtube_metadata(&self, doc: Value) -> Event {
        let doc = match with_id(doc, YOUTUBE_DATA_DOC_ID) {
            Ok(doc) => doc,
            Err(e) => return Event::YoutubeMetadataError(Diagnostic::from(&e)),
        };
        if let Err(e) = self.force_put(doc, DocType::YoutubeData).await {
            return Event::YoutubeMetadataError(e);
        }
        self.fetch_youtube_metadata().await
    }

    async fn fetch_youtube_metadata(&self) -> Event {
        let store = self.store.read().await;
        match store.get(YOUTUBE_DATA_DOC_ID) {
            Ok(doc) => Event::FetchedYoutubeMetadata(Some(mapping::to_ui(doc))),
            Err(StoreError::NotFound(_)) => Event::FetchedYoutubeMetadata(None),
            Err(e) => Event::YoutubeMetadataError(Diagnostic::from(&e)),
        }
    }

    async fn store_playlist(&self, doc: Value) -> Event {
        match self.force_put(doc, DocType::Playlist).await {
            Ok(id) => self.fetch_playlist(&id).await,
            Err(e) => Event::PlaylistsError(e),
        }
    }

    async fn remove_playlist(&self, playlist: PlaylistRef) -> Event {
        let rev: Revision = match playlist.rev.parse() {
            Ok(rev) => rev,
            Err(e) => return Event::PlaylistsError(Diagnostic::from(&e)),
        };
        let mut store = self.store.write().await;
        let result = match store.get(&playlist.id) {
            Ok(doc) if is_a(&doc, DocType::Playlist) => store.remove(&playlist.id, &rev),
            Ok(_) => Err(StoreError::NotFound(playlist.id.clone())),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Event::RemovedPlaylist(playlist.id),
            Err(e) => Event::PlaylistsError(Diagnostic::from(&e)),
        }
    }

    async fn fetch_playlist(&self, id: &str) -> Event {
        let store = self.store.read().await;
        match store.get(id) {
            Ok(doc) if is_a(&doc, DocType::Playlist) => Event::FetchedPlaylist(mapping::to_ui(doc)),
            Ok(_) => Event::PlaylistsError(Diagnostic::from(&StoreError::NotFound(id.to_string()))),
            Err(e) => Event::PlaylistsError(Diagnostic::from(&e)),
        }
    }

    async fn fetch_all_playlists(&self) -> Event {
        let store = self.store.read().await;
        Event::FetchedAllPlaylists(
            store
                .find_by_type(DocType::Playlist.as_str())
                .into_iter()
                .map(mapping::to_ui)
                .collect(),
        )
    }

    async fn authorize(&self, interactive: bool) -> Event {
        let Some(authorizer) = &self.authorizer else {
            return Event::AuthorizationError(Diagnostic::new(
                ErrorKind::Failure,
                "no web auth flow is configured",
            ));
        };
        match authorizer.authorize(interactive).await {
            Ok(descriptor) => Event::AuthorizedRedirectUri(descriptor),
            Err(e) => Event::AuthorizationError(Diagnostic::from(&e)),
        }
    }

    /// Upsert ignoring revisions; returns the document id.
    async fn force_put(&self, doc: Value, doc_type: DocType) -> Result<String, Diagnostic> {
        let write = tagged_write(without_rev(doc), doc_type).map_err(|e| Diagnostic::from(&e))?;
        let id = write.id.clone();
        let mut store = self.store.write().await;
        store
            .put(write, PutMode::Force)
            .map_err(|e| Diagnostic::from(&e))?;
        Ok(id)
    }
}

fn tagged_write(doc: Value, doc_type: DocType) -> Result<DocWrite, MappingError> {
    let mut write = mapping::to_store(doc)?;
    write
        .body
        .insert(TYPE_FIELD.to_string(), Value::String(doc_type.as_str().to_string()));
    Ok(write)
}

fn with_id(doc: Value, id: &str) -> Result<Value, MappingError> {
    let Value::Object(mut body) = doc else {
        return Err(MappingError::NotAnObject);
    };
    body.insert(mapping::UI_ID_FIELD.to_string(), Value::String(id.to_string()));
    Ok(Value::Object(body))
}

/// Forced writes never look at the revision, so it is not parsed either.
fn without_rev(mut doc: Value) -> Value {
    if let Value::Object(body) = &mut doc {
        body.remove(mapping::UI_REV_FIELD);
    }
    doc
}

fn is_a(doc: &StoredDoc, doc_type: DocType) -> bool {
    doc.doc_type().and_then(DocType::parse) == Some(doc_type)
}
