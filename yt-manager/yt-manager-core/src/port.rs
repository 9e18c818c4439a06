//! Wire protocol between the UI and the facade.
//!
//! A command is `{"command": "<name>", "args": ...}` and every command is
//! answered by exactly one event `{"event": "<name>", "payload": ...}`.
//! Replies carry no request id; two commands in flight may be answered in
//! either order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::{AuthFlowError, RedirectDescriptor};
use crate::mapping::MappingError;
use crate::storage::StoreError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "kebab-case")]
pub enum Command {
    DeleteDatabase,
    StoreVideos(Vec<Value>),
    FetchVideos(FetchVideosArgs),
    FetchVideosByIds(Vec<String>),
    FetchVideo(String),
    SearchVideos(String),
    StoreYoutubeMetadata(Value),
    FetchYoutubeMetadata,
    StorePlaylist(Value),
    RemovePlaylist(PlaylistRef),
    FetchPlaylist(String),
    FetchAllPlaylists,
    Authorize(bool),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::DeleteDatabase => "delete-database",
            Command::StoreVideos(_) => "store-videos",
            Command::FetchVideos(_) => "fetch-videos",
            Command::FetchVideosByIds(_) => "fetch-videos-by-ids",
            Command::FetchVideo(_) => "fetch-video",
            Command::SearchVideos(_) => "search-videos",
            Command::StoreYoutubeMetadata(_) => "store-youtube-metadata",
            Command::FetchYoutubeMetadata => "fetch-youtube-metadata",
            Command::StorePlaylist(_) => "store-playlist",
            Command::RemovePlaylist(_) => "remove-playlist",
            Command::FetchPlaylist(_) => "fetch-playlist",
            Command::FetchAllPlaylists => "fetch-all-playlists",
            Command::Authorize(_) => "authorize",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchVideosArgs {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub descending: bool,
    #[serde(default)]
    pub start_key: Option<String>,
    #[serde(default)]
    pub end_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistRef {
    pub id: String,
    pub rev: String,
}

/// Revision assigned to one document of a bulk write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRevision {
    pub id: String,
    pub rev: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum Event {
    DatabaseDeleted,
    DatabaseError(Diagnostic),
    StoredVideos(Vec<StoredRevision>),
    /// Range results, or lookup-by-ids results aligned with the requested
    /// ids where a miss is `null`.
    FetchedVideos(Vec<Value>),
    FetchedVideo(Option<Value>),
    SearchedVideos(Vec<Value>),
    FetchedVideoError(Diagnostic),
    FetchedYoutubeMetadata(Option<Value>),
    YoutubeMetadataError(Diagnostic),
    FetchedPlaylist(Value),
    RemovedPlaylist(String),
    FetchedAllPlaylists(Vec<Value>),
    PlaylistsError(Diagnostic),
    AuthorizedRedirectUri(RedirectDescriptor),
    AuthorizationError(Diagnostic),
    /// The transport could not decode a command.
    CommandError(Diagnostic),
}

impl Event {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Event::DatabaseError(_)
                | Event::FetchedVideoError(_)
                | Event::YoutubeMetadataError(_)
                | Event::PlaylistsError(_)
                | Event::AuthorizationError(_)
                | Event::CommandError(_)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BadRequest,
    InteractionRequired,
    Cancelled,
    Denied,
    Failure,
}

impl ErrorKind {
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::BadRequest => 400,
            ErrorKind::InteractionRequired | ErrorKind::Denied => 401,
            ErrorKind::Cancelled => 499,
            ErrorKind::Failure => 500,
        }
    }
}

/// Error payload carried by every `*-error` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub status: u16,
    pub name: ErrorKind,
    pub reason: String,
    /// Documents involved, e.g. every conflicting id of a bulk write.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
}

impl Diagnostic {
    pub fn new(name: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            status: name.status(),
            name,
            reason: reason.into(),
            ids: Vec::new(),
        }
    }

    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        self.ids = ids;
        self
    }
}

impl From<&StoreError> for Diagnostic {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => {
                Diagnostic::new(ErrorKind::NotFound, err.to_string()).with_ids(vec![id.clone()])
            }
            StoreError::Conflict(ids) => {
                Diagnostic::new(ErrorKind::Conflict, err.to_string()).with_ids(ids.clone())
            }
            StoreError::InvalidRevision(_) => Diagnostic::new(ErrorKind::BadRequest, err.to_string()),
            StoreError::Io(_) | StoreError::Encoding(_) => {
                Diagnostic::new(ErrorKind::Failure, err.to_string())
            }
        }
    }
}

impl From<&MappingError> for Diagnostic {
    fn from(err: &MappingError) -> Self {
        Diagnostic::new(ErrorKind::BadRequest, err.to_string())
    }
}

impl From<&AuthFlowError> for Diagnostic {
    fn from(err: &AuthFlowError) -> Self {
        let kind = match err {
            AuthFlowError::InteractionRequired => ErrorKind::InteractionRequired,
            AuthFlowError::Cancelled => ErrorKind::Cancelled,
            AuthFlowError::Denied(_) => ErrorKind::Denied,
            AuthFlowError::InvalidUrl(_) | AuthFlowError::Platform(_) => ErrorKind::Failure,
        };
        Diagnostic::new(kind, err.to_string())
    }
}

impl From<&anyhow::Error> for Diagnostic {
    fn from(err: &anyhow::Error) -> Self {
        Diagnostic::new(ErrorKind::Failure, format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_decode_from_ui_messages() {
        let cmd: Command = serde_json::from_value(json!({"command": "delete-database"})).unwrap();
        assert_eq!(cmd, Command::DeleteDatabase);

        let cmd: Command = serde_json::from_value(json!({
            "command": "fetch-videos",
            "args": {"limit": 20, "descending": true, "startKey": "a", "endKey": null}
        }))
        .unwrap();
        assert_eq!(
            cmd,
            Command::FetchVideos(FetchVideosArgs {
                limit: Some(20),
                descending: true,
                start_key: Some("a".into()),
                end_key: None,
            })
        );

        let cmd: Command = serde_json::from_value(json!({"command": "authorize", "args": true})).unwrap();
        assert_eq!(cmd.name(), "authorize");

        let cmd: Command = serde_json::from_value(json!({
            "command": "remove-playlist",
            "args": {"id": "PL1", "rev": "1-00000000"}
        }))
        .unwrap();
        assert_eq!(cmd.name(), "remove-playlist");
    }

    #[test]
    fn unknown_commands_are_rejected() {
        assert!(serde_json::from_value::<Command>(json!({"command": "drop-tables"})).is_err());
    }

    #[test]
    fn events_encode_with_kebab_case_names() {
        let value = serde_json::to_value(Event::FetchedVideo(None)).unwrap();
        assert_eq!(value, json!({"event": "fetched-video", "payload": null}));

        let diagnostic = Diagnostic::from(&StoreError::Conflict(vec!["a".into(), "b".into()]));
        let value = serde_json::to_value(Event::FetchedVideoError(diagnostic)).unwrap();
        assert_eq!(value["event"], "fetched-video-error");
        assert_eq!(value["payload"]["status"], 409);
        assert_eq!(value["payload"]["name"], "conflict");
        assert_eq!(value["payload"]["ids"], json!(["a", "b"]));
    }

    #[test]
    fn not_found_is_distinct_from_failure() {
        let not_found = Diagnostic::from(&StoreError::NotFound("x".into()));
        assert_eq!(not_found.name, ErrorKind::NotFound);
        assert_eq!(not_found.status, 404);

        let failure = Diagnostic::from(&StoreError::Io(std::io::Error::other("disk")));
        assert_eq!(failure.name, ErrorKind::Failure);
        assert!(failure.ids.is_empty());
    }
}
