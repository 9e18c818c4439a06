use super::*;
use crate::auth::{AuthFlowError, WebAuthFlow};
use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use url::Url;

fn open(dir: &TempDir) -> Facade {
    Facade::open(Config::new(dir.path().join("data"))).unwrap()
}

fn video(id: &str, title: &str, notes: &str) -> Value {
    json!({
        "id": id,
        "rev": null,
        "video": {"title": title, "description": format!("about {title}")},
        "tags": ["misc"],
        "notes": notes,
    })
}

async fn store(facade: &Facade, docs: Vec<Value>) -> Vec<StoredRevision> {
    match facade.handle(Command::StoreVideos(docs)).await {
        Event::StoredVideos(revs) => revs,
        other => panic!("unexpected event {other:?}"),
    }
}

async fn fetch_range(facade: &Facade, args: FetchVideosArgs) -> Vec<String> {
    match facade.handle(Command::FetchVideos(args)).await {
        Event::FetchedVideos(docs) => docs
            .iter()
            .map(|d| d["id"].as_str().unwrap().to_string())
            .collect(),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_store_then_fetch_round_trip() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);
    let written = video("dQw4w9WgXcQ", "Never gonna", "classic");
    let revs = store(&facade, vec![written.clone()]).await;
    assert_eq!(revs.len(), 1);

    let Event::FetchedVideo(Some(doc)) = facade.handle(Command::FetchVideo("dQw4w9WgXcQ".into())).await else {
        panic!("video not returned");
    };
    assert_eq!(doc["id"], "dQw4w9WgXcQ");
    assert_eq!(doc["rev"], revs[0].rev);
    assert!(doc.get("_id").is_none());
    assert!(doc.get("_rev").is_none());
    assert_eq!(doc["type"], DocType::Video.as_str());
    for field in ["video", "tags", "notes"] {
        assert_eq!(doc[field], written[field]);
    }
}

#[tokio::test]
async fn test_stale_bulk_write_reports_conflict() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);
    store(&facade, vec![video("a", "A", ""), video("b", "B", "")]).await;

    let event = facade
        .handle(Command::StoreVideos(vec![video("b", "B2", ""), video("c", "C", "")]))
        .await;
    let Event::FetchedVideoError(diagnostic) = event else {
        panic!("expected a video error, got {event:?}");
    };
    assert_eq!(diagnostic.name, ErrorKind::Conflict);
    assert_eq!(diagnostic.ids, vec!["b".to_string()]);
    assert_eq!(
        facade.handle(Command::FetchVideo("c".into())).await,
        Event::FetchedVideo(None)
    );
}

#[tokio::test]
async fn test_malformed_video_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);
    let event = facade
        .handle(Command::StoreVideos(vec![json!({"title": "no id"})]))
        .await;
    assert!(matches!(event, Event::FetchedVideoError(ref d) if d.name == ErrorKind::BadRequest));
}

#[tokio::test]
async fn test_range_queries_filter_type_and_order() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);
    store(
        &facade,
        ["a", "c", "h", "m", "n", "z"]
            .into_iter()
            .map(|id| video(id, id, ""))
            .collect(),
    )
    .await;
    // A playlist inside the range must never show up among videos.
    facade
        .handle(Command::StorePlaylist(json!({"id": "f", "videos": []})))
        .await;

    let ascending = fetch_range(
        &facade,
        FetchVideosArgs {
            start_key: Some("a".into()),
            end_key: Some("m".into()),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(ascending, vec!["a", "c", "h", "m"]);

    let descending = fetch_range(
        &facade,
        FetchVideosArgs {
            start_key: Some("a".into()),
            end_key: Some("m".into()),
            descending: true,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(descending, vec!["m", "h", "c", "a"]);

    let limited = fetch_range(
        &facade,
        FetchVideosArgs {
            limit: Some(3),
            descending: true,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(limited, vec!["z", "n", "m"]);
}

#[tokio::test]
async fn test_fetch_by_ids_marks_misses() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);
    store(&facade, vec![video("a", "A", ""), video("b", "B", "")]).await;

    let Event::FetchedVideos(docs) = facade
        .handle(Command::FetchVideosByIds(vec!["b".into(), "missing".into(), "a".into()]))
        .await
    else {
        panic!("expected fetched videos");
    };
    assert_eq!(docs.len(), 3);
    assert_eq!(docs[0]["id"], "b");
    assert!(docs[1].is_null());
    assert_eq!(docs[2]["id"], "a");
    assert!(docs[2]["rev"].is_string());
}

#[tokio::test]
async fn test_missing_video_is_absent_not_error() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);
    assert_eq!(
        facade.handle(Command::FetchVideo("nope".into())).await,
        Event::FetchedVideo(None)
    );
}

#[tokio::test]
async fn test_search_matches_notes_only_video() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);
    store(
        &facade,
        vec![
            video("a", "Guitar lesson", "practice barre chords"),
            video("b", "Piano lesson", "scales"),
        ],
    )
    .await;

    let Event::SearchedVideos(docs) = facade.handle(Command::SearchVideos("barre".into())).await else {
        panic!("expected search results");
    };
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["id"], "a");
    assert!(docs[0].get("_id").is_none());

    assert_eq!(
        facade.handle(Command::SearchVideos("harmonica".into())).await,
        Event::SearchedVideos(Vec::new())
    );
    // Every term has to match.
    assert_eq!(
        facade.handle(Command::SearchVideos("lesson scales".into())).await,
        Event::SearchedVideos(vec![docs_by_id(&facade, "b").await])
    );
}

async fn docs_by_id(facade: &Facade, id: &str) -> Value {
    match facade.handle(Command::FetchVideo(id.into())).await {
        Event::FetchedVideo(Some(doc)) => doc,
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_search_index_follows_updates() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);
    let revs = store(&facade, vec![video("a", "Guitar", "old note")]).await;

    let mut updated = video("a", "Guitar", "fresh note");
    updated["rev"] = json!(revs[0].rev);
    store(&facade, vec![updated]).await;

    assert_eq!(
        facade.handle(Command::SearchVideos("old".into())).await,
        Event::SearchedVideos(Vec::new())
    );
    let Event::SearchedVideos(docs) = facade.handle(Command::SearchVideos("fresh".into())).await else {
        panic!("expected search results");
    };
    assert_eq!(docs.len(), 1);
}

#[tokio::test]
async fn test_metadata_forced_overwrite() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);
    assert_eq!(
        facade.handle(Command::FetchYoutubeMetadata).await,
        Event::FetchedYoutubeMetadata(None)
    );

    let first = facade
        .handle(Command::StoreYoutubeMetadata(json!({"rev": null, "channels": 1})))
        .await;
    assert!(matches!(first, Event::FetchedYoutubeMetadata(Some(_))));

    // A stale revision is ignored for the singleton.
    let second = facade
        .handle(Command::StoreYoutubeMetadata(json!({"rev": "1-00000000", "channels": 2})))
        .await;
    let Event::FetchedYoutubeMetadata(Some(doc)) = second else {
        panic!("expected metadata, got {second:?}");
    };
    assert_eq!(doc["channels"], 2);
    assert_eq!(doc["id"], YOUTUBE_DATA_DOC_ID);
    assert_eq!(doc["type"], DocType::YoutubeData.as_str());

    let fetched = facade.handle(Command::FetchYoutubeMetadata).await;
    assert_eq!(fetched, Event::FetchedYoutubeMetadata(Some(doc)));
}

#[tokio::test]
async fn test_metadata_must_be_an_object() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);
    let event = facade.handle(Command::StoreYoutubeMetadata(json!("text"))).await;
    assert!(matches!(event, Event::YoutubeMetadataError(ref d) if d.status == 400));
}

#[tokio::test]
async fn test_playlist_lifecycle() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);

    let Event::FetchedPlaylist(first) = facade
        .handle(Command::StorePlaylist(json!({"id": "PL1", "rev": null, "videos": ["a"]})))
        .await
    else {
        panic!("expected stored playlist");
    };
    let stale_rev = first["rev"].as_str().unwrap().to_string();

    let Event::FetchedPlaylist(second) = facade
        .handle(Command::StorePlaylist(json!({"id": "PL1", "rev": null, "videos": ["a", "b"]})))
        .await
    else {
        panic!("expected stored playlist");
    };
    assert_eq!(second["videos"], json!(["a", "b"]));
    facade
        .handle(Command::StorePlaylist(json!({"id": "PL2", "videos": []})))
        .await;

    let Event::FetchedAllPlaylists(all) = facade.handle(Command::FetchAllPlaylists).await else {
        panic!("expected playlists");
    };
    let ids: Vec<&str> = all.iter().map(|p| p["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["PL1", "PL2"]);
    assert!(all.iter().all(|p| p["rev"].is_string()));

    let stale = facade
        .handle(Command::RemovePlaylist(PlaylistRef {
            id: "PL1".into(),
            rev: stale_rev,
        }))
        .await;
    assert!(matches!(stale, Event::PlaylistsError(ref d) if d.name == ErrorKind::Conflict));

    let removed = facade
        .handle(Command::RemovePlaylist(PlaylistRef {
            id: "PL1".into(),
            rev: second["rev"].as_str().unwrap().to_string(),
        }))
        .await;
    assert_eq!(removed, Event::RemovedPlaylist("PL1".into()));

    let missing = facade.handle(Command::FetchPlaylist("PL1".into())).await;
    assert!(matches!(missing, Event::PlaylistsError(ref d) if d.name == ErrorKind::NotFound));
}

#[tokio::test]
async fn test_remove_playlist_refuses_other_documents() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);
    let revs = store(&facade, vec![video("v", "V", "")]).await;
    let event = facade
        .handle(Command::RemovePlaylist(PlaylistRef {
            id: "v".into(),
            rev: revs[0].rev.clone(),
        }))
        .await;
    assert!(matches!(event, Event::PlaylistsError(ref d) if d.name == ErrorKind::NotFound));

    let garbage = facade
        .handle(Command::RemovePlaylist(PlaylistRef {
            id: "v".into(),
            rev: "garbage".into(),
        }))
        .await;
    assert!(matches!(garbage, Event::PlaylistsError(ref d) if d.name == ErrorKind::BadRequest));
}

#[tokio::test]
async fn test_delete_database_surfaces_outcome() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);
    store(&facade, vec![video("a", "Guitar", "")]).await;

    assert_eq!(facade.handle(Command::DeleteDatabase).await, Event::DatabaseDeleted);
    assert_eq!(
        facade.handle(Command::FetchVideo("a".into())).await,
        Event::FetchedVideo(None)
    );
    assert_eq!(
        facade.handle(Command::SearchVideos("guitar".into())).await,
        Event::SearchedVideos(Vec::new())
    );
}

#[tokio::test]
async fn test_reopen_rebuilds_search_index() {
    let dir = TempDir::new().unwrap();
    {
        let facade = open(&dir);
        store(&facade, vec![video("a", "Violin", "")]).await;
    }
    let facade = open(&dir);
    let Event::SearchedVideos(docs) = facade.handle(Command::SearchVideos("violin".into())).await else {
        panic!("expected search results");
    };
    assert_eq!(docs.len(), 1);
}

struct CancelledFlow;

#[async_trait]
impl WebAuthFlow for CancelledFlow {
    fn redirect_url(&self) -> Url {
        Url::parse("http://127.0.0.1:1/oauth/callback").unwrap()
    }

    async fn launch(&self, _url: Url, _interactive: bool) -> Result<Url, AuthFlowError> {
        Err(AuthFlowError::Cancelled)
    }
}

#[tokio::test]
async fn test_authorize_failures_are_reported() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);
    let unconfigured = facade.handle(Command::Authorize(true)).await;
    assert!(matches!(unconfigured, Event::AuthorizationError(ref d) if d.name == ErrorKind::Failure));

    let facade = facade.with_auth_flow(Arc::new(CancelledFlow));
    let cancelled = facade.handle(Command::Authorize(true)).await;
    assert!(matches!(cancelled, Event::AuthorizationError(ref d) if d.name == ErrorKind::Cancelled));
}

#[tokio::test]
async fn test_forced_writes_ignore_unparsable_revisions() {
    let dir = TempDir::new().unwrap();
    let facade = open(&dir);

    let meta = facade
        .handle(Command::StoreYoutubeMetadata(json!({
            "rev": "2-9f86d081884c7d659a2feaa0c55ad015",
            "channels": 3,
        })))
        .await;
    let Event::FetchedYoutubeMetadata(Some(doc)) = meta else {
        panic!("expected metadata, got {meta:?}");
    };
    assert_eq!(doc["channels"], 3);

    let playlist = facade
        .handle(Command::StorePlaylist(json!({"id": "PL1", "rev": "stale", "videos": []})))
        .await;
    let Event::FetchedPlaylist(doc) = playlist else {
        panic!("expected playlist, got {playlist:?}");
    };
    assert_eq!(doc["id"], "PL1");
    assert_ne!(doc["rev"], "stale");

    let numeric = facade
        .handle(Command::StorePlaylist(json!({"id": "PL1", "rev": 7, "videos": ["a"]})))
        .await;
    assert!(matches!(numeric, Event::FetchedPlaylist(ref d) if d["videos"] == json!(["a"])));
}

#[tokio::test]
async fn test_delete_database_spares_index_inside_data_dir() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    let facade = Facade::open(Config {
        index_dir: Some(data_dir.join("index")),
        ..Config::new(&data_dir)
    })
    .unwrap();
    store(&facade, vec![video("a", "Guitar", "")]).await;
    std::fs::write(data_dir.join("notes.txt"), "unrelated").unwrap();

    assert_eq!(facade.handle(Command::DeleteDatabase).await, Event::DatabaseDeleted);
    assert!(data_dir.join("notes.txt").exists());

    let revs = store(&facade, vec![video("b", "Banjo", "")]).await;
    assert_eq!(revs.len(), 1);
    let Event::SearchedVideos(docs) = facade.handle(Command::SearchVideos("banjo".into())).await else {
        panic!("expected search results");
    };
    assert_eq!(docs.len(), 1);
    assert_eq!(
        facade.handle(Command::SearchVideos("guitar".into())).await,
        Event::SearchedVideos(Vec::new())
    );
}
