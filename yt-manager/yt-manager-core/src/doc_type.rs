/// Identifier of the single metadata document.
pub const YOUTUBE_DATA_DOC_ID: &str = "YOUTUBE_DATA_DOC_ID";

/// Logical collections sharing the document store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DocType {
    Video,
    Playlist,
    YoutubeData,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Video => "YOUTUBE_VIDEO_DOC_TYPE",
            DocType::Playlist => "YOUTUBE_PLAYLIST_DOC_TYPE",
            DocType::YoutubeData => "YOUTUBE_DATA_DOC_TYPE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "YOUTUBE_VIDEO_DOC_TYPE" => Some(DocType::Video),
            "YOUTUBE_PLAYLIST_DOC_TYPE" => Some(DocType::Playlist),
            "YOUTUBE_DATA_DOC_TYPE" => Some(DocType::YoutubeData),
            _ => None,
        }
    }
}
