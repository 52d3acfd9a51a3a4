use std::fmt;

use serde::Deserialize;
use url::Url;

use crate::{chapters::ChapterMap, error::SessionResult, ticks::Ticks};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaStream {
    /// Stream index as numbered by the server.
    pub index: i32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub delivery_url: Option<Url>,
}

impl MediaStream {
    pub fn embedded(index: i32, title: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            language: None,
            external: false,
            delivery_url: None,
        }
    }

    pub fn external(index: i32, title: impl Into<String>) -> Self {
        Self {
            external: true,
            ..Self::embedded(index, title)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Chapter {
    pub name: String,
    pub start: Ticks,
}

/// Metadata of one playback attempt, as fetched from the server.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemDescriptor {
    pub id: ItemId,
    pub url: Url,
    pub video: MediaStream,
    #[serde(default)]
    pub audio: Vec<MediaStream>,
    #[serde(default)]
    pub subtitles: Vec<MediaStream>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub start: Ticks,
    pub duration: Ticks,
}

/// Immutable once built. Picking another item means building a new one.
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    id: ItemId,
    url: Url,
    video: MediaStream,
    audio: Vec<MediaStream>,
    subtitles: Vec<MediaStream>,
    chapters: ChapterMap,
    start: Ticks,
    duration: Ticks,
}

impl PlaybackItem {
    pub fn new(desc: ItemDescriptor) -> SessionResult<Self> {
        let duration = desc.duration.max(Ticks::ZERO);
        let chapters = ChapterMap::from_chapters(&desc.chapters, duration)?;

        let start = desc.start.clamp(Ticks::ZERO, duration);
        if start != desc.start {
            log::warn!(
                "Start position {} of item '{}' is outside of the item, using {}",
                desc.start,
                desc.id,
                start
            );
        }

        Ok(Self {
            id: desc.id,
            url: desc.url,
            video: desc.video,
            audio: desc.audio,
            subtitles: desc.subtitles,
            chapters,
            start,
            duration,
        })
    }

    pub fn id(&self) -> &ItemId {
        &self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn video(&self) -> &MediaStream {
        &self.video
    }

    pub fn audio(&self) -> &[MediaStream] {
        &self.audio
    }

    pub fn subtitles(&self) -> &[MediaStream] {
        &self.subtitles
    }

    pub fn chapters(&self) -> &ChapterMap {
        &self.chapters
    }

    pub fn start(&self) -> Ticks {
        self.start
    }

    pub fn duration(&self) -> Ticks {
        self.duration
    }

    pub fn duration_seconds(&self) -> i64 {
        self.duration.seconds()
    }

    pub fn external_subtitle_urls(&self) -> Vec<Url> {
        self.subtitles
            .iter()
            .filter(|s| s.external)
            .filter_map(|s| s.delivery_url.clone())
            .collect()
    }
}
