use std::{fmt, str::FromStr};

use crate::CoreError;

/// Kind of elementary stream a buffer controller is responsible for.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum MediaType {
    Video,
    Audio,
    Text,
}

impl MediaType {
    pub const ALL: [MediaType; 3] = [MediaType::Video, MediaType::Audio, MediaType::Text];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "text" | "fragmentedtext" => Ok(Self::Text),
            _ => Err(CoreError::UnknownMediaType(s.to_string())),
        }
    }
}

/// One value per [`MediaType`].
///
/// Replaces string-keyed dictionaries: every media type always has a slot,
/// so a lookup can never miss because of a misspelled key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PerMedia<T> {
    video: T,
    audio: T,
    text: T,
}

impl<T> PerMedia<T> {
    pub fn new(video: T, audio: T, text: T) -> Self {
        Self { video, audio, text }
    }

    pub fn from_fn(mut f: impl FnMut(MediaType) -> T) -> Self {
        Self {
            video: f(MediaType::Video),
            audio: f(MediaType::Audio),
            text: f(MediaType::Text),
        }
    }

    pub fn get(&self, media: MediaType) -> &T {
        match media {
            MediaType::Video => &self.video,
            MediaType::Audio => &self.audio,
            MediaType::Text => &self.text,
        }
    }

    pub fn get_mut(&mut self, media: MediaType) -> &mut T {
        match media {
            MediaType::Video => &mut self.video,
            MediaType::Audio => &mut self.audio,
            MediaType::Text => &mut self.text,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (MediaType, &T)> {
        MediaType::ALL.into_iter().map(move |m| (m, self.get(m)))
    }
}
