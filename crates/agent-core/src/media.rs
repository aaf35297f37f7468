//! Media references threaded alongside text

use serde::{Deserialize, Serialize};

/// Kind of media attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

/// A media attachment referenced by URL or carried inline
///
/// The engine never decodes media; it only threads references from the
/// outputs that produced them to the inputs of later steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    /// Unique identifier for the attachment
    pub id: String,

    /// What kind of media this is
    pub kind: MediaKind,

    /// Remote location of the media
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Inline payload (typically base64)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    /// MIME type, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Media {
    /// Create a media reference pointing at a URL
    pub fn from_url(kind: MediaKind, url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            url: Some(url.into()),
            data: None,
            mime_type: None,
        }
    }

    /// Create an image reference
    pub fn image(url: impl Into<String>) -> Self {
        Self::from_url(MediaKind::Image, url)
    }

    /// Create a video reference
    pub fn video(url: impl Into<String>) -> Self {
        Self::from_url(MediaKind::Video, url)
    }

    /// Create an audio reference
    pub fn audio(url: impl Into<String>) -> Self {
        Self::from_url(MediaKind::Audio, url)
    }

    /// Set the MIME type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}
