//! Opaque media artifacts passed between the pipeline and its collaborators.

use serde::{Deserialize, Serialize};

/// Kind of media an [`Artifact`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    Video,
}

/// A reference to a piece of media held by object storage.
///
/// The pipeline never inspects artifact contents; it only routes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Storage location, e.g. `s3://bucket/jobs/<id>/chunk-0003.mp4`.
    pub uri: String,
    pub kind: ArtifactKind,
    /// Playback length for video artifacts as reported by the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl Artifact {
    pub fn image(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            kind: ArtifactKind::Image,
            duration_secs: None,
        }
    }

    pub fn video(uri: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            uri: uri.into(),
            kind: ArtifactKind::Video,
            duration_secs: Some(duration_secs),
        }
    }
}
