use crate::types::{ChunkIndex, SequenceId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// A malformed plan or missing required input. Never retried.
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        beat_id: Option<String>,
        sequence_id: Option<SequenceId>,
        chunk_index: Option<ChunkIndex>,
    },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Unknown generation profile '{0}'")]
    UnknownProfile(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Build a validation error with no structured context attached.
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation {
            message: message.into(),
            beat_id: None,
            sequence_id: None,
            chunk_index: None,
        }
    }

    /// Attach the offending beat id to a validation error.
    ///
    /// Other variants are returned unchanged.
    pub fn with_beat(mut self, id: impl Into<String>) -> Self {
        if let CoreError::Validation { beat_id, .. } = &mut self {
            *beat_id = Some(id.into());
        }
        self
    }

    /// Attach the offending sequence to a validation error.
    pub fn with_sequence(mut self, id: SequenceId) -> Self {
        if let CoreError::Validation { sequence_id, .. } = &mut self {
            *sequence_id = Some(id);
        }
        self
    }

    /// Attach the offending chunk index to a validation error.
    pub fn with_chunk(mut self, index: ChunkIndex) -> Self {
        if let CoreError::Validation { chunk_index, .. } = &mut self {
            *chunk_index = Some(index);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_builders_fill_validation_fields() {
        let err = CoreError::validation("bad plan")
            .with_beat("beat-2")
            .with_sequence(1)
            .with_chunk(4);
        assert_eq!(
            err,
            CoreError::Validation {
                message: "bad plan".to_string(),
                beat_id: Some("beat-2".to_string()),
                sequence_id: Some(1),
                chunk_index: Some(4),
            }
        );
    }

    #[test]
    fn context_builders_leave_other_variants_untouched() {
        let err = CoreError::Internal("boom".to_string()).with_beat("b");
        assert_eq!(err, CoreError::Internal("boom".to_string()));
    }
}
