/// Job identifiers are UUID v7 so they sort by creation time.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Stable, zero-based position of a chunk in the assembled video.
pub type ChunkIndex = u32;

/// Position of a sequence within one chunk-generation run.
pub type SequenceId = usize;
