/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Locally generated identifier for one `start` attempt.
pub type AttemptId = uuid::Uuid;
