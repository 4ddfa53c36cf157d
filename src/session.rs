use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for one live engine instance.
///
/// The driver owns exactly one of these between `start()` and `stop()`.
/// Liveness is a property of the engine process and is queried from it
/// directly rather than cached here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        }
    }
}
