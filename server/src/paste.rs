use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored paste. Only `remaining_views` ever changes after creation, and
/// only through [`crate::store::PasteStore::conditional_decrement`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Paste {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_views: Option<u32>,
    pub remaining_views: Option<u32>,
}

impl Paste {
    pub fn new(
        id: impl Into<String>,
        content: String,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        max_views: Option<u32>,
    ) -> Self {
        Self {
            id: id.into(),
            content,
            created_at,
            expires_at,
            max_views,
            remaining_views: max_views,
        }
    }

    /// The expiry instant itself already counts as expired.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|expires| now >= expires)
            .unwrap_or_default()
    }

    pub const fn exhausted(&self) -> bool {
        matches!(self.remaining_views, Some(0))
    }
}
