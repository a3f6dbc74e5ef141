use async_trait::async_trait;
use sheetdesk_contracts::Record;

mod grid;
mod memory;
mod sheets;

pub use memory::MemoryStore;
pub use sheets::{SheetsStore, SheetsStoreConfig};

#[derive(Debug)]
pub enum StoreError {
    /// The remote store throttled the call. Surfaced only after the client's
    /// bounded retry budget is exhausted.
    RateLimited,
    /// The named table (or the row addressed by key) does not exist.
    NotFound,
    /// Opaque remote failure. Not retried by this layer.
    Transient(String),
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        StoreError::Transient(message.into())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::RateLimited => write!(f, "store rate limited the request"),
            StoreError::NotFound => write!(f, "table or row not found"),
            StoreError::Transient(message) => write!(f, "transient store failure: {}", message),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<reqwest::Error> for StoreError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            StoreError::Transient("request timed out".to_string())
        } else {
            StoreError::Transient(value.to_string())
        }
    }
}

/// A tabular key-value store. The first row of every table is its header;
/// the first header column is the key column. Callers must not assume a row
/// just written is visible to an immediately following read.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Returns all data rows of `table` in store order, with fields named by
    /// the header row. The header itself is not part of the result.
    async fn fetch_all_rows(&self, table: &str) -> Result<Vec<Record>, StoreError>;

    /// Appends one row; `fields` are laid out into header-column order.
    async fn append_row(&self, table: &str, fields: &[(String, String)]) -> Result<(), StoreError>;

    /// Locates the row whose key column equals `key` (linear scan; auth
    /// tables stay small) and overwrites only the named fields.
    async fn update_row(
        &self,
        table: &str,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), StoreError>;

    /// Creates `table` with `header` as its first row if it does not exist.
    /// Idempotent; a racing creator that loses the race must treat "already
    /// exists" as success and leave the header alone.
    async fn ensure_table(&self, table: &str, header: &[String]) -> Result<(), StoreError>;
}
