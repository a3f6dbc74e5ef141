//! Embedded `TableStore` backend with the same observable semantics as the
//! remote one, plus read accounting so tests can assert "zero store calls".

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use sheetdesk_contracts::Record;

use crate::grid::{layout_row, merge_row, zip_row};
use crate::{StoreError, TableStore};

#[derive(Default)]
struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Table>,
    fetch_counts: HashMap<String, usize>,
    fetch_failures: VecDeque<StoreError>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn seed_table(&self, table: &str, header: &[&str], rows: &[&[&str]]) {
        let mut inner = self.lock();
        inner.tables.insert(
            table.to_string(),
            Table {
                header: header.iter().map(|s| s.to_string()).collect(),
                rows: rows
                    .iter()
                    .map(|row| row.iter().map(|s| s.to_string()).collect())
                    .collect(),
            },
        );
    }

    /// Number of `fetch_all_rows` calls observed for `table`.
    pub fn fetch_count(&self, table: &str) -> usize {
        self.lock().fetch_counts.get(table).copied().unwrap_or(0)
    }

    /// Queues an error to be returned by the next `fetch_all_rows` call,
    /// regardless of table.
    pub fn fail_next_fetch(&self, err: StoreError) {
        self.lock().fetch_failures.push_back(err);
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    pub fn header(&self, table: &str) -> Option<Vec<String>> {
        self.lock().tables.get(table).map(|t| t.header.clone())
    }

    pub fn raw_rows(&self, table: &str) -> Vec<Vec<String>> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl TableStore for MemoryStore {
    async fn fetch_all_rows(&self, table: &str) -> Result<Vec<Record>, StoreError> {
        let mut inner = self.lock();
        *inner.fetch_counts.entry(table.to_string()).or_default() += 1;

        if let Some(err) = inner.fetch_failures.pop_front() {
            return Err(err);
        }

        let t = inner.tables.get(table).ok_or(StoreError::NotFound)?;
        Ok(t.rows
            .iter()
            .map(|row| zip_row(&t.header, row))
            .filter(|record| !record.is_empty())
            .collect())
    }

    async fn append_row(&self, table: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let t = inner.tables.get_mut(table).ok_or(StoreError::NotFound)?;
        let row = layout_row(&t.header, fields);
        t.rows.push(row);
        Ok(())
    }

    async fn update_row(
        &self,
        table: &str,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let t = inner.tables.get_mut(table).ok_or(StoreError::NotFound)?;

        let position = t
            .rows
            .iter()
            .position(|row| row.first().map(String::as_str) == Some(key))
            .ok_or(StoreError::NotFound)?;

        t.rows[position] = merge_row(&t.header, &t.rows[position], fields);
        Ok(())
    }

    async fn ensure_table(&self, table: &str, header: &[String]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.tables.entry(table.to_string()).or_insert_with(|| Table {
            header: header.to_vec(),
            rows: Vec::new(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_counts_and_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.fetch_all_rows("missing").await,
            Err(StoreError::NotFound)
        ));
        assert_eq!(store.fetch_count("missing"), 1);
    }

    #[tokio::test]
    async fn ensure_table_is_idempotent_and_keeps_existing_header() {
        let store = MemoryStore::new();
        let header = vec!["user_id".to_string(), "role".to_string()];
        store
            .ensure_table("auth_log", &header)
            .await
            .expect("first ensure should succeed");
        store
            .append_row(
                "auth_log",
                &[("user_id".to_string(), "42".to_string())],
            )
            .await
            .expect("append should succeed");

        let other = vec!["something_else".to_string()];
        store
            .ensure_table("auth_log", &other)
            .await
            .expect("racing ensure should succeed");

        assert_eq!(store.header("auth_log"), Some(header));
        assert_eq!(store.row_count("auth_log"), 1);
    }

    #[tokio::test]
    async fn update_row_overwrites_named_fields_only() {
        let store = MemoryStore::new();
        store.seed_table(
            "auth_log",
            &["user_id", "role", "last_login"],
            &[&["42", "user", "early"]],
        );

        store
            .update_row(
                "auth_log",
                "42",
                &[("last_login".to_string(), "late".to_string())],
            )
            .await
            .expect("update should succeed");

        assert_eq!(store.raw_rows("auth_log"), vec![vec!["42", "user", "late"]]);

        assert!(matches!(
            store
                .update_row("auth_log", "7", &[])
                .await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn queued_fetch_failure_surfaces_once() {
        let store = MemoryStore::new();
        store.seed_table("records", &["name"], &[&["alice"]]);
        store.fail_next_fetch(StoreError::RateLimited);

        assert!(matches!(
            store.fetch_all_rows("records").await,
            Err(StoreError::RateLimited)
        ));
        let rows = store
            .fetch_all_rows("records")
            .await
            .expect("second fetch should succeed");
        assert_eq!(rows.len(), 1);
    }
}
