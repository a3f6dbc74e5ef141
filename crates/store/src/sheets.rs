use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use sheetdesk_contracts::Record;

use crate::grid::{layout_row, merge_row, zip_row};
use crate::{StoreError, TableStore};

#[derive(Debug, Clone)]
pub struct SheetsStoreConfig {
    pub base_url: String,
    pub spreadsheet_id: String,
    pub bearer_token: String,
    pub timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_backoff: Duration,
}

/// HTTP client for the spreadsheet values API. One handle is constructed at
/// startup and shared by reference; there is no per-operation re-open.
pub struct SheetsStore {
    config: SheetsStoreConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl SheetsStore {
    pub fn new(config: SheetsStoreConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|_| StoreError::transient("failed to initialize store http client"))?;

        Ok(Self { config, http })
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.spreadsheet_id,
            range
        )
    }

    fn batch_update_url(&self) -> String {
        format!(
            "{}/v4/spreadsheets/{}:batchUpdate",
            self.config.base_url.trim_end_matches('/'),
            self.config.spreadsheet_id
        )
    }

    fn metadata_url(&self) -> String {
        format!(
            "{}/v4/spreadsheets/{}?fields=sheets.properties.title",
            self.config.base_url.trim_end_matches('/'),
            self.config.spreadsheet_id
        )
    }

    /// Sends one request, retrying rate-limited responses with doubling
    /// backoff up to the configured attempt budget. Never retries other
    /// failures. Returns the response even when its status is not a success;
    /// callers that cannot interpret statuses go through `send` instead.
    async fn send_raw(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, StoreError> {
        let max_attempts = self.config.retry_max_attempts.max(1);
        let mut backoff = self.config.retry_base_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let mut request = self
                .http
                .request(method.clone(), url)
                .bearer_auth(&self.config.bearer_token);
            if let Some(body) = body {
                request = request.json(body);
            }

            let resp = request.send().await?;
            if resp.status() != StatusCode::TOO_MANY_REQUESTS || attempt >= max_attempts {
                return Ok(resp);
            }

            tracing::debug!(attempt, url, "store rate limited, backing off");
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, StoreError> {
        let resp = self.send_raw(method, url, body).await?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(status_error(resp.status()))
        }
    }

    async fn fetch_grid(&self, table: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let url = self.values_url(table);
        let resp = self.send(Method::GET, &url, None).await?;
        let decoded = resp
            .json::<ValuesResponse>()
            .await
            .map_err(|_| StoreError::transient("store returned invalid values payload"))?;

        Ok(decoded
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }

    async fn sheet_titles(&self) -> Result<Vec<String>, StoreError> {
        #[derive(Deserialize)]
        struct Metadata {
            #[serde(default)]
            sheets: Vec<Sheet>,
        }
        #[derive(Deserialize)]
        struct Sheet {
            properties: SheetProperties,
        }
        #[derive(Deserialize)]
        struct SheetProperties {
            title: String,
        }

        let url = self.metadata_url();
        let resp = self.send(Method::GET, &url, None).await?;
        let decoded = resp
            .json::<Metadata>()
            .await
            .map_err(|_| StoreError::transient("store returned invalid metadata payload"))?;

        Ok(decoded
            .sheets
            .into_iter()
            .map(|sheet| sheet.properties.title)
            .collect())
    }

    /// Returns `true` if this call created the sheet. A 400 here means a
    /// racing creator won; that is success for the caller, but the header
    /// must not be rewritten.
    async fn add_sheet(&self, table: &str) -> Result<bool, StoreError> {
        let url = self.batch_update_url();
        let body = serde_json::json!({
            "requests": [{ "addSheet": { "properties": { "title": table } } }]
        });

        let resp = self.send_raw(Method::POST, &url, Some(&body)).await?;
        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::BAD_REQUEST => Ok(false),
            status => Err(status_error(status)),
        }
    }

    async fn put_row(&self, table: &str, row_index: usize, cells: &[String]) -> Result<(), StoreError> {
        let range = format!(
            "{}!A{}:{}{}",
            table,
            row_index,
            column_letter(cells.len().max(1) - 1),
            row_index
        );
        let url = format!("{}?valueInputOption=RAW", self.values_url(&range));
        let body = serde_json::json!({ "values": [cells] });
        self.send(Method::PUT, &url, Some(&body)).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TableStore for SheetsStore {
    async fn fetch_all_rows(&self, table: &str) -> Result<Vec<Record>, StoreError> {
        let grid = self.fetch_grid(table).await?;
        let mut rows = grid.into_iter();
        let Some(header) = rows.next() else {
            return Ok(Vec::new());
        };

        Ok(rows
            .map(|row| zip_row(&header, &row))
            .filter(|record| !record.is_empty())
            .collect())
    }

    async fn append_row(&self, table: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        let header = self
            .fetch_grid(&format!("{}!1:1", table))
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound)?;

        let row = layout_row(&header, fields);
        let url = format!(
            "{}:append?valueInputOption=RAW",
            self.values_url(table)
        );
        let body = serde_json::json!({ "values": [row] });
        self.send(Method::POST, &url, Some(&body)).await?;
        Ok(())
    }

    async fn update_row(
        &self,
        table: &str,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), StoreError> {
        let grid = self.fetch_grid(table).await?;
        let Some((header, data)) = grid.split_first() else {
            return Err(StoreError::NotFound);
        };

        let position = data
            .iter()
            .position(|row| row.first().map(String::as_str) == Some(key))
            .ok_or(StoreError::NotFound)?;

        let merged = merge_row(header, &data[position], fields);

        // Sheet rows are 1-based and the header occupies row 1.
        self.put_row(table, position + 2, &merged).await
    }

    async fn ensure_table(&self, table: &str, header: &[String]) -> Result<(), StoreError> {
        let titles = self.sheet_titles().await?;
        if titles.iter().any(|title| title == table) {
            return Ok(());
        }

        if self.add_sheet(table).await? {
            self.put_row(table, 1, header).await?;
        }
        Ok(())
    }
}

fn status_error(status: StatusCode) -> StoreError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => StoreError::RateLimited,
        // The values API reports a missing sheet as an unparseable range
        // (HTTP 400), not as a 404.
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => StoreError::NotFound,
        status => StoreError::Transient(format!("store returned status {}", status.as_u16())),
    }
}

fn cell_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn column_letter(index: usize) -> String {
    let alphabet = b'Z' - b'A' + 1;
    let mut out = String::new();
    if index >= alphabet as usize {
        out.push((b'A' + (index / alphabet as usize - 1) as u8) as char);
    }
    out.push((b'A' + (index % alphabet as usize) as u8) as char);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_maps_taxonomy() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS),
            StoreError::RateLimited
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND),
            StoreError::NotFound
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST),
            StoreError::NotFound
        ));
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR),
            StoreError::Transient(_)
        ));
    }

    #[test]
    fn column_letter_covers_two_letter_range() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
    }
}
