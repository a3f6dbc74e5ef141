use std::sync::Arc;

use sheetdesk_contracts::{MASK_TOKEN, Record, RenderedField, RenderedMatch, Role};
use sheetdesk_store::{StoreError, TableStore};

/// Names of the three candidate fields a query is matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupFields {
    pub name: String,
    pub customer: String,
    pub secret: String,
}

impl Default for LookupFields {
    fn default() -> Self {
        Self {
            name: "name".to_string(),
            customer: "customer_id".to_string(),
            secret: "secret".to_string(),
        }
    }
}

/// Scans the record table for exact, case-normalized matches and redacts
/// the secret field per the caller's role. Holds the table handle acquired
/// at startup; the unauthorized path never constructs one of these, so it
/// performs zero record-table reads.
#[derive(Clone)]
pub struct LookupEngine {
    store: Arc<dyn TableStore>,
    table: String,
    fields: LookupFields,
}

impl LookupEngine {
    pub fn new(store: Arc<dyn TableStore>, table: impl Into<String>, fields: LookupFields) -> Self {
        Self {
            store,
            table: table.into(),
            fields,
        }
    }

    /// A missing record table reads as zero rows, which in turn is a valid
    /// empty result. Store failures other than `NotFound` propagate.
    pub async fn search(&self, role: Role, query: &str) -> Result<Vec<RenderedMatch>, StoreError> {
        let records = match self.store.fetch_all_rows(&self.table).await {
            Ok(records) => records,
            Err(StoreError::NotFound) => {
                tracing::warn!(table = %self.table, "record table not found, treating as empty");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        Ok(search_records(role, query, &records, &self.fields))
    }
}

/// Match policy: exact, case-normalized equality against the name, customer
/// and secret fields. No substring or fuzzy matching. Matches keep store
/// row order.
pub fn search_records(
    role: Role,
    query: &str,
    records: &[Record],
    fields: &LookupFields,
) -> Vec<RenderedMatch> {
    let needle = normalize(query);
    if needle.is_empty() {
        return Vec::new();
    }

    records
        .iter()
        .filter(|record| matches_query(record, &needle, fields))
        .map(|record| render(record, role, &needle, fields))
        .collect()
}

fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn matches_query(record: &Record, needle: &str, fields: &LookupFields) -> bool {
    [&fields.name, &fields.customer, &fields.secret]
        .into_iter()
        .any(|field| {
            record
                .get(field)
                .is_some_and(|value| normalize(value) == needle)
        })
}

fn render(record: &Record, role: Role, needle: &str, fields: &LookupFields) -> RenderedMatch {
    // The secret is shown in full to the privileged role, or when the
    // searcher supplied the secret itself and so already knows it.
    let reveal_secret = role.sees_secrets()
        || record
            .get(&fields.secret)
            .is_some_and(|value| normalize(value) == needle);

    let rendered = record
        .fields()
        .iter()
        .map(|(name, value)| {
            let value = if name == &fields.secret && !reveal_secret {
                MASK_TOKEN.to_string()
            } else {
                value.clone()
            };
            RenderedField {
                name: name.clone(),
                value,
            }
        })
        .collect();

    RenderedMatch { fields: rendered }
}
