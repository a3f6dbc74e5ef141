use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sheetdesk_contracts::{AuthEntry, Record, Role};
use sheetdesk_store::{StoreError, TableStore};
use tokio::sync::RwLock;

/// Column layout of the persisted auth log. The first column is the key
/// column; `ensure_table` writes this as the header row on first use.
pub const AUTH_LOG_HEADER: [&str; 3] = ["user_id", "role", "last_login"];

const LAST_LOGIN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Static access-code → role mapping, configured externally and immutable
/// for the process lifetime. Codes are matched case-insensitively.
#[derive(Debug, Clone)]
pub struct AccessCodes {
    codes: HashMap<String, Role>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCodesError {
    message: String,
}

impl AccessCodesError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AccessCodesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AccessCodesError {}

impl AccessCodes {
    /// Parses the configured JSON object mapping access codes to role tags,
    /// e.g. `{"batman": "user", "daddy": "admin"}`.
    pub fn from_json(raw: &str) -> Result<Self, AccessCodesError> {
        let value = serde_json::from_str::<serde_json::Value>(raw)
            .map_err(|_| AccessCodesError::new("access codes must be valid JSON"))?;

        let Some(obj) = value.as_object() else {
            return Err(AccessCodesError::new(
                "access codes must be a JSON object of code to role",
            ));
        };

        let mut codes = HashMap::with_capacity(obj.len());
        for (code, role) in obj {
            let normalized = normalize(code);
            if normalized.is_empty() {
                return Err(AccessCodesError::new("access code must be non-empty"));
            }

            let role = role
                .as_str()
                .and_then(Role::parse)
                .ok_or_else(|| {
                    AccessCodesError::new(format!(
                        "access code `{}` maps to an unknown role tag",
                        normalized
                    ))
                })?;

            if codes.insert(normalized.clone(), role).is_some() {
                return Err(AccessCodesError::new(format!(
                    "access code `{}` is configured twice",
                    normalized
                )));
            }
        }

        if codes.is_empty() {
            return Err(AccessCodesError::new(
                "access codes must contain at least one entry",
            ));
        }

        Ok(Self { codes })
    }

    pub fn resolve(&self, code: &str) -> Option<Role> {
        self.codes.get(normalize(code).as_str()).copied()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Granted(Role),
    Rejected,
}

/// Identity → role authorization state. The in-process cache is a
/// read-through, write-through projection of the persisted auth log; the
/// persisted table is the source of truth, the cache never is.
///
/// Per identity the state only moves `Unknown → Authenticated(role)`;
/// re-authentication re-asserts the entry (possibly with a new role) and
/// never appends a duplicate row.
#[derive(Clone)]
pub struct Authorizer {
    store: Arc<dyn TableStore>,
    table: String,
    codes: AccessCodes,
    cache: Arc<RwLock<HashMap<String, Role>>>,
}

impl Authorizer {
    pub fn new(store: Arc<dyn TableStore>, table: impl Into<String>, codes: AccessCodes) -> Self {
        Self {
            store,
            table: table.into(),
            codes,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// One full read of the auth log at startup so warm identities incur
    /// zero store calls later. A missing table means zero entries, not an
    /// error. Returns the number of entries loaded.
    pub async fn preload(&self) -> Result<usize, StoreError> {
        let entries = match self.read_entries().await {
            Ok(entries) => entries,
            Err(StoreError::NotFound) => Vec::new(),
            Err(err) => return Err(err),
        };

        let count = entries.len();
        let mut cache = self.cache.write().await;
        for entry in entries {
            cache.insert(entry.identity, entry.role);
        }
        Ok(count)
    }

    /// Validates `code` against the static mapping. On a hit the entry is
    /// persisted first (update-in-place when the identity already has a
    /// row), then the cache is promoted. The local cache write is
    /// authoritative immediately; there is no confirmation re-read, since
    /// the store may lag behind its own acknowledged writes.
    pub async fn authenticate(&self, code: &str, identity: &str) -> Result<AuthOutcome, StoreError> {
        let Some(role) = self.codes.resolve(code) else {
            tracing::info!(identity, "authentication rejected: unknown access code");
            return Ok(AuthOutcome::Rejected);
        };

        self.persist(identity, role).await?;
        self.cache
            .write()
            .await
            .insert(identity.to_string(), role);

        tracing::info!(identity, role = role.as_str(), "identity authenticated");
        Ok(AuthOutcome::Granted(role))
    }

    /// Cache first; on a miss, one read-through scan of the auth log. A
    /// missing table is identical to "no match".
    pub async fn resolve_role(&self, identity: &str) -> Result<Option<Role>, StoreError> {
        if let Some(role) = self.cache.read().await.get(identity).copied() {
            return Ok(Some(role));
        }

        let entries = match self.read_entries().await {
            Ok(entries) => entries,
            Err(StoreError::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        };

        let Some(entry) = entries.into_iter().find(|entry| entry.identity == identity) else {
            return Ok(None);
        };

        let role = entry.role;
        self.cache.write().await.insert(entry.identity, role);
        Ok(Some(role))
    }

    async fn read_entries(&self) -> Result<Vec<AuthEntry>, StoreError> {
        let rows = self.store.fetch_all_rows(&self.table).await?;
        Ok(rows.iter().filter_map(entry_from_record).collect())
    }

    async fn persist(&self, identity: &str, role: Role) -> Result<(), StoreError> {
        let now = Utc::now().format(LAST_LOGIN_FORMAT).to_string();
        let fields = vec![
            (AUTH_LOG_HEADER[0].to_string(), identity.to_string()),
            (AUTH_LOG_HEADER[1].to_string(), role.as_str().to_string()),
            (AUTH_LOG_HEADER[2].to_string(), now),
        ];

        match self.store.fetch_all_rows(&self.table).await {
            Ok(rows) => {
                let exists = rows
                    .iter()
                    .any(|row| row.get(AUTH_LOG_HEADER[0]).map(str::trim) == Some(identity));
                if exists {
                    match self
                        .store
                        .update_row(&self.table, identity, &fields[1..])
                        .await
                    {
                        // The row vanished between the scan and the update;
                        // fall through to an append.
                        Err(StoreError::NotFound) => {
                            self.store.append_row(&self.table, &fields).await
                        }
                        other => other,
                    }
                } else {
                    self.store.append_row(&self.table, &fields).await
                }
            }
            Err(StoreError::NotFound) => {
                let header = AUTH_LOG_HEADER
                    .iter()
                    .map(|name| name.to_string())
                    .collect::<Vec<_>>();
                self.store.ensure_table(&self.table, &header).await?;
                self.store.append_row(&self.table, &fields).await
            }
            Err(err) => Err(err),
        }
    }
}

fn entry_from_record(record: &Record) -> Option<AuthEntry> {
    let identity = record.get(AUTH_LOG_HEADER[0])?.trim();
    if identity.is_empty() {
        return None;
    }

    let role_tag = record.get(AUTH_LOG_HEADER[1]).unwrap_or_default();
    let Some(role) = Role::parse(role_tag) else {
        tracing::warn!(
            identity,
            role_tag,
            "skipping auth entry with unknown role tag"
        );
        return None;
    };

    Some(AuthEntry {
        identity: identity.to_string(),
        role,
        last_login: record.get(AUTH_LOG_HEADER[2]).unwrap_or_default().to_string(),
    })
}
