use serde::{Deserialize, Serialize};

/// Replacement value for a secret field the caller is not allowed to see.
/// Fixed length so the mask leaks nothing about the real value.
pub const MASK_TOKEN: &str = "******";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Parses a role tag as persisted in the auth log. Unknown tags yield
    /// `None` and the identity is treated as unauthorized.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// `admin` is the superset capability level.
    pub fn sees_secrets(self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// One persisted authorization entry: a single row per identity in the auth
/// log table, overwritten in place on re-authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEntry {
    pub identity: String,
    pub role: Role,
    pub last_login: String,
}

/// A denormalized row from a tabular store, read-only to this system.
/// Fields keep the store's column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, String)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedField {
    pub name: String,
    pub value: String,
}

/// A record after redaction, ready for the transport layer to format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMatch {
    pub fields: Vec<RenderedField>,
}

impl RenderedMatch {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

/// Outcome of an authentication attempt, as handed to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuthReply {
    Granted { role: Role },
    Rejected,
    StoreRateLimited,
    StoreUnavailable,
}

/// Outcome of a lookup request, as handed to the transport layer. An empty
/// `Matches` list is a valid result, distinct from `Unauthorized`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LookupReply {
    Matches { matches: Vec<RenderedMatch> },
    Unauthorized,
    StoreRateLimited,
    StoreUnavailable,
}
