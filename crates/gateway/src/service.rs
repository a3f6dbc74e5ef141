//! Core entry points exposed to the transport layer. Every store failure is
//! converted into a reply variant here; handlers never see a raw store error.

use sheetdesk_auth::{AuthOutcome, Authorizer};
use sheetdesk_contracts::{AuthReply, LookupReply};
use sheetdesk_lookup::LookupEngine;
use sheetdesk_store::StoreError;

#[derive(Clone)]
pub struct Service {
    authorizer: Authorizer,
    lookup: LookupEngine,
}

impl Service {
    pub fn new(authorizer: Authorizer, lookup: LookupEngine) -> Self {
        Self { authorizer, lookup }
    }

    /// Seeds the identity cache from the persisted auth log. Returns the
    /// number of warm entries.
    pub async fn preload(&self) -> Result<usize, StoreError> {
        self.authorizer.preload().await
    }

    pub async fn handle_authenticate(&self, identity: &str, code: &str) -> AuthReply {
        match self.authorizer.authenticate(code, identity).await {
            Ok(AuthOutcome::Granted(role)) => AuthReply::Granted { role },
            Ok(AuthOutcome::Rejected) => AuthReply::Rejected,
            Err(StoreError::RateLimited) => AuthReply::StoreRateLimited,
            Err(err) => {
                tracing::error!(identity, error = %err, "authentication failed against the store");
                AuthReply::StoreUnavailable
            }
        }
    }

    /// Role resolution gates the record scan: an identity that does not
    /// resolve never reaches the record table.
    pub async fn handle_lookup(&self, identity: &str, query: &str) -> LookupReply {
        let role = match self.authorizer.resolve_role(identity).await {
            Ok(Some(role)) => role,
            Ok(None) => return LookupReply::Unauthorized,
            Err(StoreError::RateLimited) => return LookupReply::StoreRateLimited,
            Err(err) => {
                tracing::error!(identity, error = %err, "role resolution failed against the store");
                return LookupReply::StoreUnavailable;
            }
        };

        match self.lookup.search(role, query).await {
            Ok(matches) => LookupReply::Matches { matches },
            Err(StoreError::RateLimited) => LookupReply::StoreRateLimited,
            Err(err) => {
                tracing::error!(identity, error = %err, "record scan failed against the store");
                LookupReply::StoreUnavailable
            }
        }
    }
}
